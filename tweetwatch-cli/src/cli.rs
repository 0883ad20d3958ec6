use std::path::PathBuf;

use clap::Parser;
use tweetwatch_core::{DeliveryPolicy, Facility};
use url::Url;

/// Watch the live tweet stream for keywords and raise alerts.
///
/// Every tweet matching at least one keyword is logged locally (stderr in
/// debug mode, syslog otherwise) and optionally sent as a CEF event to a
/// remote syslog receiver. SIGHUP reloads the keyword file, SIGTERM and
/// SIGINT stop the monitor.
#[derive(Parser, Debug)]
#[command(name = "tweetwatch", version, about, long_about)]
pub struct Args {
    /// Keyword file, one pattern per line
    #[arg(short = 'k', long, value_name = "PATH")]
    pub keywords: Option<PathBuf>,

    /// Stream account username
    #[arg(short = 'u', long, env = "TWEETWATCH_USERNAME")]
    pub username: Option<String>,

    /// Stream account password
    #[arg(short = 'p', long, env = "TWEETWATCH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Remote syslog host receiving CEF events
    #[arg(short = 'H', long = "cef-host", value_name = "HOST")]
    pub cef_host: Option<String>,

    /// Remote syslog port [default: 514]
    #[arg(short = 'P', long = "cef-port", value_name = "PORT")]
    pub cef_port: Option<u16>,

    /// CEF event severity (0-10) [default: 5]
    #[arg(
        short = 's',
        long = "cef-severity",
        value_name = "LEVEL",
        value_parser = clap::value_parser!(u8).range(0..=10)
    )]
    pub cef_severity: Option<u8>,

    /// Syslog facility for local alerts [default: daemon]
    #[arg(short = 'f', long, value_name = "NAME")]
    pub facility: Option<Facility>,

    /// Single-instance marker file [default: /var/run/tweetwatch.pid]
    #[arg(long = "pid-file", value_name = "PATH")]
    pub pid_file: Option<PathBuf>,

    /// Stay in the foreground and write alerts to stderr
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Config file [default: <config dir>/tweetwatch/config.toml]
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Upstream filter stream endpoint
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<Url>,

    /// Reaction to an undeliverable CEF event: fatal or log
    #[arg(long = "delivery-policy", value_name = "POLICY")]
    pub delivery_policy: Option<DeliveryPolicy>,

    /// Exit on the first upstream connection loss instead of reconnecting
    #[arg(long = "fail-fast")]
    pub fail_fast: bool,

    /// Keep the current subscription when a reload changes the keywords
    #[arg(long = "no-resubscribe")]
    pub no_resubscribe: bool,

    /// Directory for daily rotated log files
    #[arg(long = "log-dir", value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Validate the keyword file, print the subscription filter and exit
    #[arg(long)]
    pub check: bool,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}
