//! Config file loading and merging with command line flags.
//!
//! Values come from the TOML config file first; any flag given on the
//! command line overrides the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use tweetwatch_core::{
    Credentials, DeliveryPolicy, Facility, MonitorConfig, ReconnectPolicy, RemoteReceiver,
    sink::DEFAULT_REMOTE_PORT,
};
use url::Url;

use crate::cli::Args;
use crate::error::{AppError, Result};

/// Default single-instance marker.
pub const DEFAULT_PID_FILE: &str = "/var/run/tweetwatch.pid";

/// Default CEF severity.
pub const DEFAULT_SEVERITY: u8 = 5;

/// Contents of the TOML config file. Every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub keywords: Option<PathBuf>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
    #[serde(default)]
    pub facility: Facility,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_severity")]
    pub severity: u8,
    #[serde(default)]
    pub remote: Option<RemoteReceiver>,
    #[serde(default)]
    pub delivery_policy: DeliveryPolicy,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_pid_file() -> PathBuf {
    PathBuf::from(DEFAULT_PID_FILE)
}

fn default_severity() -> u8 {
    DEFAULT_SEVERITY
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            keywords: None,
            username: None,
            password: None,
            endpoint: None,
            pid_file: default_pid_file(),
            facility: Facility::default(),
            log_dir: None,
            severity: default_severity(),
            remote: None,
            delivery_policy: DeliveryPolicy::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl FileConfig {
    /// Load from `path`, or from the default location if it exists.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.is_file() => path,
                _ => return Ok(Self::default()),
            },
        };

        debug!(path = %path.display(), "Loading config file");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| AppError::io_path("reading config file", &path, e))?;
        Self::parse(&content).map_err(|source| AppError::ConfigFile { path, source })
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// `<config dir>/tweetwatch/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tweetwatch").join("config.toml"))
}

/// Username and password are both required or both absent.
fn pair_credentials(
    username: Option<String>,
    password: Option<String>,
) -> Result<Option<Credentials>> {
    match (username, password) {
        (Some(username), Some(password)) => Ok(Some(Credentials::new(username, password))),
        (None, None) => Ok(None),
        _ => Err(AppError::invalid_config(
            "username and password must be given together",
        )),
    }
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub keywords: PathBuf,
    pub credentials: Option<Credentials>,
    pub endpoint: Option<Url>,
    pub pid_file: PathBuf,
    pub facility: Facility,
    pub log_dir: Option<PathBuf>,
    pub severity: u8,
    pub remote: Option<RemoteReceiver>,
    pub delivery_policy: DeliveryPolicy,
    pub monitor: MonitorConfig,
    pub debug: bool,
}

impl Settings {
    /// Merge the config file with command line flags.
    pub fn resolve(file: FileConfig, args: &Args) -> Result<Self> {
        let keywords = args
            .keywords
            .clone()
            .or(file.keywords)
            .ok_or_else(|| AppError::invalid_config("no keyword file given (use --keywords)"))?;

        let credentials = pair_credentials(
            args.username.clone().or(file.username),
            args.password.clone().or(file.password),
        )?;

        let endpoint = match (&args.endpoint, file.endpoint) {
            (Some(url), _) => Some(url.clone()),
            (None, Some(raw)) => Some(Url::parse(&raw).map_err(|e| {
                AppError::invalid_config(format!("invalid endpoint {raw:?}: {e}"))
            })?),
            (None, None) => None,
        };

        let severity = args.cef_severity.unwrap_or(file.severity);
        if severity > 10 {
            return Err(AppError::invalid_config(format!(
                "CEF severity must be between 0 and 10, got {severity}"
            )));
        }

        let remote = match (&args.cef_host, file.remote) {
            (Some(host), file_remote) => {
                let mut remote = file_remote
                    .filter(|r| &r.host == host)
                    .unwrap_or_else(|| RemoteReceiver::new(host.clone(), DEFAULT_REMOTE_PORT));
                if let Some(port) = args.cef_port {
                    remote.port = port;
                }
                Some(remote)
            }
            (None, Some(mut remote)) => {
                if let Some(port) = args.cef_port {
                    remote.port = port;
                }
                Some(remote)
            }
            (None, None) => None,
        };

        let mut monitor = file.monitor;
        if args.fail_fast {
            monitor.reconnect = ReconnectPolicy::FailFast;
        }
        if args.no_resubscribe {
            monitor.resubscribe_on_reload = false;
        }

        Ok(Self {
            keywords,
            credentials,
            endpoint,
            pid_file: args.pid_file.clone().unwrap_or(file.pid_file),
            facility: args.facility.unwrap_or(file.facility),
            log_dir: args.log_dir.clone().or(file.log_dir),
            severity,
            remote,
            delivery_policy: args.delivery_policy.unwrap_or(file.delivery_policy),
            monitor,
            debug: args.debug,
        })
    }

    /// Credentials, required for anything that talks to upstream.
    pub fn require_credentials(&self) -> Result<Credentials> {
        self.credentials.clone().ok_or_else(|| {
            AppError::invalid_config(
                "credentials missing (use --username/--password or TWEETWATCH_USERNAME/TWEETWATCH_PASSWORD)",
            )
        })
    }

    /// Make file paths absolute so they survive the working directory change
    /// when detaching.
    pub fn absolutize_paths(&mut self) -> Result<()> {
        self.keywords = std::path::absolute(&self.keywords)
            .map_err(|e| AppError::io_path("resolving keyword path", &self.keywords, e))?;
        self.pid_file = std::path::absolute(&self.pid_file)
            .map_err(|e| AppError::io_path("resolving pid file path", &self.pid_file, e))?;
        if let Some(dir) = &self.log_dir {
            self.log_dir = Some(
                std::path::absolute(dir)
                    .map_err(|e| AppError::io_path("resolving log directory", dir, e))?,
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["tweetwatch"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_file_defaults() {
        let file = FileConfig::parse("").unwrap();
        assert_eq!(file.pid_file, PathBuf::from(DEFAULT_PID_FILE));
        assert_eq!(file.facility, Facility::Daemon);
        assert_eq!(file.severity, DEFAULT_SEVERITY);
        assert_eq!(file.delivery_policy, DeliveryPolicy::Fatal);
        assert!(file.remote.is_none());
        assert!(file.monitor.resubscribe_on_reload);
    }

    #[test]
    fn test_parse_full_file() {
        let file = FileConfig::parse(
            r#"
keywords = "/etc/tweetwatch/keywords.txt"
username = "watcher"
password = "secret"
facility = "local2"
severity = 7
delivery_policy = "log"

[remote]
host = "siem.example.org"
port = 1514

[monitor]
resubscribe_on_reload = false

[monitor.reconnect]
mode = "backoff"
max_retries = 10
initial_delay_ms = 500
"#,
        )
        .unwrap();

        assert_eq!(file.facility, Facility::Local2);
        assert_eq!(file.severity, 7);
        assert_eq!(file.delivery_policy, DeliveryPolicy::Log);
        let remote = file.remote.unwrap();
        assert_eq!(remote.port, 1514);
        assert_eq!(remote.timeout_ms, 1000);
        assert!(!file.monitor.resubscribe_on_reload);
        let retry = file.monitor.reconnect.retry_policy().unwrap();
        assert_eq!(retry.max_retries, Some(10));
        assert_eq!(retry.initial_delay_ms, 500);
        assert_eq!(retry.max_delay_ms, 60_000);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "keywords = \"k.txt\"\n").unwrap();

        let file = FileConfig::load(Some(&path)).unwrap();
        assert_eq!(file.keywords, Some(PathBuf::from("k.txt")));
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileConfig::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, AppError::IoPath { .. }));
    }

    #[test]
    fn test_load_invalid_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "severity = \"loud\"\n").unwrap();

        let err = FileConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, AppError::ConfigFile { .. }));
    }

    #[test]
    fn test_flags_override_file() {
        let file = FileConfig::parse(
            r#"
keywords = "/from/file.txt"
facility = "local2"
severity = 7

[remote]
host = "siem.example.org"
port = 1514
"#,
        )
        .unwrap();
        let settings = Settings::resolve(
            file,
            &args(&["-k", "/from/flag.txt", "-f", "user", "-s", "3", "-P", "2514", "--fail-fast"]),
        )
        .unwrap();

        assert_eq!(settings.keywords, PathBuf::from("/from/flag.txt"));
        assert_eq!(settings.facility, Facility::User);
        assert_eq!(settings.severity, 3);
        let remote = settings.remote.unwrap();
        assert_eq!(remote.host, "siem.example.org");
        assert_eq!(remote.port, 2514);
        assert_eq!(settings.monitor.reconnect, ReconnectPolicy::FailFast);
    }

    #[test]
    fn test_cef_host_flag_uses_default_port() {
        let settings =
            Settings::resolve(FileConfig::default(), &args(&["-k", "k.txt", "-H", "10.0.0.5"]))
                .unwrap();
        let remote = settings.remote.unwrap();
        assert_eq!(remote.host, "10.0.0.5");
        assert_eq!(remote.port, DEFAULT_REMOTE_PORT);
    }

    #[test]
    fn test_missing_keywords_rejected() {
        let err = Settings::resolve(FileConfig::default(), &args(&[])).unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig(_)));
    }

    #[test]
    fn test_partial_credentials_rejected() {
        let err = pair_credentials(Some("watcher".into()), None).unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig(_)));

        let err = pair_credentials(None, Some("secret".into())).unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig(_)));
    }

    #[test]
    fn test_credentials_paired() {
        assert!(pair_credentials(None, None).unwrap().is_none());
        assert!(
            pair_credentials(Some("watcher".into()), Some("secret".into()))
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_invalid_file_severity_rejected() {
        let file = FileConfig {
            keywords: Some(PathBuf::from("k.txt")),
            severity: 42,
            ..FileConfig::default()
        };
        assert!(Settings::resolve(file, &args(&[])).is_err());
    }
}
