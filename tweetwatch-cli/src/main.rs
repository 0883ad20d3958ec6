mod cli;
mod config;
mod daemon;
mod error;
mod logging;
mod panic_hook;
mod pidfile;
mod signals;

use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tweetwatch_core::{
    AlertFormatter, AlertSink, KeywordStore, LifecycleController, LocalChannel,
    TwitterStreamProvider,
};

use crate::cli::Args;
use crate::config::{FileConfig, Settings};
use crate::error::Result;
use crate::pidfile::PidFile;

/// Product name reported in CEF events.
const PRODUCT: &str = "tweetwatch";

fn main() {
    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let file = FileConfig::load(args.config.as_deref())?;
    let mut settings = Settings::resolve(file, &args)?;

    if args.check {
        return check(&settings);
    }

    // Everything that can fail on bad input is validated while the terminal
    // is still attached.
    settings.absolutize_paths()?;
    let credentials = settings.require_credentials()?;
    let store = KeywordStore::open(&settings.keywords)?;
    pidfile::ensure_absent(&settings.pid_file)?;

    if !settings.debug {
        daemon::detach()?;
    }

    // a detached monitor has no stderr left, diagnostics go to syslog
    let log_facility = (!settings.debug).then_some(settings.facility);
    let _guard = logging::init_logging(
        args.verbose,
        args.quiet,
        settings.log_dir.as_deref(),
        log_facility,
    )?;
    panic_hook::install(settings.log_dir.as_deref());

    let pid_file = PidFile::create(&settings.pid_file)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        pid_file = %pid_file.path().display(),
        keywords = store.len(),
        filter = %store.subscription_filter(),
        "tweetwatch starting"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let provider = TwitterStreamProvider::new(credentials, settings.endpoint.clone())?;
    runtime.block_on(monitor(settings, store, provider))?;

    pid_file.release();
    Ok(())
}

/// Validate the keyword file and print the resulting subscription filter.
fn check(settings: &Settings) -> Result<()> {
    let store = KeywordStore::open(&settings.keywords)?;
    println!("{}: {} keywords", settings.keywords.display(), store.len());
    println!("track={}", store.subscription_filter());
    Ok(())
}

async fn monitor(
    settings: Settings,
    store: KeywordStore,
    provider: TwitterStreamProvider,
) -> Result<()> {
    let local = if settings.debug {
        LocalChannel::stderr()
    } else {
        LocalChannel::Syslog(settings.facility)
    };
    let mut sink = AlertSink::new(local).with_delivery_policy(settings.delivery_policy);
    if let Some(remote) = settings.remote {
        info!(host = %remote.host, port = remote.port, "Sending CEF events to remote receiver");
        sink = sink.with_remote(remote);
    }

    let controller = LifecycleController::new(
        Arc::new(store),
        Arc::new(provider),
        AlertFormatter::new(PRODUCT, env!("CARGO_PKG_VERSION"), settings.severity),
        sink,
        settings.monitor,
    );
    signals::install(controller.control())?;

    let stats = controller.run().await?;
    info!(
        messages = stats.messages_seen,
        alerts = stats.alerts,
        "tweetwatch stopped"
    );
    Ok(())
}
