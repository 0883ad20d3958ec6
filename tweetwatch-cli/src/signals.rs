//! Process signals as lifecycle requests.
//!
//! SIGHUP asks for a keyword reload, SIGTERM and SIGINT ask for termination.
//! Handlers only record the request; the monitor applies it between messages.

use tracing::info;
use tweetwatch_core::LifecycleControl;

use crate::error::Result;

/// Start forwarding signals to `control`. Must be called inside the runtime.
#[cfg(unix)]
pub fn install(control: LifecycleControl) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(()) = hangup.recv() => {
                    info!("SIGHUP received, reloading keywords");
                    control.request_reload();
                }
                Some(()) = terminate.recv() => {
                    info!("SIGTERM received, shutting down");
                    control.request_terminate();
                }
                Some(()) = interrupt.recv() => {
                    info!("SIGINT received, shutting down");
                    control.request_terminate();
                }
                else => break,
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn install(control: LifecycleControl) -> Result<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, shutting down");
            control.request_terminate();
        }
    });
    Ok(())
}
