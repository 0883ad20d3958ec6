use serde::Serialize;
use tracing::info;

/// Counters collected over one monitor run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Messages pulled from upstream.
    pub messages_seen: u64,
    /// Messages with at least one keyword hit.
    pub messages_matched: u64,
    /// Local alert lines written.
    pub alerts: u64,
    /// Remote datagrams sent.
    pub datagrams_sent: u64,
    /// Remote datagrams that could not be delivered.
    pub delivery_failures: u64,
    /// Successful reconnects after a connection loss or resubscribe.
    pub reconnects: u64,
    /// Successful keyword reloads.
    pub reloads: u64,
    /// Failed keyword reloads.
    pub failed_reloads: u64,
    /// Reloaded lists reverted because resubscribing with them failed.
    pub reverted_reloads: u64,
}

impl RunStats {
    pub fn log_summary(&self) {
        info!(
            messages_seen = self.messages_seen,
            messages_matched = self.messages_matched,
            alerts = self.alerts,
            datagrams_sent = self.datagrams_sent,
            delivery_failures = self.delivery_failures,
            reconnects = self.reconnects,
            reloads = self.reloads,
            failed_reloads = self.failed_reloads,
            reverted_reloads = self.reverted_reloads,
            "Monitor run summary"
        );
    }
}
