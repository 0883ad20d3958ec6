//! Monitor loop: pulls messages from upstream and drives each one through
//! matching, formatting and delivery.
//!
//! Reload and terminate requests are only acted on at the loop checkpoint,
//! between two messages. A message that has been pulled is always fully
//! evaluated and dispatched before the next request is looked at.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::alert::AlertFormatter;
use crate::error::{Result, WatchError};
use crate::keywords::{KeywordSet, KeywordStore};
use crate::matcher;
use crate::message::{AlertEvent, InboundMessage};
use crate::retry::ReconnectPolicy;
use crate::sink::{AlertSink, DeliveryPolicy};
use crate::stream::{StreamConnection, StreamProvider};

use super::control::{LifecycleControl, PendingAction};
use super::state::LifecycleState;
use super::stats::RunStats;

/// Monitor loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Reaction to a lost upstream connection.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    /// Reconnect with the new filter when a reload changes it.
    #[serde(default = "default_true")]
    pub resubscribe_on_reload: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            resubscribe_on_reload: default_true(),
        }
    }
}

/// Result of a loop checkpoint.
#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    Stop,
}

/// Drives one monitor run from startup to termination.
pub struct LifecycleController {
    store: Arc<KeywordStore>,
    /// List the live connection was opened with.
    subscribed: Arc<KeywordSet>,
    provider: Arc<dyn StreamProvider>,
    formatter: AlertFormatter,
    sink: AlertSink,
    config: MonitorConfig,
    control: LifecycleControl,
    state: LifecycleState,
    stats: RunStats,
}

impl LifecycleController {
    pub fn new(
        store: Arc<KeywordStore>,
        provider: Arc<dyn StreamProvider>,
        formatter: AlertFormatter,
        sink: AlertSink,
        config: MonitorConfig,
    ) -> Self {
        Self {
            subscribed: store.snapshot(),
            store,
            provider,
            formatter,
            sink,
            config,
            control: LifecycleControl::new(),
            state: LifecycleState::Starting,
            stats: RunStats::default(),
        }
    }

    /// Use an existing control handle, e.g. one already wired to signals.
    pub fn with_control(mut self, control: LifecycleControl) -> Self {
        self.control = control;
        self
    }

    /// Handle for requesting reloads and termination from other tasks.
    pub fn control(&self) -> LifecycleControl {
        self.control.clone()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Run until terminated or a fatal error occurs.
    ///
    /// Statistics are logged on every exit path.
    pub async fn run(mut self) -> Result<RunStats> {
        let outcome = self.drive().await;

        self.transition(LifecycleState::Draining);
        self.stats.log_summary();
        self.transition(LifecycleState::Terminated);

        outcome.map(|()| self.stats)
    }

    async fn drive(&mut self) -> Result<()> {
        info!(
            provider = self.provider.name(),
            keywords = self.store.len(),
            source = %self.store.source().display(),
            "Starting monitor"
        );

        let mut conn = match self.connect().await {
            Ok(Some(conn)) => conn,
            Ok(None) => return Ok(()),
            Err(e) => {
                error!(error = %e, "Failed to open upstream stream");
                return Err(e);
            }
        };
        info!(connection = %conn.id, filter = %conn.filter, "Monitor running");
        self.transition(LifecycleState::Running);

        loop {
            if self.checkpoint(&mut conn).await? == Flow::Stop {
                return Ok(());
            }

            let next = tokio::select! {
                biased;

                // A request wakes an idle wait; it is applied at the checkpoint.
                _ = self.control.notified() => continue,

                next = conn.next_message() => next,
            };

            let lost = match next {
                Ok(Some(message)) => {
                    self.process(&message).await?;
                    continue;
                }
                Ok(None) => WatchError::connection("upstream ended the stream"),
                Err(e) => e,
            };

            match self.recover(lost).await? {
                Some(replacement) => conn = replacement,
                None => return Ok(()),
            }
        }
    }

    /// Apply a pending request and resubscribe if the filter changed.
    ///
    /// A failed resubscribe never stops the monitor: the previous list is
    /// restored and the existing connection is kept.
    async fn checkpoint(&mut self, conn: &mut StreamConnection) -> Result<Flow> {
        if self.apply_pending() {
            return Ok(Flow::Stop);
        }

        if !self.config.resubscribe_on_reload || self.store.snapshot().filter() == conn.filter {
            return Ok(Flow::Continue);
        }

        let current = self.store.subscription_filter();
        info!(old = %conn.filter, new = %current, "Keyword filter changed, resubscribing");
        match self.connect().await {
            Ok(Some(replacement)) => {
                self.stats.reconnects += 1;
                debug!(old = %conn.id, new = %replacement.id, "Replaced upstream connection");
                *conn = replacement;
                Ok(Flow::Continue)
            }
            Ok(None) => Ok(Flow::Stop),
            Err(e) => {
                self.stats.reverted_reloads += 1;
                warn!(
                    error = %e,
                    rejected = %current,
                    filter = %conn.filter,
                    "Resubscribe failed, restoring previous keywords"
                );
                self.store.restore(Arc::clone(&self.subscribed));
                Ok(Flow::Continue)
            }
        }
    }

    /// Take the pending request, if any. Returns `true` on terminate.
    fn apply_pending(&mut self) -> bool {
        match self.control.take() {
            Some(PendingAction::Terminate) => {
                info!(state = %self.state, "Terminate requested");
                true
            }
            Some(PendingAction::Reload) => {
                self.reload_keywords();
                false
            }
            None => false,
        }
    }

    fn reload_keywords(&mut self) {
        let resume = self.state;
        if resume == LifecycleState::Running {
            self.transition(LifecycleState::ReloadingConfig);
        }

        match self.store.reload() {
            Ok(count) => {
                self.stats.reloads += 1;
                debug!(count, "Keyword reload applied");
            }
            Err(e) => {
                self.stats.failed_reloads += 1;
                warn!(
                    error = %e,
                    keywords = self.store.len(),
                    "Keyword reload failed, keeping previous list"
                );
            }
        }

        if resume == LifecycleState::Running {
            self.transition(LifecycleState::Running);
        }
    }

    /// Connect with the current filter.
    ///
    /// Reloads requested while waiting are applied; a terminate request
    /// abandons the attempt and yields `Ok(None)`.
    async fn connect(&mut self) -> Result<Option<StreamConnection>> {
        let provider = Arc::clone(&self.provider);
        let keywords = self.store.snapshot();
        let filter = keywords.filter().to_string();
        let mut connect = provider.connect(&filter);

        loop {
            tokio::select! {
                biased;

                _ = self.control.notified() => {
                    if self.apply_pending() {
                        return Ok(None);
                    }
                }

                result = &mut connect => {
                    let conn = result?;
                    self.subscribed = Arc::clone(&keywords);
                    return Ok(Some(conn));
                }
            }
        }
    }

    /// Handle a lost connection according to the reconnect policy.
    ///
    /// Returns the replacement connection, or `Ok(None)` if terminate was
    /// requested while reconnecting.
    async fn recover(&mut self, err: WatchError) -> Result<Option<StreamConnection>> {
        if !err.is_recoverable() {
            error!(error = %err, "Unrecoverable upstream error");
            return Err(err);
        }
        let Some(policy) = self.config.reconnect.retry_policy().cloned() else {
            error!(error = %err, "Upstream connection lost");
            return Err(err);
        };

        warn!(error = %err, "Upstream connection lost, reconnecting");
        self.transition(LifecycleState::Reconnecting);

        let mut attempt = 0;
        let mut last_error = err;
        loop {
            if !policy.should_retry(attempt) {
                error!(attempts = attempt, error = %last_error, "Giving up on upstream");
                return Err(WatchError::connection(format!(
                    "gave up after {attempt} reconnect attempts: {last_error}"
                )));
            }

            let delay = policy.delay_for_attempt(attempt);
            attempt += 1;
            info!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            if self.sleep_unless_terminated(delay).await {
                return Ok(None);
            }

            match self.connect().await {
                Ok(Some(conn)) => {
                    self.stats.reconnects += 1;
                    info!(attempt, connection = %conn.id, filter = %conn.filter, "Reconnected");
                    self.transition(LifecycleState::Running);
                    return Ok(Some(conn));
                }
                Ok(None) => return Ok(None),
                Err(e) if e.is_recoverable() => {
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                    last_error = e;
                }
                Err(e) => {
                    error!(attempt, error = %e, "Upstream rejected the subscription");
                    return Err(e);
                }
            }
        }
    }

    /// Sleep for `delay`. Returns `true` if terminate was requested meanwhile.
    async fn sleep_unless_terminated(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;

                _ = self.control.notified() => {
                    if self.apply_pending() {
                        return true;
                    }
                }

                _ = &mut sleep => return false,
            }
        }
    }

    /// Evaluate one message and dispatch its alert, if any.
    async fn process(&mut self, message: &InboundMessage) -> Result<()> {
        self.stats.messages_seen += 1;

        let keywords = self.store.snapshot();
        let result = matcher::evaluate(message, &keywords);
        let Some(event) = AlertEvent::new(message, &result) else {
            return Ok(());
        };
        self.stats.messages_matched += 1;
        debug!(author = %message.author, hits = result.len(), "Keyword match");

        let line = self.formatter.human_line(&event);
        match self.sink.emit_local(&line) {
            Ok(()) => self.stats.alerts += 1,
            Err(e) => warn!(error = %e, "Failed to write local alert"),
        }

        if self.sink.remote().is_none() {
            return Ok(());
        }
        let payload = self.formatter.security_event(&event);
        match self.sink.emit_remote(&payload).await {
            Ok(()) => self.stats.datagrams_sent += 1,
            Err(e) => {
                self.stats.delivery_failures += 1;
                match self.sink.delivery_policy() {
                    DeliveryPolicy::Fatal => {
                        error!(error = %e, "Alert delivery failed");
                        return Err(e);
                    }
                    DeliveryPolicy::Log => {
                        warn!(error = %e, "Alert delivery failed, continuing");
                    }
                }
            }
        }
        Ok(())
    }

    fn transition(&mut self, next: LifecycleState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Unexpected lifecycle transition");
        }
        debug!(from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
    }
}
