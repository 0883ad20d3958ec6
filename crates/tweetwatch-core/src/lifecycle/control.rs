//! Pending-action handle shared between signal producers and the monitor loop.
//!
//! Producers only record what was asked for and wake the loop; the loop takes
//! the pending action at its next checkpoint. Repeated requests coalesce, and
//! a terminate request always wins over a reload.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::Notify;

const NONE: u8 = 0;
const RELOAD: u8 = 1;
const TERMINATE: u8 = 2;

/// Action requested from outside the monitor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    Reload,
    Terminate,
}

#[derive(Debug, Default)]
struct ControlInner {
    pending: AtomicU8,
    wake: Notify,
}

/// Cloneable handle for requesting reloads and termination.
#[derive(Debug, Clone, Default)]
pub struct LifecycleControl {
    inner: Arc<ControlInner>,
}

impl LifecycleControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the monitor to reload its keyword list.
    pub fn request_reload(&self) {
        self.request(RELOAD);
    }

    /// Ask the monitor to stop after the message in progress.
    pub fn request_terminate(&self) {
        self.request(TERMINATE);
    }

    fn request(&self, action: u8) {
        self.inner.pending.fetch_max(action, Ordering::AcqRel);
        self.inner.wake.notify_one();
    }

    /// Look at the pending action without clearing it.
    pub fn peek(&self) -> Option<PendingAction> {
        decode(self.inner.pending.load(Ordering::Acquire))
    }

    /// Take and clear the pending action.
    pub fn take(&self) -> Option<PendingAction> {
        decode(self.inner.pending.swap(NONE, Ordering::AcqRel))
    }

    /// Wait until a request is made.
    ///
    /// A request made while nobody was waiting is remembered, so this can
    /// return with nothing pending if that request was already taken.
    pub async fn notified(&self) {
        self.inner.wake.notified().await;
    }
}

fn decode(raw: u8) -> Option<PendingAction> {
    match raw {
        RELOAD => Some(PendingAction::Reload),
        TERMINATE => Some(PendingAction::Terminate),
        _ => None,
    }
}
