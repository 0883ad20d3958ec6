use serde::Serialize;
use strum::{Display, IntoStaticStr};

/// Monitor lifecycle states.
///
/// `Starting -> Running -> Draining -> Terminated`, with `Running` able to
/// pass through `ReloadingConfig` or `Reconnecting` and come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Starting,
    Running,
    ReloadingConfig,
    Reconnecting,
    Draining,
    Terminated,
}

impl LifecycleState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Reconnecting)
                | (Starting, Draining)
                | (Running, ReloadingConfig)
                | (Running, Reconnecting)
                | (Running, Draining)
                | (ReloadingConfig, Running)
                | (ReloadingConfig, Reconnecting)
                | (ReloadingConfig, Draining)
                | (Reconnecting, Running)
                | (Reconnecting, Draining)
                | (Draining, Terminated)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == LifecycleState::Terminated
    }
}
