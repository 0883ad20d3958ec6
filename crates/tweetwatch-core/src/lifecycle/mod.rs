//! Monitor lifecycle: state machine, external control and run statistics.

pub mod control;
pub mod controller;
pub mod state;
pub mod stats;

pub use control::{LifecycleControl, PendingAction};
pub use controller::{LifecycleController, MonitorConfig};
pub use state::LifecycleState;
pub use stats::RunStats;
