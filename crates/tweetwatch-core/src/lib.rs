//! Keyword watch pipeline for a live tweet stream.
//!
//! Messages are pulled from an upstream filter stream one at a time, matched
//! case-insensitively against an ordered keyword list, and every match is
//! reported as a human-readable log line and optionally as a CEF event sent
//! to a remote syslog receiver over UDP.
//!
//! The keyword list can be reloaded while running; the
//! [`LifecycleController`] applies reload and terminate requests between
//! messages only.

pub mod alert;
pub mod error;
pub mod keywords;
pub mod lifecycle;
pub mod matcher;
pub mod message;
pub mod retry;
pub mod sink;
pub mod stream;

pub use alert::AlertFormatter;
pub use error::{Result, WatchError};
pub use keywords::{Keyword, KeywordSet, KeywordStore, MAX_FILTER_BYTES};
pub use lifecycle::{
    LifecycleControl, LifecycleController, LifecycleState, MonitorConfig, PendingAction, RunStats,
};
pub use message::{AlertEvent, InboundMessage, KeywordHit, MatchResult};
pub use retry::{ReconnectPolicy, RetryPolicy};
pub use sink::{AlertSink, DeliveryPolicy, Facility, LocalChannel, RemoteReceiver, SyslogLevel};
pub use stream::{Credentials, StreamConnection, StreamProvider, TwitterStreamProvider};
