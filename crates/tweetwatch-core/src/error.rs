//! Watch pipeline error types.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors that can occur while watching the stream.
#[derive(Error, Debug)]
pub enum WatchError {
    /// Keyword source unreadable, or the keyword list violates a load invariant.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream rejected the credentials.
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Upstream rejected the subscription filter.
    #[error("Subscription rejected: {0}")]
    Subscribe(String),

    /// Upstream dropped the connection or the stream ended.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Remote alert datagram could not be delivered.
    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("IO error during {op} at {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl WatchError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    pub fn subscribe(msg: impl Into<String>) -> Self {
        Self::Subscribe(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn io_path(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.into(),
            source,
        }
    }

    /// Whether a reconnect can plausibly clear this error.
    ///
    /// Rejected credentials and rejected filters stay rejected, so only
    /// transport-level failures qualify.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Io(_) => true,
            Self::Http(e) => !e.is_builder(),
            _ => false,
        }
    }
}
