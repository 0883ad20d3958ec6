use std::path::PathBuf;

use thiserror::Error;
use tweetwatch_core::WatchError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error during {op} at {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Another instance is running: {} exists (pid {pid})", path.display())]
    InstanceConflict { path: PathBuf, pid: String },

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl AppError {
    pub fn io_path(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
