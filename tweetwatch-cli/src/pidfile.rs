//! Single-instance marker file.
//!
//! A marker that exists and can be read means another instance is running.
//! There is no staleness check: a marker left behind by a crashed instance
//! has to be removed by hand.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{AppError, Result};

/// Fail if a readable marker already exists at `path`.
pub fn ensure_absent(path: &Path) -> Result<()> {
    match std::fs::read_to_string(path) {
        Ok(content) => Err(AppError::InstanceConflict {
            path: path.to_path_buf(),
            pid: content.trim().to_string(),
        }),
        Err(_) => Ok(()),
    }
}

/// Marker owned by this process.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current process id to `path`.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        ensure_absent(&path)?;

        let pid = std::process::id();
        let mut file = std::fs::File::create(&path)
            .map_err(|e| AppError::io_path("creating pid file", &path, e))?;
        writeln!(file, "{pid}").map_err(|e| AppError::io_path("writing pid file", &path, e))?;

        debug!(path = %path.display(), pid, "Wrote pid file");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker. Only called on a clean shutdown.
    pub fn release(self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed pid file"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove pid file"),
        }
    }
}
