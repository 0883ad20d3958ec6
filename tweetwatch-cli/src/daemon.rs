//! Detaching from the controlling terminal.
//!
//! Must run before the async runtime or any logging worker thread is
//! started: only the calling thread survives `fork`.

use crate::error::{AppError, Result};

/// Fork into the background, start a new session and point the standard
/// streams at `/dev/null`. The parent exits with status 0.
#[cfg(unix)]
pub fn detach() -> Result<()> {
    use std::io;

    // SAFETY: no other threads exist yet, so the child inherits a consistent
    // process image. `_exit` skips destructors the parent must not run.
    unsafe {
        match libc::fork() {
            -1 => return Err(AppError::Io(io::Error::last_os_error())),
            0 => {}
            _ => libc::_exit(0),
        }

        if libc::setsid() == -1 {
            return Err(AppError::Io(io::Error::last_os_error()));
        }

        let null = libc::open(c"/dev/null".as_ptr(), libc::O_RDWR);
        if null == -1 {
            return Err(AppError::Io(io::Error::last_os_error()));
        }
        for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            libc::dup2(null, fd);
        }
        if null > libc::STDERR_FILENO {
            libc::close(null);
        }
    }

    std::env::set_current_dir("/")?;
    Ok(())
}

#[cfg(not(unix))]
pub fn detach() -> Result<()> {
    Err(AppError::invalid_config(
        "running in the background is only supported on unix, use --debug",
    ))
}
