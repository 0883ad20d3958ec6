//! Diagnostic logging setup.
//!
//! In the foreground, events go to stderr with local time stamps. A detached
//! monitor has no stderr, so its events go to the system logger instead. When
//! a log directory is configured, the same events are also written to a daily
//! rotated file through a non-blocking writer.

use std::io::Write;
use std::path::Path;

use chrono::Local;
use tracing::{Level, Metadata};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, MakeWriter, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use tweetwatch_core::{Facility, SyslogLevel, sink::write_syslog};

use crate::error::{AppError, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "tweetwatch=info,tweetwatch_core=info";

const VERBOSE_LOG_FILTER: &str = "tweetwatch=debug,tweetwatch_core=debug";

/// Log file name prefix; files are suffixed with the date.
pub const LOG_FILE_PREFIX: &str = "tweetwatch.log";

/// Timer that formats timestamps in the local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Hands out one [`SyslogLine`] per event.
#[derive(Debug, Clone, Copy)]
struct SyslogWriter {
    facility: Facility,
}

impl<'a> MakeWriter<'a> for SyslogWriter {
    type Writer = SyslogLine;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogLine::new(self.facility, SyslogLevel::Info)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        SyslogLine::new(self.facility, syslog_level(meta.level()))
    }
}

fn syslog_level(level: &Level) -> SyslogLevel {
    match *level {
        Level::ERROR => SyslogLevel::Err,
        Level::WARN => SyslogLevel::Warning,
        Level::INFO => SyslogLevel::Info,
        Level::DEBUG | Level::TRACE => SyslogLevel::Debug,
    }
}

/// Buffers one formatted event and sends it as a single syslog record when
/// dropped.
struct SyslogLine {
    facility: Facility,
    level: SyslogLevel,
    buf: Vec<u8>,
}

impl SyslogLine {
    fn new(facility: Facility, level: SyslogLevel) -> Self {
        Self {
            facility,
            level,
            buf: Vec::new(),
        }
    }

    fn record(&self) -> Option<String> {
        let text = String::from_utf8_lossy(&self.buf);
        let text = text.trim_end();
        (!text.is_empty()).then(|| text.to_string())
    }
}

impl Write for SyslogLine {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogLine {
    fn drop(&mut self) {
        if let Some(record) = self.record() {
            let _ = write_syslog(self.facility, self.level, &record);
        }
    }
}

fn build_filter(verbose: bool, quiet: bool) -> EnvFilter {
    if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

/// Install the global subscriber.
///
/// With `syslog` set, events go to the system logger under that facility
/// instead of stderr. Returns the file writer guard when file logging is
/// enabled; keep it alive for the lifetime of the process so buffered lines
/// get flushed.
pub fn init_logging(
    verbose: bool,
    quiet: bool,
    log_dir: Option<&Path>,
    syslog: Option<Facility>,
) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| AppError::io_path("creating log directory", dir, e))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_timer(LocalTimer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // syslog stamps records itself
    let (console_layer, syslog_layer) = match syslog {
        Some(facility) => (
            None,
            Some(
                fmt::layer()
                    .with_writer(SyslogWriter { facility })
                    .with_ansi(false)
                    .without_time()
                    .with_level(false)
                    .with_target(verbose),
            ),
        ),
        None => (
            Some(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_timer(LocalTimer)
                    .with_target(verbose),
            ),
            None,
        ),
    };

    tracing_subscriber::registry()
        .with(build_filter(verbose, quiet))
        .with(console_layer)
        .with(syslog_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::Logging(format!("failed to set global subscriber: {e}")))?;

    Ok(guard)
}
