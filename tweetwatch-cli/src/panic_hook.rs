use std::any::Any;
use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::PanicHookInfo;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::logging::LOG_FILE_PREFIX;

/// Route panics through `tracing` before the default hook runs.
///
/// A detached monitor has its stderr pointed at `/dev/null`, so without this
/// a panic would leave no trace. In `panic = "abort"` builds the record is
/// also appended directly to today's log file, because the non-blocking log
/// writer gets no chance to flush.
pub fn install(log_dir: Option<&Path>) {
    let log_dir = log_dir.map(Path::to_path_buf);
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = describe(info);
            tracing::error!(target: "tweetwatch::panic", "{record}");

            if cfg!(panic = "abort")
                && let Some(dir) = &log_dir
            {
                let _ = append_to_log(dir, &record);
            }
        }));

        default_hook(info);
    }));
}

fn describe(info: &PanicHookInfo<'_>) -> String {
    let location = info
        .location()
        .map(|loc| format!("{}:{}", loc.file(), loc.line()))
        .unwrap_or_else(|| "<unknown>".to_string());
    let thread = std::thread::current();
    let thread = thread.name().unwrap_or("<unnamed>");

    format!(
        "{} PANIC thread={thread} location={location} payload={}\nBacktrace:\n{}",
        Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
        payload_text(info.payload()).unwrap_or_else(|| info.to_string()),
        Backtrace::capture(),
    )
}

fn payload_text(payload: &(dyn Any + Send)) -> Option<String> {
    payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
}

fn append_to_log(dir: &Path, record: &str) -> std::io::Result<()> {
    let path: PathBuf = dir.join(format!(
        "{LOG_FILE_PREFIX}.{}",
        Local::now().format("%Y-%m-%d")
    ));
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}
