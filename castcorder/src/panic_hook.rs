//! Panic reporting.
//!
//! Panics are logged through `tracing` and, in `panic = "abort"` builds,
//! appended straight to the current daily log file since the non-blocking
//! writer may not flush before the process aborts.

use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::PanicHookInfo;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::logging::LOG_FILE_PREFIX;

pub fn install(log_dir: impl AsRef<Path>) {
    let log_dir = log_dir.as_ref().to_path_buf();
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = render_panic(
                &payload_text(info),
                info.location().map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column())),
                std::thread::current().name(),
                Local::now(),
            );
            let record = format!("{record}\nBacktrace:\n{}", Backtrace::force_capture());

            tracing::error!(target: "castcorder::panic", "{record}");
            if cfg!(panic = "abort") {
                let _ = append_record(&daily_log_path(&log_dir, Local::now()), &record);
            }
        }));

        previous(info);
    }));
}

/// Path of the daily log file `tracing_appender::rolling::daily` writes for `now`.
pub fn daily_log_path(log_dir: &Path, now: DateTime<Local>) -> PathBuf {
    log_dir.join(format!("{LOG_FILE_PREFIX}.{}", now.format("%Y-%m-%d")))
}

fn append_record(path: &Path, record: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}

fn render_panic(
    payload: &str,
    location: Option<String>,
    thread: Option<&str>,
    now: DateTime<Local>,
) -> String {
    format!(
        "{} PANIC thread={} location={} payload={}",
        now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
        thread.unwrap_or("<unnamed>"),
        location.as_deref().unwrap_or("<unknown>"),
        payload
    )
}

fn payload_text(info: &PanicHookInfo<'_>) -> String {
    let payload = info.payload();
    payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| info.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn daily_path_matches_appender_naming() {
        let now = Local.with_ymd_and_hms(2025, 5, 4, 1, 2, 3).unwrap();
        assert_eq!(
            daily_log_path(Path::new("/logs"), now),
            PathBuf::from("/logs/castcorder.log.2025-05-04")
        );
    }

    #[test]
    fn render_includes_context() {
        let now = Local.with_ymd_and_hms(2025, 5, 4, 1, 2, 3).unwrap();
        let line = render_panic("boom", Some("src/x.rs:1:2".into()), None, now);
        assert!(line.contains("PANIC thread=<unnamed>"));
        assert!(line.contains("location=src/x.rs:1:2"));
        assert!(line.ends_with("payload=boom"));
    }

    #[test]
    fn append_creates_and_appends() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("castcorder.log.2025-05-04");
        append_record(&path, "one").unwrap();
        append_record(&path, "two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\ntwo\n");
    }
}
