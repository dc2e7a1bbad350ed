//! Console logging: a compact stderr layer plus daily JSONL files under the
//! state directory, and the `surveyor.obs` structured event stream.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const FILE_PREFIX: &str = "surveyor-console.";
const FILE_SUFFIX: &str = ".jsonl";

/// Keeps the file writer flushing; drop it only at process exit.
pub struct LoggingHandle {
    _guard: WorkerGuard,
    pub summary: LoggingSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggingSummary {
    pub logs_dir: PathBuf,
    pub retention_days: u64,
    pub pruned_files: usize,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ObservabilityEvent<'a> {
    pub event: &'a str,
    pub component: &'a str,
    pub correlation_id: Option<&'a str>,
    pub channel: Option<&'a str>,
    pub mode: Option<&'a str>,
    pub status: Option<&'a str>,
    pub error_code: Option<&'a str>,
    pub detail: Option<&'a str>,
}

/// Shows only enough of a credential to tell two apart in a log line.
pub fn mask_secret(secret: Option<&str>) -> String {
    match secret.map(str::trim) {
        None | Some("") => "unset".to_string(),
        Some(value) if value.chars().count() <= 8 => format!("****({})", value.len()),
        Some(value) => {
            let head: String = value.chars().take(4).collect();
            format!("{head}****({})", value.len())
        }
    }
}

macro_rules! obs_event {
    ($macro:ident, $event:expr) => {
        tracing::$macro!(
            target: "surveyor.obs",
            component = $event.component,
            event = $event.event,
            correlation_id = $event.correlation_id.unwrap_or(""),
            channel = $event.channel.unwrap_or(""),
            mode = $event.mode.unwrap_or(""),
            status = $event.status.unwrap_or(""),
            error_code = $event.error_code.unwrap_or(""),
            detail = $event.detail.unwrap_or(""),
            "observability_event"
        )
    };
}

pub fn emit_event(level: Level, event: ObservabilityEvent<'_>) {
    match level {
        Level::ERROR => obs_event!(error, event),
        Level::WARN => obs_event!(warn, event),
        Level::DEBUG | Level::TRACE => obs_event!(debug, event),
        _ => obs_event!(info, event),
    }
}

pub fn logs_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("logs")
}

/// Installs the global subscriber. A subscriber that is already installed
/// (tests, embedding) is left in place.
pub fn init_logging(state_dir: &Path, retention_days: u64) -> anyhow::Result<LoggingHandle> {
    let dir = logs_dir(state_dir);
    fs::create_dir_all(&dir)?;
    let pruned_files = prune_expired(&dir, retention_days, Utc::now().date_naive())?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix(FILE_PREFIX.trim_end_matches('.'))
        .filename_suffix(FILE_SUFFIX.trim_start_matches('.'))
        .build(&dir)?;
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(writer)
        .with_ansi(false)
        .with_current_span(false)
        .with_span_list(false);
    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(true);
    let filter = EnvFilter::try_from_env("SURVEYOR_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    Ok(LoggingHandle {
        _guard: guard,
        summary: LoggingSummary {
            logs_dir: dir,
            retention_days,
            pruned_files,
            started_at: Utc::now(),
        },
    })
}

/// `surveyor-console.2026-01-31.jsonl` -> 2026-01-31
fn log_file_date(name: &str) -> Option<NaiveDate> {
    let date = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn prune_expired(dir: &Path, retention_days: u64, today: NaiveDate) -> anyhow::Result<usize> {
    let cutoff = today - chrono::Duration::days(retention_days.min(i64::MAX as u64) as i64);
    let mut pruned = 0;
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let expired = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(log_file_date)
            .is_some_and(|date| date < cutoff);
        if expired && path.is_file() && fs::remove_file(&path).is_ok() {
            pruned += 1;
        }
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_tokens_keep_a_short_prefix() {
        assert_eq!(mask_secret(None), "unset");
        assert_eq!(mask_secret(Some("  ")), "unset");
        assert_eq!(mask_secret(Some("abc")), "****(3)");
        let masked = mask_secret(Some("rig-bearer-0042"));
        assert_eq!(masked, "rig-****(15)");
        assert!(!masked.contains("0042"));
    }

    #[test]
    fn only_dated_console_files_are_recognised() {
        assert_eq!(
            log_file_date("surveyor-console.2026-01-31.jsonl"),
            NaiveDate::from_ymd_opt(2026, 1, 31)
        );
        assert_eq!(log_file_date("surveyor-console.latest.jsonl"), None);
        assert_eq!(log_file_date("other.2026-01-31.jsonl"), None);
    }

    #[test]
    fn pruning_keeps_files_inside_the_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        let today = NaiveDate::from_ymd_opt(2026, 3, 15).expect("date");
        let old = dir.path().join("surveyor-console.2026-02-01.jsonl");
        let recent = dir.path().join("surveyor-console.2026-03-10.jsonl");
        let foreign = dir.path().join("notes.2001-01-01.jsonl");
        for path in [&old, &recent, &foreign] {
            fs::write(path, "{}").expect("write");
        }

        let pruned = prune_expired(dir.path(), 14, today).expect("prune");

        assert_eq!(pruned, 1);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(foreign.exists());
    }

    #[test]
    fn logs_live_under_the_state_dir() {
        assert_eq!(
            logs_dir(Path::new("/var/lib/surveyor")),
            PathBuf::from("/var/lib/surveyor/logs")
        );
    }
}
