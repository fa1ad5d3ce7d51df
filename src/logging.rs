// ABOUTME: Logging bootstrap: stdout plus two append-only log files.
// ABOUTME: The activity and error files are the ones the /logs command tails.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Full-activity log file name.
pub const ACTIVITY_LOG: &str = "courier.log";
/// Warnings-and-errors log file name.
pub const ERROR_LOG: &str = "courier.err.log";

/// Keep these alive for the lifetime of the process; dropping them stops
/// the non-blocking writers from flushing.
pub struct LogGuards {
    _activity: WorkerGuard,
    _errors: WorkerGuard,
}

/// The two log files under `log_dir`, in the order `/logs` shows them.
pub fn log_files(log_dir: &Path) -> Vec<PathBuf> {
    vec![log_dir.join(ACTIVITY_LOG), log_dir.join(ERROR_LOG)]
}

/// Install the global subscriber: env-filtered stdout, a full activity file,
/// and a warn+ error file.
pub fn init(log_dir: &Path) -> Result<LogGuards> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed creating {}", log_dir.display()))?;

    let activity_file = tracing_appender::rolling::never(log_dir, ACTIVITY_LOG);
    let (activity_writer, activity_guard) = tracing_appender::non_blocking(activity_file);

    let error_file = tracing_appender::rolling::never(log_dir, ERROR_LOG);
    let (error_writer, error_guard) = tracing_appender::non_blocking(error_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(activity_writer)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(error_writer)
                .with_ansi(false)
                .with_filter(LevelFilter::WARN),
        )
        .init();

    Ok(LogGuards {
        _activity: activity_guard,
        _errors: error_guard,
    })
}

// =============================================================================
// Tests
// =============================================================================
