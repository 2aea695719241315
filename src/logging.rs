use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

const LOG_PREFIX: &str = "kubeboard";

/// Routes `tracing` output to a daily log file; the terminal belongs to the UI.
/// Keep the returned guard alive until exit so buffered lines are flushed.
pub fn init_tracing(level_filter: &str, dir: &Path, max_files: usize) -> Result<WorkerGuard> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .max_log_files(max_files.max(1))
        .build(dir)
        .with_context(|| format!("failed to open log file in {}", dir.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = build_filter(level_filter)?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .compact()
        .with_writer(writer)
        .try_init();

    Ok(guard)
}

fn build_filter(level_filter: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")
}

#[cfg(test)]
mod tests {
    use super::{build_filter, init_tracing};

    #[test]
    fn invalid_filter_falls_back_to_info() {
        let filter = build_filter("not==valid[").expect("fallback filter");
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn log_directory_is_created() {
        let root = tempfile::tempdir().expect("temp dir");
        let dir = root.path().join("nested").join("logs");

        let guard = init_tracing("debug", &dir, 2).expect("tracing");
        tracing::info!("log directory test");
        drop(guard);

        assert!(dir.is_dir());
    }
}
