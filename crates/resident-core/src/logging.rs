//! File-based tracing setup
//!
//! The terminal belongs to the interactive runner, so diagnostics go to a
//! daily rolling file instead of stderr.

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Environment variable holding the tracing filter directive.
pub const LOG_ENV_VAR: &str = "RESIDENT_LOG";

const DEFAULT_FILTER: &str = "flutter_resident=info,resident_app=info,resident_daemon=info,warn";
const LOG_FILE_NAME: &str = "resident.log";

/// Install the global subscriber.
///
/// Writes to `<data_local_dir>/flutter-resident/logs/resident.log`, rotated
/// daily. Verbosity comes from `RESIDENT_LOG`:
///
/// ```bash
/// RESIDENT_LOG=resident_daemon=trace resident run
/// ```
pub fn init() -> Result<PathBuf> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .try_init()
        .map_err(|e| Error::config(format!("tracing subscriber already set: {e}")))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %log_dir.display(),
        "resident runner starting"
    );

    Ok(log_dir)
}

/// Build the filter from `RESIDENT_LOG`, falling back to the default
/// directive when the variable is unset or unparsable.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Directory the rolling log files are written to.
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("flutter-resident")
        .join("logs")
}

/// Path prefix of today's log file (the appender adds a date suffix).
pub fn current_log_file() -> PathBuf {
    log_directory().join(LOG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_log_directory_layout() {
        let dir = log_directory();
        assert!(dir.ends_with("flutter-resident/logs"));
        assert_eq!(current_log_file().parent(), Some(dir.as_path()));
    }

    #[test]
    #[serial]
    fn test_env_filter_default_when_unset() {
        std::env::remove_var(LOG_ENV_VAR);
        let filter = env_filter().to_string();
        assert!(filter.contains("resident_daemon=info"));
    }

    #[test]
    #[serial]
    fn test_env_filter_reads_variable() {
        std::env::set_var(LOG_ENV_VAR, "resident_app=trace");
        let filter = env_filter().to_string();
        std::env::remove_var(LOG_ENV_VAR);
        assert!(filter.contains("resident_app=trace"));
    }
}
