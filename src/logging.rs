use crate::cli::AppError;
use crate::context::LOG_FILE_NAME;
use std::env;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber: compact records on stdout and a plain
/// copy appended to `logs/organizer.log`.
///
/// The level comes from `RUST_LOG` and defaults to `info`. Keep the returned
/// guard alive until exit or buffered file records are lost.
pub fn init_logger(log_dir: &Path) -> Result<WorkerGuard, AppError> {
    fs::create_dir_all(log_dir).map_err(|e| AppError::Logging {
        path: log_dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_layer = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .compact()
                .with_target(false)
                .with_ansi(true),
        )
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_target(false)
                .with_ansi(false),
        )
        .with(filter_layer)
        .try_init()
        .map_err(|e| AppError::Logging {
            path: log_dir.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(guard)
}
