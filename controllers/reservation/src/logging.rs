//! Tracing subscriber setup
//!
//! `RUST_LOG` wins over the configured level. With `logging.file` set, output
//! goes to a daily rolling file instead of stdout.

use crate::config::LoggingConfig;
use crate::error::ControllerError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Initialize the global tracing subscriber.
///
/// The returned guard flushes the file writer on drop and must be held
/// until the process exits.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>, ControllerError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| {
            ControllerError::InvalidConfig(format!("invalid logging.level '{}': {}", config.level, e))
        })?;

    match &config.file {
        Some(path) => {
            let directory = path.parent().filter(|p| !p.as_os_str().is_empty());
            let file_name = path.file_name().ok_or_else(|| {
                ControllerError::InvalidConfig(format!("logging.file has no file name: {}", path.display()))
            })?;
            let appender = tracing_appender::rolling::daily(
                directory.unwrap_or_else(|| std::path::Path::new(".")),
                file_name,
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_target(false))
                .init();
            Ok(None)
        }
    }
}
