//! Logging setup
//!
//! Logs go to stderr (stdout carries node events) and, when a directory is
//! configured, to a daily rolling file as well. `RUST_LOG` overrides the
//! configured filter.

use crate::config::LoggingConfig;
use crate::error::{BridgeError, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the file writer flushing; drop it at shutdown
#[must_use = "dropping the guard stops the log file writer"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Filter from `RUST_LOG`, else from the config
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|e| {
            eprintln!("Invalid log filter '{}': {}", config.filter, e);
            EnvFilter::new(crate::config::DEFAULT_LOG_FILTER)
        })
}

/// Install the global subscriber
pub fn init(config: &LoggingConfig) -> Result<LogGuard> {
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory).map_err(|e| {
                BridgeError::Config(format!(
                    "Failed to create log directory {}: {}",
                    directory.display(),
                    e
                ))
            })?;
            let appender = tracing_appender::rolling::daily(directory, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_filter(config))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| BridgeError::Config(format!("Failed to install logger: {}", e)))?;

    Ok(LogGuard { _file: guard })
}
