//! Logging for the Model Artifact Store
//!
//! Installs a `tracing` subscriber with an env filter, pretty or JSON
//! output, and optional daily-rolled log files.

use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use common::error::{Error, Result};
use store_config::{LogFormat, LoggingConfig};

/// File name prefix of rolled log files
pub const LOG_FILE_PREFIX: &str = "model-store.log";

/// Installs the global subscriber
///
/// The returned guard flushes buffered file output on drop and must be held
/// for as long as the process logs to a directory.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(&config.level)?;

    let (writer, guard) = match &config.directory {
        Some(directory) => {
            std::fs::create_dir_all(directory).map_err(|e| Error::fs(directory, e))?;
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(config.directory.is_none())
        .with_target(true);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|e| Error::Config(format!("Failed to install log subscriber: {}", e)))?;

    debug!("Logging initialized with level {:?}", config.level);

    Ok(guard)
}

/// Builds the filter, preferring `RUST_LOG` over the configured level
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| Error::Config(format!("Invalid log level {:?}: {}", level, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_accepts_directives() {
        assert!(build_filter("info").is_ok());
        assert!(build_filter("model_manager=debug,warn").is_ok());
    }
}
