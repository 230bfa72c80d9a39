//! Tracing subscriber setup for the binaries
//!
//! NIST 800-53: AU-9 (Protection of Audit Information), AU-12 (Audit Generation)

use crate::config::{LogFormat, LoggingConfig};
use crate::{Error, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber described by `config`
///
/// With `config.file` set, output goes to a daily-rolling file through a
/// non-blocking writer; the returned guard must be held until exit so that
/// buffered lines are flushed. Otherwise output goes to stderr.
///
/// # Errors
///
/// Returns [`Error::Config`] if the filter is invalid, the log directory
/// cannot be created, or a subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&config.level)
        .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", config.level, e)))?;

    let Some(log_file) = &config.file else {
        let result = match config.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_current_span(true)
                .with_writer(std::io::stderr)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init(),
        };
        result.map_err(|e| Error::Config(format!("Failed to install logger: {}", e)))?;
        return Ok(None);
    };

    let directory = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = log_file
        .file_name()
        .ok_or_else(|| Error::Config(format!("Log file has no file name: {:?}", log_file)))?;

    std::fs::create_dir_all(directory).map_err(|e| {
        Error::Config(format!("Failed to create log directory {:?}: {}", directory, e))
    })?;

    let appender = tracing_appender::rolling::daily(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_writer(writer)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(writer)
            .try_init(),
    };
    result.map_err(|e| Error::Config(format!("Failed to install logger: {}", e)))?;

    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        let config = LoggingConfig {
            level: "shareline=notalevel".to_string(),
            ..LoggingConfig::default()
        };
        assert!(matches!(init(&config), Err(Error::Config(_))));
    }
}
