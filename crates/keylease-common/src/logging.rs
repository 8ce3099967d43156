//! Logging initialization
//!
//! Sets up a `tracing` registry with up to three layers:
//!
//! | Layer   | Output                               | Enabled by          |
//! |---------|--------------------------------------|---------------------|
//! | console | human-readable, stdout               | `logging.console`   |
//! | json    | Bunyan JSON, stdout                  | `logging.json`      |
//! | file    | daily-rolling file, non-blocking     | `logging.file_dir`  |
//!
//! `RUST_LOG` overrides `logging.level` for every layer.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::error::KeyleaseError;

const APP_NAME: &str = "keylease";

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive when `RUST_LOG` is unset (e.g. `info`, `keylease=debug`)
    pub level: String,
    /// Enable human-readable console output
    pub console: bool,
    /// Enable Bunyan JSON output on stdout
    pub json: bool,
    /// Directory for the rolling log file; file logging is off when unset
    pub file_dir: Option<PathBuf>,
    /// Base name of the rolling log file
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            json: false,
            file_dir: None,
            file_name: "keylease.log".to_string(),
        }
    }
}

impl LoggingConfig {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Guard that keeps the non-blocking file writer alive.
///
/// Buffered output is flushed when it is dropped.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
///
/// Fails if a global subscriber is already installed or the log directory
/// cannot be created.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard, KeyleaseError> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut file_guard = None;

    if config.console {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(config.env_filter());
        layers.push(Box::new(console_layer));
    }

    if config.json {
        layers.push(Box::new(JsonStorageLayer));
        let json_layer = BunyanFormattingLayer::new(APP_NAME.to_string(), std::io::stdout)
            .with_filter(config.env_filter());
        layers.push(Box::new(json_layer));
    }

    if let Some(dir) = &config.file_dir {
        std::fs::create_dir_all(dir)?;
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, &config.file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .with_filter(config.env_filter());
        layers.push(Box::new(file_layer));
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| KeyleaseError::Logging(e.to_string()))?;

    tracing::info!(
        level = %config.level,
        console = config.console,
        json = config.json,
        file_dir = ?config.file_dir,
        "Logging initialized"
    );

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.console);
        assert!(!config.json);
        assert!(config.file_dir.is_none());
    }

    #[test]
    fn test_init_logging_writes_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let config = LoggingConfig {
            console: false,
            file_dir: Some(log_dir.clone()),
            ..Default::default()
        };

        // The only test in this binary that installs the global subscriber
        let guard = init_logging(&config).unwrap();
        assert!(log_dir.is_dir());

        // Dropping the guard flushes the non-blocking writer
        drop(guard);
        let written: String = std::fs::read_dir(&log_dir)
            .unwrap()
            .map(|entry| std::fs::read_to_string(entry.unwrap().path()).unwrap())
            .collect();
        assert!(written.contains("Logging initialized"));
    }
}
