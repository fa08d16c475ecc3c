//! Structured logging setup.
//!
//! `RUST_LOG` takes precedence over [`LoggingConfig::level`]. Output goes to
//! stderr unless a log file is configured.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{directive}': {source}")]
    Filter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("failed to open log file '{path}': {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Build the filter: `RUST_LOG` if set and valid, else `level`.
pub fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|source| LoggingError::Filter {
        directive: level.to_string(),
        source,
    })
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` when a subscriber was already installed, which leaves
/// the existing one in place.
pub fn init(config: &LoggingConfig) -> Result<bool, LoggingError> {
    let filter = build_filter(&config.level)?;

    let (writer, ansi) = match config.file {
        Some(ref path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::File {
                    path: path.clone(),
                    source,
                })?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let base = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_thread_names(true);
    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Json => base.json().with_filter(filter).boxed(),
        LogFormat::Pretty => base.pretty().with_filter(filter).boxed(),
        LogFormat::Compact => base.compact().with_filter(filter).boxed(),
    };

    Ok(tracing_subscriber::registry().with(layer).try_init().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_bad_level_is_rejected() {
        std::env::remove_var("RUST_LOG");
        let err = build_filter("serial_transport=loud").unwrap_err();
        assert!(matches!(err, LoggingError::Filter { .. }));
        assert!(build_filter("debug").is_ok());
    }

    #[test]
    #[serial]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Compact,
            file: Some(dir.path().join("transport.log")),
        };
        let first = init(&config).unwrap();
        let second = init(&config).unwrap();
        assert!(!(first && second));
        assert!(dir.path().join("transport.log").exists());
    }
}
