//! Logging initialization and configuration.

use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::sync::Mutex;

use thiserror::Error;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingConfig};

/// Filter used when neither the config nor `RUST_LOG` sets one.
const DEFAULT_FILTER: &str = "warn";

/// Initialize the tracing subscriber based on configuration.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = match &config.level {
        Some(level) => {
            EnvFilter::try_new(level).map_err(|e| LoggingError::InvalidFilter(e.to_string()))?
        }
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };
    let (writer, terminal) = make_writer(&config.output)?;

    let layer = fmt::layer()
        .with_target(config.target)
        .with_span_events(FmtSpan::NONE)
        .with_writer(writer);
    let layer = match (config.format, config.timestamps) {
        (LogFormat::Text, true) => layer.with_ansi(config.color && terminal).boxed(),
        (LogFormat::Text, false) => layer
            .with_ansi(config.color && terminal)
            .without_time()
            .boxed(),
        (LogFormat::Json, true) => layer.json().boxed(),
        (LogFormat::Json, false) => layer.json().without_time().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))
}

/// The writer for `output`, and whether it is an interactive terminal.
fn make_writer(output: &str) -> Result<(BoxMakeWriter, bool), LoggingError> {
    match output {
        "stdout" => Ok((BoxMakeWriter::new(io::stdout), io::stdout().is_terminal())),
        "stderr" => Ok((BoxMakeWriter::new(io::stderr), io::stderr().is_terminal())),
        path => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| LoggingError::FileOpen(path.to_string(), e))?;
            Ok((BoxMakeWriter::new(Mutex::new(file)), false))
        }
    }
}

/// Errors that can occur during logging initialization.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to open log file '{0}': {1}")]
    FileOpen(String, #[source] io::Error),

    #[error("Failed to install the log subscriber: {0}")]
    Init(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_filters_are_rejected() {
        let config = LoggingConfig {
            level: Some("componentize=loud".to_string()),
            ..LoggingConfig::default()
        };
        assert!(matches!(init(&config), Err(LoggingError::InvalidFilter(_))));
    }

    #[test]
    fn unwritable_log_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing/dir/log.txt");
        let err = make_writer(path.to_str().unwrap()).err().unwrap();
        assert!(matches!(err, LoggingError::FileOpen(..)));
    }
}
