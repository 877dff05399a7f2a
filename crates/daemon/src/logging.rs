//! Tracing subscriber setup.
//!
//! A console layer on stderr, plus an optional plain-text layer appending to a
//! log file. `RUST_LOG` overrides the configured level when set.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Error type for logging initialisation
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Failed to open log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Build the env filter: `RUST_LOG` if set and valid, else `directive`.
pub fn build_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive))
}

/// Open `path` for appending, creating parent directories as needed.
pub fn open_log_file(path: &Path) -> Result<File, LoggingError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(directive: &str, log_file: Option<&Path>) -> Result<(), LoggingError> {
    let file_layer = match log_file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(path)?)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(build_filter(directive))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))
}
