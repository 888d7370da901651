//! Logging setup for the binary.
//!
//! Installs a global tracing subscriber writing to stderr. `RUST_LOG` wins
//! over the level passed in, which in turn defaults to `info`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

const DEFAULT_LEVEL: &str = "info";

/// Errors that may occur while initializing logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// The requested level is not a valid filter directive.
    #[error("Invalid log level {level:?}: {source}")]
    InvalidLevel {
        level: String,
        source: tracing_subscriber::filter::ParseError,
    },
    /// Failed to set the global tracing subscriber.
    #[error("Failed to install global tracing subscriber: {0}")]
    SetGlobal(tracing::subscriber::SetGlobalDefaultError),
}

pub fn init(level: Option<&str>) -> Result<(), LoggingError> {
    let env_filter = build_env_filter(level)?;
    let stderr_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let subscriber = Registry::default().with(env_filter).with(stderr_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(LoggingError::SetGlobal)?;
    Ok(())
}

fn build_env_filter(level: Option<&str>) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = level.unwrap_or(DEFAULT_LEVEL);
    EnvFilter::try_new(level).map_err(|source| LoggingError::InvalidLevel {
        level: level.to_string(),
        source,
    })
}
