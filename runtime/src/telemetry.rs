//! Tracing subscriber setup.

use crate::config::{LogFormat, LoggingConfig};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors from installing the tracing subscriber.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The configured level is not a valid filter directive
    #[error("invalid log filter {directive:?}: {reason}")]
    Filter {
        /// Directive as configured
        directive: String,
        /// Parser message
        reason: String,
    },

    /// A global subscriber is already installed
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`.
///
/// # Errors
///
/// - [`TelemetryError::Filter`]: `config.level` does not parse
/// - [`TelemetryError::Install`]: a subscriber was already installed
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| TelemetryError::Filter {
            directive: config.level.clone(),
            reason: e.to_string(),
        })?,
    };

    let (full, compact) = match config.format {
        LogFormat::Full => (Some(fmt::layer()), None),
        LogFormat::Compact => (None, Some(fmt::layer().compact())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(full)
        .with(compact)
        .try_init()
        .map_err(|e| TelemetryError::Install(e.to_string()))
}
