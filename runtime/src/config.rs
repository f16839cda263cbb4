//! Configuration management for the desk runtime.
//!
//! Loads configuration from environment variables with sensible defaults.
//! A `.env` file in the working directory is honoured when present.
//!
//! | Variable | Default | |
//! |---|---|---|
//! | `DESK_FEED_POLL_INTERVAL_SECS` | `10` | seconds between feed polls, at least 1 |
//! | `DESK_LOG_LEVEL` | `info` | default filter when `RUST_LOG` is unset |
//! | `DESK_LOG_FORMAT` | `full` | `full` or `compact` |

use equipment_desk_core::backend::{NotificationBackend, PolicySource};
use equipment_desk_core::environment::Clock;
use equipment_desk_core::feed::{DEFAULT_POLL_INTERVAL, FeedEnvironment};
use equipment_desk_core::permission::AccessPolicy;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the feed poll interval in seconds
pub const POLL_INTERVAL_VAR: &str = "DESK_FEED_POLL_INTERVAL_SECS";
/// Environment variable holding the default log level
pub const LOG_LEVEL_VAR: &str = "DESK_LOG_LEVEL";
/// Environment variable holding the log format
pub const LOG_FORMAT_VAR: &str = "DESK_LOG_FORMAT";

/// Errors raised while loading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set to a value that cannot be used
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Value as found
        value: String,
        /// What is wrong with it
        reason: &'static str,
    },
}

/// Runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeskConfig {
    /// Notification feed settings
    pub feed: FeedConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Notification feed configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Seconds between polls
    pub poll_interval_secs: u64,
}

impl FeedConfig {
    /// Poll interval as a `Duration`
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Feed environment polling at the configured interval.
    #[must_use]
    pub fn environment(
        &self,
        notifications: Arc<dyn NotificationBackend>,
        clock: Arc<dyn Clock>,
    ) -> FeedEnvironment {
        FeedEnvironment::new(notifications, clock).with_poll_interval(self.poll_interval())
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-field human readable lines
    #[default]
    Full,
    /// Shorter single lines
    Compact,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "compact" => Ok(Self::Compact),
            _ => Err(()),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` directive); `RUST_LOG` takes precedence
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Full,
        }
    }
}

impl DeskConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is not an error
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`; unset variables take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable is set to an unusable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let poll_interval_secs = match lookup(POLL_INTERVAL_VAR) {
            None => defaults.feed.poll_interval_secs,
            Some(value) => match value.trim().parse::<u64>() {
                Ok(0) => {
                    return Err(ConfigError::Invalid {
                        key: POLL_INTERVAL_VAR,
                        value,
                        reason: "must be at least 1",
                    });
                },
                Ok(secs) => secs,
                Err(_) => {
                    return Err(ConfigError::Invalid {
                        key: POLL_INTERVAL_VAR,
                        value,
                        reason: "expected a whole number of seconds",
                    });
                },
            },
        };

        let level = lookup(LOG_LEVEL_VAR)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.logging.level);

        let format = match lookup(LOG_FORMAT_VAR) {
            None => defaults.logging.format,
            Some(value) => value.parse().map_err(|()| ConfigError::Invalid {
                key: LOG_FORMAT_VAR,
                value,
                reason: "expected \"full\" or \"compact\"",
            })?,
        };

        Ok(Self {
            feed: FeedConfig { poll_interval_secs },
            logging: LoggingConfig { level, format },
        })
    }
}

/// Fetch the permission configuration once, falling back to the built-in
/// default policy on any failure.
pub async fn fetch_policy_or_default(source: &dyn PolicySource) -> AccessPolicy {
    match source.fetch_policy().await {
        Ok(policy) => {
            tracing::debug!(?policy, "Loaded access policy");
            policy
        },
        Err(error) => {
            tracing::warn!(%error, "Could not fetch access policy, using the default");
            AccessPolicy::default()
        },
    }
}
