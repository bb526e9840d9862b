//! Logging setup.
//!
//! The library only emits `tracing` events. Applications that have no
//! subscriber of their own can install one with [`init_logging`].

use serde::Deserialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::constants::DEFAULT_LOG_LEVEL;
use crate::error::{Error, Result};

/// Subscriber settings for [`init_logging`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `"sqlhelper=debug"`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    #[must_use]
    pub const fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    fn filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.level)
            .map_err(|e| Error::config(format!("invalid log filter '{}': {e}", self.level)))
    }
}

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over [`LogConfig::level`].
///
/// # Errors
///
/// `Error::Config` for an unparsable filter or when a global subscriber is
/// already installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = config.filter()?;

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::config(format!("failed to install log subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert!(!config.json);
    }

    #[test]
    fn test_log_config_builders() {
        let config = LogConfig::default().with_level("sqlhelper=debug").with_json(true);
        assert_eq!(config.level, "sqlhelper=debug");
        assert!(config.json);
    }

    #[test]
    fn test_log_config_from_toml() {
        let config: LogConfig = toml::from_str("json = true").unwrap();
        assert_eq!(config.level, "info");
        assert!(config.json);
    }

    #[test]
    fn test_second_init_fails() {
        let config = LogConfig::default().with_level("warn");
        let _ = init_logging(&config);
        assert!(init_logging(&config).unwrap_err().is_config());
    }
}
