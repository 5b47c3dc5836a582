//! Logging configuration and tracing initialization

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration (`[logging]` table)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset (e.g. "info", "affil_classify=debug")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Build the filter: `RUST_LOG` wins, then the CLI override, then the configured level
pub fn build_filter(config: &LoggingConfig, cli_level: Option<&str>) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let directive = cli_level.unwrap_or(config.level.as_str());
    EnvFilter::try_new(directive)
        .map_err(|e| Error::Config(format!("Invalid log level '{}': {}", directive, e)))
}

/// Install the global tracing subscriber (logs go to stderr)
///
/// # Errors
/// Returns error if the level directive is invalid or a subscriber is already installed
pub fn init_tracing(config: &LoggingConfig, cli_level: Option<&str>) -> Result<()> {
    let filter = build_filter(config, cli_level)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| Error::Internal(format!("Tracing already initialized: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_level_is_info() {
        assert_eq!(LoggingConfig::default().level, "info");
    }

    #[test]
    #[serial]
    fn test_invalid_directive_is_config_error() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "affil=notalevel".to_string(),
        };
        assert!(matches!(build_filter(&config, None), Err(Error::Config(_))));
    }
}
