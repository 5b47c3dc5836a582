//! Configuration file discovery and TOML loading
//!
//! Resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`AFFIL_CONFIG`)
//! 3. User config directory (`~/.config/affil/config.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing file is only an error when it was named explicitly (levels 1 and 2).
//! Level 3 is used only when the file exists, so a fresh machine starts with
//! compiled defaults and a warning.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "AFFIL_CONFIG";

/// Application directory name under the platform config directory
const APP_DIR: &str = "affil";

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Where the configuration was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOrigin {
    CommandLine,
    Environment,
    UserConfigDir,
    CompiledDefaults,
}

impl std::fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigOrigin::CommandLine => write!(f, "command line"),
            ConfigOrigin::Environment => write!(f, "environment"),
            ConfigOrigin::UserConfigDir => write!(f, "user config directory"),
            ConfigOrigin::CompiledDefaults => write!(f, "compiled defaults"),
        }
    }
}

/// Resolved configuration location
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// File to read, `None` for compiled defaults
    pub path: Option<PathBuf>,
    /// Priority level the path came from
    pub origin: ConfigOrigin,
}

impl ConfigSource {
    /// Compiled defaults only, no file
    pub fn defaults() -> Self {
        Self {
            path: None,
            origin: ConfigOrigin::CompiledDefaults,
        }
    }

    /// Whether the file was named explicitly by the operator
    pub fn is_explicit(&self) -> bool {
        matches!(
            self.origin,
            ConfigOrigin::CommandLine | ConfigOrigin::Environment
        )
    }
}

/// Resolve the configuration file location
///
/// # Arguments
/// * `cli_arg` - Path given on the command line, if any
pub fn resolve_config_path(cli_arg: Option<&Path>) -> ConfigSource {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return ConfigSource {
            path: Some(path.to_path_buf()),
            origin: ConfigOrigin::CommandLine,
        };
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return ConfigSource {
                path: Some(PathBuf::from(path)),
                origin: ConfigOrigin::Environment,
            };
        }
    }

    // Priority 3: User config directory (only if present)
    if let Some(path) = default_config_path() {
        if path.exists() {
            return ConfigSource {
                path: Some(path),
                origin: ConfigOrigin::UserConfigDir,
            };
        }
    }

    // Priority 4: Compiled defaults
    ConfigSource::defaults()
}

/// Platform default configuration file path (`<config_dir>/affil/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
}

/// Load configuration of type `T` from a resolved source
///
/// Missing keys fall back to `T::default()` through serde defaults on `T`.
///
/// # Errors
/// - Explicitly named file does not exist or cannot be read
/// - File content is not valid TOML for `T`
pub fn load_config<T>(source: &ConfigSource) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = source.path.as_ref() else {
        warn!("No configuration file found, using compiled defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        if source.is_explicit() {
            return Err(Error::Config(format!(
                "Configuration file not found: {} (from {})",
                path.display(),
                source.origin
            )));
        }
        warn!(path = %path.display(), "Configuration file vanished, using compiled defaults");
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = parse_config(&content)?;

    info!(
        path = %path.display(),
        origin = %source.origin,
        "Configuration loaded"
    );
    Ok(config)
}

/// Parse configuration of type `T` from TOML text
pub fn parse_config<T: DeserializeOwned>(content: &str) -> Result<T> {
    Ok(toml::from_str(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_cli_arg_has_highest_priority() {
        let source = resolve_config_path(Some(Path::new("/tmp/affil-cli.toml")));
        assert_eq!(source.origin, ConfigOrigin::CommandLine);
        assert!(source.is_explicit());
    }

    #[test]
    fn test_defaults_source_loads_default_value() {
        let loaded: Sample = load_config(&ConfigSource::defaults()).unwrap();
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn test_parse_partial_config_keeps_defaults() {
        let parsed: Sample = parse_config("name = \"x\"").unwrap();
        assert_eq!(parsed.name, "x");
        assert_eq!(parsed.count, 0);
    }

    #[test]
    fn test_parse_invalid_toml_is_error() {
        let parsed: Result<Sample> = parse_config("name = ");
        assert!(matches!(parsed, Err(Error::Toml(_))));
    }
}
