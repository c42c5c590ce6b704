//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::{CacheMode, KilnConfig};
use std::path::Path;

/// Name of the configuration file inside a project directory.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Loads and validates `kiln.toml` from a project directory.
///
/// Relative cache and history paths are resolved against `project_dir`.
pub fn load_config(project_dir: &Path) -> Result<KilnConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    let mut config = load_config_from_str(&content)?;
    if config.cache.dir.is_relative() {
        config.cache.dir = project_dir.join(&config.cache.dir);
    }
    if config.history.path.is_relative() {
        config.history.path = project_dir.join(&config.history.path);
    }
    Ok(config)
}

/// Parses and validates a `kiln.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<KilnConfig, ConfigError> {
    let config: KilnConfig =
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that required fields are present and values are consistent.
fn validate_config(config: &KilnConfig) -> Result<(), ConfigError> {
    if config.build.max_depth == 0 {
        return Err(ConfigError::OutOfRange {
            key: "build.max_depth",
            reason: "must be at least 1",
        });
    }
    if config.cache.mode != CacheMode::Off && config.cache.dir.as_os_str().is_empty() {
        return Err(ConfigError::Empty { key: "cache.dir" });
    }
    if config.history.path.as_os_str().is_empty() {
        return Err(ConfigError::Empty { key: "history.path" });
    }
    Ok(())
}
