//! Parsing and validation of `kiln.toml` build configuration files.
//!
//! This crate reads the configuration file and produces a strongly-typed
//! [`KilnConfig`] covering build scheduling, the build cache, the build
//! history store and per-pipeline settings.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, load_config_from_str, CONFIG_FILE};
pub use types::*;
