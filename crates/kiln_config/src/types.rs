//! Configuration types deserialized from `kiln.toml`.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use kiln_common::hash32;

/// The top-level configuration parsed from `kiln.toml`.
///
/// Every section is optional; a missing file section takes its defaults so
/// an empty document is a valid configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KilnConfig {
    /// Build scheduling settings.
    #[serde(default)]
    pub build: BuildConfig,
    /// Build cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Build history store settings.
    #[serde(default)]
    pub history: HistoryConfig,
    /// Free-form settings tables, one per pipeline name.
    #[serde(default)]
    pub pipelines: BTreeMap<String, toml::Table>,
}

impl KilnConfig {
    /// Returns the hash of the settings table configured for `pipeline`.
    ///
    /// Pipelines without a table hash to zero. Tables are serialized with
    /// sorted keys so equal settings always give equal hashes.
    pub fn pipeline_settings_hash(&self, pipeline: &str) -> u32 {
        match self.pipelines.get(pipeline) {
            Some(table) => hash32(table.to_string().as_bytes()),
            None => 0,
        }
    }
}

/// Build scheduling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    /// Build independent nodes on worker threads.
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Worker thread count; zero lets the thread pool decide.
    #[serde(default)]
    pub threads: usize,
    /// Maximum recursion depth of the dependency walk.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            threads: 0,
            max_depth: default_max_depth(),
        }
    }
}

/// Build cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// How the builder uses the cache.
    #[serde(default)]
    pub mode: CacheMode,
    /// Directory holding cache entries.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Deflate entry payloads before writing them.
    #[serde(default = "default_true")]
    pub compress: bool,
    /// Retries for transient cache read/write failures.
    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::default(),
            dir: default_cache_dir(),
            compress: true,
            retries: default_retries(),
        }
    }
}

/// How the builder uses the build cache.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    /// Look up entries before building and store results after (default).
    #[default]
    ReadWrite,
    /// Never restore from the cache but keep storing fresh results.
    Void,
    /// Do not touch the cache at all.
    Off,
}

/// Build history store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Path of the history file.
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
    /// When external file and data blob contents are re-hashed.
    #[serde(default)]
    pub file_hashing: FileHashing,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            file_hashing: FileHashing::default(),
        }
    }
}

/// Policy for re-hashing external file contents.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileHashing {
    /// Trust the stored hash while the last-write timestamp is unchanged (default).
    #[default]
    Timestamp,
    /// Always re-hash contents.
    Content,
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> u32 {
    64
}

fn default_retries() -> u32 {
    2
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".kiln/cache")
}

fn default_history_path() -> PathBuf {
    PathBuf::from(".kiln/history.json")
}
