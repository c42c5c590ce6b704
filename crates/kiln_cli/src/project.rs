//! Project discovery shared by every command.

use std::path::{Path, PathBuf};

use kiln_cache::{BuildHistoryStore, FsBuildCache};
use kiln_config::{KilnConfig, CONFIG_FILE};

use crate::GlobalArgs;

/// A resolved project: its root directory and configuration.
pub struct Project {
    /// Directory holding `kiln.toml`.
    pub root: PathBuf,
    /// Loaded configuration with paths resolved against `root`.
    pub config: KilnConfig,
}

impl Project {
    /// Opens the configured history file.
    pub fn history(&self) -> BuildHistoryStore {
        BuildHistoryStore::open(&self.config.history.path)
    }

    /// Opens the configured cache directory.
    pub fn cache(&self) -> FsBuildCache {
        FsBuildCache::new(&self.config.cache.dir, self.config.cache.compress)
    }
}

/// Walks up from `start` looking for the nearest directory containing `kiln.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(format!(
                "could not find {CONFIG_FILE} in {} or any parent directory",
                start.display()
            )
            .into());
        }
    }
}

/// Resolves the project root directory from global CLI args.
///
/// If `--config` is specified, uses that path (file → parent dir, dir → itself).
/// Otherwise walks up from the current directory.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match &global.config {
        Some(config_path) => {
            let p = PathBuf::from(config_path);
            if p.is_file() {
                Ok(p.parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")))
            } else {
                Ok(p)
            }
        }
        None => find_project_root(&std::env::current_dir()?),
    }
}

/// Resolves the project and loads its configuration.
///
/// A directory without `kiln.toml` given through `--config` gets the default
/// configuration rooted at that directory.
pub fn open_project(global: &GlobalArgs) -> Result<Project, Box<dyn std::error::Error>> {
    let root = resolve_project_root(global)?;
    let config = if root.join(CONFIG_FILE).is_file() {
        kiln_config::load_config(&root)?
    } else {
        tracing::debug!(root = %root.display(), "no configuration file, using defaults");
        let mut config = KilnConfig::default();
        config.cache.dir = root.join(&config.cache.dir);
        config.history.path = root.join(&config.history.path);
        config
    };
    Ok(Project { root, config })
}
