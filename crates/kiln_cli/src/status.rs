//! `kiln status`: summary of the persisted build state.

use kiln_config::CacheMode;

use crate::project::open_project;
use crate::GlobalArgs;

/// Runs the `kiln status` command.
pub fn run(global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = open_project(global)?;
    let history = project.history();
    let config = &project.config;

    println!("project   {}", project.root.display());
    println!(
        "history   {} records, {} file hashes ({})",
        history.len(),
        history.file_hash_count(),
        config.history.path.display()
    );

    if config.cache.mode == CacheMode::Off {
        println!("cache     off");
        return Ok(0);
    }
    let keys = project.cache().keys()?;
    let mode = match config.cache.mode {
        CacheMode::ReadWrite => "read-write",
        CacheMode::Void => "void",
        CacheMode::Off => "off",
    };
    println!(
        "cache     {} entries, {mode} ({})",
        keys.len(),
        config.cache.dir.display()
    );
    Ok(0)
}
