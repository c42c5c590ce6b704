//! `kiln cache`: verify and collect the build cache.

use std::collections::HashSet;

use kiln_cache::{BuildHistoryStore, CacheKey, FsBuildCache};

use crate::project::open_project;
use crate::{CacheCommand, GlobalArgs};

/// Runs a `kiln cache` subcommand.
///
/// `verify` returns exit code 1 when any entry is corrupt.
pub fn run(command: &CacheCommand, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project = open_project(global)?;
    let cache = project.cache();
    match command {
        CacheCommand::Verify => verify(&cache, global),
        CacheCommand::Gc { dry_run } => {
            let live = live_keys(&project.history());
            if *dry_run {
                let stale = cache.keys()?.into_iter().filter(|k| !live.contains(k)).count();
                println!("{stale} entries not referenced by the build history");
                return Ok(0);
            }
            let removed = cache.gc(&live)?;
            tracing::info!(removed, "cache garbage collection finished");
            if !global.quiet {
                println!("removed {removed} entries");
            }
            Ok(0)
        }
    }
}

fn verify(cache: &FsBuildCache, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let report = cache.verify()?;
    for (path, error) in &report.corrupt {
        eprintln!("corrupt   {}: {error}", path.display());
    }
    if !global.quiet {
        println!(
            "{} valid, {} corrupt",
            report.valid.len(),
            report.corrupt.len()
        );
    }
    Ok(if report.is_clean() { 0 } else { 1 })
}

/// Keys of the entries the history still refers to: one per record, the
/// output identifier with its last combined fingerprint.
pub fn live_keys(history: &BuildHistoryStore) -> HashSet<CacheKey> {
    history
        .records()
        .into_iter()
        .map(|(guid, record)| CacheKey::new(guid, record.combined))
        .collect()
}
