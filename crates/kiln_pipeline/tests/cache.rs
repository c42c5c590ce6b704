//! Builds against the build cache: restores, cache modes, write failures and
//! corrupt entries.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::{context, put_asset, walk, Counting};
use kiln_cache::{
    BuildCache, BuildHistoryStore, CacheEntry, CacheError, CacheKey, FsBuildCache,
    MemoryBuildCache,
};
use kiln_common::Guid;
use kiln_config::{load_config_from_str, KilnConfig};
use kiln_db::{isolate, MemoryDatabase};
use kiln_pipeline::{
    Asset, BuildError, BuildObserver, Builder, DependencyNode, ErrorKind, PipelineContext,
};
use serde_json::json;

struct Scene {
    tex_pipe: std::sync::Arc<Counting>,
    mat_pipe: std::sync::Arc<Counting>,
    ctx: PipelineContext,
    source: MemoryDatabase,
    tex: Guid,
    mat: Guid,
}

fn scene(config: KilnConfig) -> Scene {
    let tex_pipe = Counting::new("tex", &["texture"]);
    let mat_pipe = Counting::new("mat", &["material"]);
    let ctx = context(&[tex_pipe.clone(), mat_pipe.clone()], config);
    let source = MemoryDatabase::new();
    let tex = put_asset(&source, 1, "texture", json!({ "size": 64 }));
    let mat = put_asset(&source, 2, "material", json!({ "deps": [tex.to_string()] }));
    Scene {
        tex_pipe,
        mat_pipe,
        ctx,
        source,
        tex,
        mat,
    }
}

impl Scene {
    fn invocations(&self) -> usize {
        self.tex_pipe.invocations() + self.mat_pipe.invocations()
    }

    /// Builds into `output` with a fresh history, so nothing is up to date.
    fn build_fresh(&self, output: &MemoryDatabase, cache: &dyn BuildCache) -> kiln_pipeline::BuildReport {
        let history = BuildHistoryStore::in_memory();
        let builder = Builder::new(&self.ctx, &self.source, output, &history).with_cache(cache);
        let mut set = walk(&builder, &[self.mat]);
        builder.build(&mut set, false)
    }
}

#[test]
fn restore_matches_direct_build() {
    let scene = scene(KilnConfig::default());
    let cache = MemoryBuildCache::new();

    let direct = MemoryDatabase::new();
    assert!(scene.build_fresh(&direct, &cache).is_success());
    assert_eq!(scene.invocations(), 2);

    let restored = MemoryDatabase::new();
    let report = scene.build_fresh(&restored, &cache);
    assert!(report.is_success());
    assert_eq!(scene.invocations(), 2);
    assert_eq!(report.counters.cache_hit, 2);
    assert_eq!(report.counters.succeeded_built, 2);
    for guid in [scene.tex, scene.mat] {
        assert_eq!(isolate(&restored, guid).unwrap(), isolate(&direct, guid).unwrap());
    }
}

#[test]
fn filesystem_cache_restores_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let scene = scene(KilnConfig::default());

    let direct = MemoryDatabase::new();
    scene.build_fresh(&direct, &FsBuildCache::new(dir.path(), true));

    let reopened = FsBuildCache::new(dir.path(), true);
    assert_eq!(reopened.keys().unwrap().len(), 2);
    assert!(reopened.verify().unwrap().is_clean());
    let restored = MemoryDatabase::new();
    let report = scene.build_fresh(&restored, &reopened);
    assert_eq!(report.counters.cache_hit, 2);
    assert_eq!(scene.invocations(), 2);
    assert_eq!(isolate(&restored, scene.mat).unwrap(), isolate(&direct, scene.mat).unwrap());
}

#[test]
fn corrupt_entries_are_misses() {
    let dir = tempfile::tempdir().unwrap();
    let scene = scene(KilnConfig::default());
    let cache = FsBuildCache::new(dir.path(), false);
    scene.build_fresh(&MemoryDatabase::new(), &cache);

    for key in cache.keys().unwrap() {
        std::fs::write(cache.entry_path(&key), b"not an entry").unwrap();
    }

    let report = scene.build_fresh(&MemoryDatabase::new(), &cache);
    assert!(report.is_success());
    assert_eq!(report.counters.cache_hit, 0);
    assert_eq!(report.counters.cache_miss, 2);
    assert_eq!(scene.invocations(), 4);
    assert!(cache.verify().unwrap().is_clean());
}

#[test]
fn void_mode_builds_but_still_stores() {
    let config = load_config_from_str("[cache]\nmode = \"void\"\n").unwrap();
    let scene = scene(config);
    let cache = MemoryBuildCache::new();

    scene.build_fresh(&MemoryDatabase::new(), &cache);
    let report = scene.build_fresh(&MemoryDatabase::new(), &cache);

    assert_eq!(report.counters.cache_void, 2);
    assert_eq!(report.counters.cache_hit, 0);
    assert_eq!(scene.invocations(), 4);
    assert_eq!(cache.len(), 2);
}

#[test]
fn off_mode_never_touches_the_cache() {
    let config = load_config_from_str("[cache]\nmode = \"off\"\n").unwrap();
    let scene = scene(config);
    let cache = MemoryBuildCache::new();

    let report = scene.build_fresh(&MemoryDatabase::new(), &cache);
    assert!(report.is_success());
    assert!(cache.is_empty());
    assert_eq!(report.counters.cache_miss, 0);
}

/// Accepts nothing; every write fails with a transient error.
#[derive(Default)]
struct Unwritable {
    puts: AtomicUsize,
}

impl BuildCache for Unwritable {
    fn get(&self, _key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(None)
    }

    fn put(&self, _key: &CacheKey, _entry: &CacheEntry) -> Result<(), CacheError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable {
            reason: "storage offline".to_string(),
        })
    }

    fn contains(&self, _key: &CacheKey) -> bool {
        false
    }
}

#[derive(Default)]
struct WriteFailures(AtomicUsize);

impl BuildObserver for WriteFailures {
    fn on_cache_write_failed(&self, _node: &DependencyNode, error: &BuildError) {
        assert_eq!(error.kind, ErrorKind::CacheWriteFailed);
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn cache_write_failure_is_reported_not_fatal() {
    let scene = scene(KilnConfig::default());
    let cache = Unwritable::default();
    let observer = WriteFailures::default();
    let output = MemoryDatabase::new();
    let history = BuildHistoryStore::in_memory();

    let builder = Builder::new(&scene.ctx, &scene.source, &output, &history)
        .with_cache(&cache)
        .with_observer(&observer);
    let mut set = walk(&builder, &[scene.mat]);
    let report = builder.build(&mut set, false);

    assert!(report.is_success());
    assert_eq!(report.counters.cache_write_failed, 2);
    assert_eq!(observer.0.load(Ordering::SeqCst), 2);
    // One attempt plus the default two retries per node.
    assert_eq!(cache.puts.load(Ordering::SeqCst), 6);
    assert!(history.get(scene.mat).is_some());
}

#[test]
fn build_params_bypass_the_cache() {
    let scene = scene(KilnConfig::default());
    let cache = MemoryBuildCache::new();
    let output = MemoryDatabase::new();
    let history = BuildHistoryStore::in_memory();
    let builder = Builder::new(&scene.ctx, &scene.source, &output, &history).with_cache(&cache);

    let params = json!({ "lod": 2 });
    builder
        .build_ad_hoc_output(
            Asset::new("texture", json!({ "size": 4 })),
            "adhoc/with-params",
            Guid::from_u128(50),
            Some(&params),
        )
        .unwrap();
    assert!(cache.is_empty());

    builder
        .build_ad_hoc_output(
            Asset::new("texture", json!({ "size": 4 })),
            "adhoc/plain",
            Guid::from_u128(51),
            None,
        )
        .unwrap();
    assert_eq!(cache.len(), 1);
    assert_eq!(scene.tex_pipe.invocations(), 2);
}
