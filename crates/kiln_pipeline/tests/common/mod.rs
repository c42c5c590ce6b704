//! Shared fixtures: a counting test pipeline and source database helpers.
//!
//! Asset bodies drive the pipeline:
//! - `deps`: identifiers of instances this asset uses;
//! - `dir` + `files`: external files read into the output;
//! - `fail`: the pipeline reports failure;
//! - `fail_first`: the pipeline fails on its first invocation only;
//! - `fatal_children`: a failed child fails this asset too.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kiln_common::Guid;
use kiln_config::KilnConfig;
use kiln_db::{InstanceInfo, MemoryDatabase, OutputInstance};
use kiln_pipeline::{
    Asset, BuildContext, BuildError, BuildRequest, Builder, DependencyFlags, DependencySet,
    Depends, Pipeline, PipelineContext, PipelineRegistry,
};
use serde_json::Value;

/// A pipeline that counts its invocations.
pub struct Counting {
    name: &'static str,
    types: &'static [&'static str],
    version: u32,
    invocations: AtomicUsize,
}

impl Counting {
    pub fn new(name: &'static str, types: &'static [&'static str]) -> Arc<Self> {
        Self::with_version(name, types, 1)
    }

    pub fn with_version(name: &'static str, types: &'static [&'static str], version: u32) -> Arc<Self> {
        Arc::new(Self {
            name,
            types,
            version,
            invocations: AtomicUsize::new(0),
        })
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

fn deps(asset: &Asset) -> Vec<Guid> {
    asset
        .field("deps")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str()?.parse().ok())
        .collect()
}

fn files(asset: &Asset) -> Vec<(PathBuf, String)> {
    let Some(dir) = asset.field("dir").and_then(Value::as_str) else {
        return Vec::new();
    };
    asset
        .field("files")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|v| Some((PathBuf::from(dir), v.as_str()?.to_string())))
        .collect()
}

fn flag(asset: &Asset, name: &str) -> bool {
    asset.field(name).and_then(Value::as_bool).unwrap_or(false)
}

impl Pipeline for Counting {
    fn name(&self) -> &str {
        self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn asset_types(&self) -> &[&str] {
        self.types
    }

    fn build_dependencies(
        &self,
        depends: &mut Depends<'_>,
        _source: Option<&InstanceInfo>,
        asset: &Asset,
    ) -> Result<(), BuildError> {
        for guid in deps(asset) {
            depends.add_instance(guid, DependencyFlags::BUILD | DependencyFlags::USE);
        }
        for (dir, name) in files(asset) {
            depends.add_file(&dir, &name);
        }
        Ok(())
    }

    fn build_output(
        &self,
        ctx: &mut BuildContext<'_>,
        request: &BuildRequest<'_>,
    ) -> Result<(), BuildError> {
        let previous = self.invocations.fetch_add(1, Ordering::SeqCst);
        let asset = request.asset;
        if flag(asset, "fail") || (flag(asset, "fail_first") && previous == 0) {
            return Err(BuildError::pipeline("asked to fail"));
        }
        if flag(asset, "fatal_children") && !ctx.failed_children().is_empty() {
            return Err(BuildError::pipeline("a child failed"));
        }

        let mut payload = asset.body.to_string();
        for guid in deps(asset) {
            match ctx.read_built(guid) {
                Ok(child) => payload.push_str(&String::from_utf8_lossy(&child.object)),
                Err(_) => payload.push_str("<missing>"),
            }
        }
        for (dir, name) in files(asset) {
            let bytes = std::fs::read(dir.join(&name))
                .map_err(|e| BuildError::source_unavailable(e.to_string()))?;
            payload.push_str(&String::from_utf8_lossy(&bytes));
        }
        ctx.write_output(OutputInstance::new(
            request.output_guid,
            request.output_path,
            "built",
            payload.into_bytes(),
        ))
    }
}

/// Builds a context over the given pipelines.
pub fn context(pipelines: &[Arc<Counting>], config: KilnConfig) -> PipelineContext {
    let mut registry = PipelineRegistry::new();
    for pipeline in pipelines {
        registry.register(Arc::clone(pipeline) as Arc<dyn Pipeline>).unwrap();
    }
    PipelineContext::new(registry, config)
}

/// Stores an asset as a source instance.
pub fn put_asset(db: &MemoryDatabase, n: u128, type_name: &str, body: Value) -> Guid {
    let guid = Guid::from_u128(n);
    let asset = Asset::new(type_name, body);
    db.put(guid, &format!("{type_name}/{n}"), type_name, asset.to_bytes())
        .unwrap();
    guid
}

/// Walks the given roots.
pub fn walk(builder: &Builder<'_>, roots: &[Guid]) -> DependencySet {
    let mut depends = builder.depends();
    for root in roots {
        depends.add_instance(*root, DependencyFlags::BUILD);
    }
    depends.finish()
}

/// Writes `contents` to `path` and pins its modification time.
pub fn write_pinned(path: &Path, contents: &[u8], secs: u64) {
    std::fs::write(path, contents).unwrap();
    let stamp = std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs);
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(stamp)
        .unwrap();
}
