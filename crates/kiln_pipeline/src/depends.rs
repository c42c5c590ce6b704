//! The dependency walker.
//!
//! [`Depends`] builds a [`DependencySet`] by recursively asking each asset's
//! pipeline to declare what it depends on. Nodes are deduplicated by output
//! identifier, every newly declared node is linked under the node currently
//! being walked, and edges that would close a cycle are dropped.

use std::path::Path;
use std::sync::Arc;

use kiln_cache::FileHasher;
use kiln_common::Guid;
use kiln_db::{Database, InstanceInfo};
use serde_json::Value;

use crate::asset::Asset;
use crate::cancel::CancellationToken;
use crate::dependency::{DependencyFlags, DependencyNode, ExternalFileRef};
use crate::dependency_set::DependencySet;
use crate::fingerprint::merge_pipeline_hash;
use crate::pipeline::{Pipeline, PipelineContext};

/// Collects the dependency graph of a set of root assets.
pub struct Depends<'a> {
    ctx: &'a PipelineContext,
    source_db: &'a dyn Database,
    cancel: CancellationToken,
    set: DependencySet,
    stack: Vec<usize>,
}

impl<'a> Depends<'a> {
    /// Creates a walker reading source instances from `source_db`.
    pub fn new(ctx: &'a PipelineContext, source_db: &'a dyn Database) -> Self {
        Self {
            ctx,
            source_db,
            cancel: CancellationToken::new(),
            set: DependencySet::new(),
            stack: Vec::new(),
        }
    }

    /// Stops the walk once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns `true` if the walk was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the index of the node whose dependencies are being declared.
    pub fn current(&self) -> Option<usize> {
        self.stack.last().copied()
    }

    /// Returns the set built so far.
    pub fn set(&self) -> &DependencySet {
        &self.set
    }

    /// Adds a dependency on a source database instance.
    ///
    /// Returns the node index, or `None` if the identifier is nil, the walk
    /// was cancelled, or no pipeline handles the instance's type. A missing
    /// or undecodable instance still yields a node, marked failed.
    pub fn add_instance(&mut self, guid: Guid, flags: DependencyFlags) -> Option<usize> {
        if guid.is_nil() || self.is_cancelled() {
            return None;
        }
        if let Some(idx) = self.set.find(guid) {
            return Some(self.revisit(idx, flags));
        }

        let Some(info) = self.source_db.instance(guid) else {
            tracing::warn!(%guid, "dependency on missing source instance");
            return Some(self.add_failed(guid, String::new(), flags, "source instance not found"));
        };
        let asset = match Asset::read(self.source_db, guid) {
            Ok(asset) => asset,
            Err(e) => {
                tracing::warn!(%guid, path = %info.path, error = %e.message, "cannot read source asset");
                return Some(self.add_failed(guid, info.path.clone(), flags, e.message));
            }
        };
        let ctx = self.ctx;
        let Some(pipeline) = ctx.find(&asset.type_name) else {
            tracing::warn!(%guid, type_name = %asset.type_name, "no pipeline for asset type");
            return None;
        };
        let node = DependencyNode::new(
            pipeline.name(),
            pipeline.version(),
            ctx.pipeline_hash(pipeline.as_ref()),
            Arc::new(asset),
            info.path.clone(),
            guid,
            flags,
        )
        .with_source(guid);
        Some(self.push(node, pipeline.as_ref(), Some(&info)))
    }

    /// Adds an embedded asset that produces its own output instance.
    pub fn add_asset(
        &mut self,
        asset: Asset,
        output_path: &str,
        output_guid: Guid,
        flags: DependencyFlags,
    ) -> Option<usize> {
        if self.is_cancelled() {
            return None;
        }
        if output_guid.is_nil() {
            tracing::warn!(path = output_path, "embedded asset has a nil output identifier");
            return None;
        }
        if let Some(idx) = self.set.find(output_guid) {
            return Some(self.revisit(idx, flags));
        }
        let ctx = self.ctx;
        let Some(pipeline) = ctx.find(&asset.type_name) else {
            tracing::warn!(type_name = %asset.type_name, path = output_path, "no pipeline for asset type");
            return None;
        };
        let node = DependencyNode::new(
            pipeline.name(),
            pipeline.version(),
            ctx.pipeline_hash(pipeline.as_ref()),
            Arc::new(asset),
            output_path,
            output_guid,
            flags,
        );
        Some(self.push(node, pipeline.as_ref(), None))
    }

    /// Walks the dependencies of an embedded asset that produces no output of
    /// its own, attributing them to the current node.
    ///
    /// The embedded asset's pipeline hash is merged into the current node.
    pub fn add_embedded(&mut self, asset: &Asset) {
        let Some(current) = self.current() else {
            return;
        };
        if self.is_cancelled() {
            return;
        }
        let ctx = self.ctx;
        let Some(pipeline) = ctx.find(&asset.type_name) else {
            tracing::warn!(type_name = %asset.type_name, "no pipeline for embedded asset type");
            return;
        };
        self.merge_hash(current, ctx.pipeline_hash(pipeline.as_ref()));
        if let Err(e) = pipeline.build_dependencies(self, None, asset) {
            self.fail(current, e.message);
        }
    }

    /// Declares that the current node reads the external file `base/name`.
    ///
    /// The file's last-write stamp is captured now. Declaring the same file
    /// twice is a no-op; a missing file fails the current node.
    pub fn add_file(&mut self, base: &Path, name: &str) {
        let Some(current) = self.current() else {
            return;
        };
        let path = base.join(name);
        let Some(node) = self.set.get_mut(current) else {
            return;
        };
        if node.files.iter().any(|f| f.path == path) {
            return;
        }
        match FileHasher::stamp(&path) {
            Ok(stamp) => node.files.push(ExternalFileRef {
                path,
                last_write: stamp.last_write,
            }),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "missing external file");
                node.fail(format!("missing external file {}", path.display()));
            }
        }
    }

    /// Declares that the current node's output depends on the behaviour of
    /// the pipeline handling `type_name`.
    pub fn add_type(&mut self, type_name: &str) {
        let Some(current) = self.current() else {
            return;
        };
        match self.ctx.find(type_name) {
            Some(pipeline) => {
                let hash = self.ctx.pipeline_hash(pipeline.as_ref());
                self.merge_hash(current, hash);
            }
            None => tracing::warn!(type_name, "no pipeline for declared type"),
        }
    }

    /// Finishes the walk.
    pub fn finish(self) -> DependencySet {
        self.set
    }

    fn push(
        &mut self,
        node: DependencyNode,
        pipeline: &dyn Pipeline,
        source: Option<&InstanceInfo>,
    ) -> usize {
        let asset = Arc::clone(&node.source_asset);
        let idx = self.set.add(node);
        self.link_to_current(idx);

        if self.stack.len() >= self.ctx.config.build.max_depth as usize {
            tracing::warn!(
                path = %asset_path(&self.set, idx),
                depth = self.stack.len(),
                "dependency depth limit reached; not walking further"
            );
            return idx;
        }
        self.stack.push(idx);
        if let Err(e) = pipeline.build_dependencies(self, source, &asset) {
            tracing::warn!(path = %asset_path(&self.set, idx), error = %e, "declaring dependencies failed");
            self.fail(idx, e.message);
        }
        self.stack.pop();
        idx
    }

    fn revisit(&mut self, idx: usize, flags: DependencyFlags) -> usize {
        if let Err(e) = self.set.add_flags(idx, flags) {
            tracing::error!(error = %e, "merging dependency flags");
        }
        self.link_to_current(idx);
        idx
    }

    fn add_failed(
        &mut self,
        guid: Guid,
        path: String,
        flags: DependencyFlags,
        error: impl Into<String>,
    ) -> usize {
        let placeholder = Arc::new(Asset::new(String::new(), Value::Null));
        let mut node = DependencyNode::new("", 0, 0, placeholder, path, guid, flags).with_source(guid);
        node.fail(error);
        let idx = self.set.add(node);
        self.link_to_current(idx);
        idx
    }

    fn link_to_current(&mut self, idx: usize) {
        let Some(parent) = self.current() else {
            return;
        };
        match self.set.link(parent, idx) {
            Ok(true) => {}
            Ok(false) => {
                if parent == idx || self.set.reaches(idx, parent) {
                    tracing::warn!(
                        parent = %asset_path(&self.set, parent),
                        child = %asset_path(&self.set, idx),
                        "dropping dependency that would form a cycle"
                    );
                }
            }
            Err(e) => tracing::error!(error = %e, "linking dependency"),
        }
    }

    fn merge_hash(&mut self, idx: usize, hash: u32) {
        if let Some(node) = self.set.get_mut(idx) {
            node.pipeline_hash = merge_pipeline_hash(node.pipeline_hash, hash);
        }
    }

    fn fail(&mut self, idx: usize, error: String) {
        if let Some(node) = self.set.get_mut(idx) {
            node.fail(error);
        }
    }
}

fn asset_path(set: &DependencySet, idx: usize) -> &str {
    set.get(idx).map_or("?", |n| n.output_path.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BuildContext;
    use crate::error::BuildError;
    use crate::pipeline::{BuildRequest, PipelineRegistry};
    use kiln_config::KilnConfig;
    use kiln_db::MemoryDatabase;
    use serde_json::json;

    /// Declares a dependency on every guid listed in the asset's `deps` field
    /// and on every file listed in its `files` field.
    struct Linking;

    impl Pipeline for Linking {
        fn name(&self) -> &str {
            "linking"
        }

        fn version(&self) -> u32 {
            1
        }

        fn asset_types(&self) -> &[&str] {
            &["node"]
        }

        fn build_dependencies(
            &self,
            depends: &mut Depends<'_>,
            _source: Option<&InstanceInfo>,
            asset: &Asset,
        ) -> Result<(), BuildError> {
            for dep in asset.field("deps").and_then(Value::as_array).into_iter().flatten() {
                let guid: Guid = dep
                    .as_str()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| BuildError::pipeline("bad dependency"))?;
                depends.add_instance(guid, DependencyFlags::BUILD | DependencyFlags::USE);
            }
            if let Some(dir) = asset.field("dir").and_then(Value::as_str) {
                for file in asset.field("files").and_then(Value::as_array).into_iter().flatten() {
                    depends.add_file(Path::new(dir), file.as_str().unwrap_or_default());
                }
            }
            if let Some(inner) = asset.field("embedded") {
                depends.add_embedded(&Asset::new("shader", inner.clone()));
            }
            Ok(())
        }

        fn build_output(
            &self,
            _ctx: &mut BuildContext<'_>,
            _request: &BuildRequest<'_>,
        ) -> Result<(), BuildError> {
            Ok(())
        }
    }

    struct Shader;

    impl Pipeline for Shader {
        fn name(&self) -> &str {
            "shader"
        }

        fn version(&self) -> u32 {
            3
        }

        fn asset_types(&self) -> &[&str] {
            &["shader"]
        }

        fn build_output(
            &self,
            _ctx: &mut BuildContext<'_>,
            _request: &BuildRequest<'_>,
        ) -> Result<(), BuildError> {
            Ok(())
        }
    }

    fn context() -> PipelineContext {
        let mut registry = PipelineRegistry::new();
        registry.register(Arc::new(Linking)).unwrap();
        registry.register(Arc::new(Shader)).unwrap();
        PipelineContext::new(registry, KilnConfig::default())
    }

    fn put(db: &MemoryDatabase, n: u128, body: Value) -> Guid {
        let guid = Guid::from_u128(n);
        let asset = Asset::new("node", body);
        db.put(guid, &format!("nodes/{n}"), "node", asset.to_bytes()).unwrap();
        guid
    }

    #[test]
    fn shared_dependency_is_deduplicated() {
        let ctx = context();
        let db = MemoryDatabase::new();
        let leaf = put(&db, 3, json!({}));
        let a = put(&db, 1, json!({ "deps": [leaf.to_string()] }));
        let b = put(&db, 2, json!({ "deps": [leaf.to_string()] }));

        let mut depends = Depends::new(&ctx, &db);
        depends.add_instance(a, DependencyFlags::BUILD);
        depends.add_instance(b, DependencyFlags::BUILD);
        let set = depends.finish();

        assert_eq!(set.len(), 3);
        let leaf_idx = set.find(leaf).unwrap();
        assert_eq!(set.by_guid(a).unwrap().children, vec![leaf_idx]);
        assert_eq!(set.by_guid(b).unwrap().children, vec![leaf_idx]);
        assert!(set.by_guid(leaf).unwrap().flags.contains(DependencyFlags::USE));
        assert_eq!(set.by_guid(leaf).unwrap().source_guid, leaf);
    }

    #[test]
    fn cycle_is_dropped() {
        let ctx = context();
        let db = MemoryDatabase::new();
        let a_guid = Guid::from_u128(1);
        let b = put(&db, 2, json!({ "deps": [a_guid.to_string()] }));
        let a = put(&db, 1, json!({ "deps": [b.to_string()] }));

        let mut depends = Depends::new(&ctx, &db);
        depends.add_instance(a, DependencyFlags::BUILD);
        let set = depends.finish();

        assert_eq!(set.len(), 2);
        assert!(set.by_guid(b).unwrap().children.is_empty());
        assert!(set.levels().is_ok());
    }

    #[test]
    fn missing_instance_becomes_failed_node() {
        let ctx = context();
        let db = MemoryDatabase::new();
        let ghost = Guid::from_u128(99);
        let a = put(&db, 1, json!({ "deps": [ghost.to_string()] }));

        let mut depends = Depends::new(&ctx, &db);
        depends.add_instance(a, DependencyFlags::BUILD);
        let set = depends.finish();

        let node = set.by_guid(ghost).unwrap();
        assert!(node.flags.contains(DependencyFlags::FAILED));
        assert!(!set.by_guid(a).unwrap().flags.contains(DependencyFlags::FAILED));
    }

    #[test]
    fn unknown_type_is_skipped() {
        let ctx = context();
        let db = MemoryDatabase::new();
        let guid = Guid::from_u128(1);
        db.put(guid, "misc/blob", "blob", b"{}".to_vec()).unwrap();

        let mut depends = Depends::new(&ctx, &db);
        assert!(depends.add_instance(guid, DependencyFlags::BUILD).is_none());
        assert!(depends.finish().is_empty());
    }

    #[test]
    fn files_are_captured_and_missing_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"pixels").unwrap();
        let ctx = context();
        let db = MemoryDatabase::new();
        let dir_str = dir.path().to_string_lossy().into_owned();
        let ok = put(&db, 1, json!({ "dir": dir_str, "files": ["a.png", "a.png"] }));
        let bad = put(&db, 2, json!({ "dir": dir_str, "files": ["gone.png"] }));

        let mut depends = Depends::new(&ctx, &db);
        depends.add_instance(ok, DependencyFlags::BUILD);
        depends.add_instance(bad, DependencyFlags::BUILD);
        let set = depends.finish();

        let ok_node = set.by_guid(ok).unwrap();
        assert_eq!(ok_node.files.len(), 1);
        assert!(ok_node.files[0].last_write > 0);
        assert!(set.by_guid(bad).unwrap().flags.contains(DependencyFlags::FAILED));
    }

    #[test]
    fn embedded_asset_merges_pipeline_hash() {
        let ctx = context();
        let db = MemoryDatabase::new();
        let plain = put(&db, 1, json!({}));
        let with_shader = put(&db, 2, json!({ "embedded": { "stage": "pixel" } }));

        let mut depends = Depends::new(&ctx, &db);
        depends.add_instance(plain, DependencyFlags::BUILD);
        depends.add_instance(with_shader, DependencyFlags::BUILD);
        let set = depends.finish();

        assert_eq!(set.len(), 2);
        assert_ne!(
            set.by_guid(plain).unwrap().pipeline_hash,
            set.by_guid(with_shader).unwrap().pipeline_hash
        );
    }

    #[test]
    fn depth_limit_stops_walk() {
        let mut ctx = context();
        ctx.config.build.max_depth = 1;
        let db = MemoryDatabase::new();
        let c = put(&db, 3, json!({}));
        let b = put(&db, 2, json!({ "deps": [c.to_string()] }));
        let a = put(&db, 1, json!({ "deps": [b.to_string()] }));

        let mut depends = Depends::new(&ctx, &db);
        depends.add_instance(a, DependencyFlags::BUILD);
        let set = depends.finish();

        assert!(set.find(b).is_some());
        assert!(set.find(c).is_none());
    }

    #[test]
    fn cancelled_walk_adds_nothing() {
        let ctx = context();
        let db = MemoryDatabase::new();
        let a = put(&db, 1, json!({}));
        let token = CancellationToken::new();
        token.cancel();
        let mut depends = Depends::new(&ctx, &db).with_cancellation(token);
        assert!(depends.add_instance(a, DependencyFlags::BUILD).is_none());
    }
}
