//! The build orchestrator.
//!
//! [`Builder::build`] visits a [`DependencySet`] level by level, leaves
//! first, so every child reaches a terminal state before any parent starts.
//! Nodes within one level are independent and run on the rayon pool when
//! parallel builds are enabled. For each node the builder computes the local
//! and combined fingerprints, classifies why (or whether) it must rebuild,
//! tries the build cache, and only then invokes the pipeline. Invocations are
//! memoized by combined fingerprint, so nodes that share a fingerprint run
//! their pipeline once per session.

mod context;
mod observer;
mod report;
mod session;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kiln_cache::{
    BuildCache, BuildHistoryRecord, BuildHistoryStore, CacheEntry, CacheError, CacheKey,
    FileHasher,
};
use kiln_common::{hash32, Fingerprint, Guid};
use kiln_config::{CacheMode, FileHashing};
use kiln_db::{isolate, restore, Database, DbError, InstanceInfo};
use rayon::prelude::*;
use serde_json::Value;

use crate::asset::Asset;
use crate::cancel::CancellationToken;
use crate::dependency::{BuildReason, DependencyFlags, DependencyNode};
use crate::dependency_set::DependencySet;
use crate::depends::Depends;
use crate::error::{BuildError, ErrorKind};
use crate::fingerprint;
use crate::pipeline::{BuildRequest, PipelineContext};

pub use context::BuildContext;
pub use observer::{BuildObserver, NullObserver};
pub use report::{BuildCounters, BuildReport, BuildResult, FailedNode, NodeResult};

use session::{Counters, Invocation, Session};

/// Terminal state of one visited node.
#[derive(Debug, Clone)]
struct NodeState {
    local: Fingerprint,
    combined: Fingerprint,
    reason: BuildReason,
    /// Set when the node's output differs from what the previous build left.
    changed: bool,
    result: Result<NodeResult, BuildError>,
}

impl NodeState {
    fn failed(&self) -> bool {
        matches!(&self.result, Err(e) if e.kind != ErrorKind::Cancelled)
    }
}

/// Options of one pass over a dependency set.
struct Run<'p> {
    rebuild: bool,
    parallel: bool,
    notify: bool,
    ad_hoc: Option<(usize, Option<&'p Value>)>,
}

impl Run<'_> {
    fn is_ad_hoc_root(&self, idx: usize) -> bool {
        matches!(self.ad_hoc, Some((root, _)) if root == idx)
    }

    fn params(&self, idx: usize) -> Option<&Value> {
        match self.ad_hoc {
            Some((root, params)) if root == idx => params,
            _ => None,
        }
    }
}

/// One build session over a set of collaborators.
///
/// In-session memoization lives as long as the builder, so one builder should
/// serve one logical build (a main walk plus any ad-hoc builds it triggers).
pub struct Builder<'a> {
    ctx: &'a PipelineContext,
    source_db: &'a dyn Database,
    output_db: &'a dyn Database,
    history: &'a BuildHistoryStore,
    cache: Option<&'a dyn BuildCache>,
    observer: &'a dyn BuildObserver,
    cancel: CancellationToken,
    session: Session,
}

impl<'a> Builder<'a> {
    /// Creates a builder without a cache or observer.
    pub fn new(
        ctx: &'a PipelineContext,
        source_db: &'a dyn Database,
        output_db: &'a dyn Database,
        history: &'a BuildHistoryStore,
    ) -> Self {
        Self {
            ctx,
            source_db,
            output_db,
            history,
            cache: None,
            observer: &NullObserver,
            cancel: CancellationToken::new(),
            session: Session::default(),
        }
    }

    /// Uses `cache` according to the configured cache mode.
    pub fn with_cache(mut self, cache: &'a dyn BuildCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Reports progress to `observer`.
    pub fn with_observer(mut self, observer: &'a dyn BuildObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Stops building once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns a dependency walker sharing this builder's context, source
    /// database and cancellation token.
    pub fn depends(&self) -> Depends<'a> {
        Depends::new(self.ctx, self.source_db).with_cancellation(self.cancel.clone())
    }

    /// Builds every node of `set`.
    ///
    /// With `rebuild`, every node is forced regardless of freshness. Node
    /// results are written back into the set: fingerprints, reasons and the
    /// failed flag. Per-node failures never abort the call; they are listed
    /// in the report.
    pub fn build(&self, set: &mut DependencySet, rebuild: bool) -> BuildReport {
        let run = Run {
            rebuild,
            parallel: self.ctx.config.build.parallel,
            notify: true,
            ad_hoc: None,
        };
        self.run(set, &run)
    }

    /// Builds one asset and its dependencies outside the main walk, writing
    /// its output at `output_path` under `output_guid`.
    ///
    /// Later walks in this session skip the output unless forced. Counters of
    /// ad-hoc builds started while a walk runs are added to that walk's
    /// report, counted per visit. Ad-hoc builds started outside a walk are
    /// not reported.
    pub fn build_ad_hoc_output(
        &self,
        asset: Asset,
        output_path: &str,
        output_guid: Guid,
        params: Option<&Value>,
    ) -> Result<(), BuildError> {
        if output_guid.is_nil() {
            return Err(BuildError::pipeline(format!(
                "ad-hoc output '{output_path}' has a nil identifier"
            )));
        }
        let type_name = asset.type_name.clone();
        let mut depends = self.depends();
        let root = depends
            .add_asset(asset, output_path, output_guid, DependencyFlags::BUILD)
            .ok_or_else(|| {
                if self.cancel.is_cancelled() {
                    BuildError::cancelled()
                } else {
                    BuildError::pipeline(format!("no pipeline for asset type '{type_name}'"))
                }
            })?;
        let mut set = depends.finish();

        let run = Run {
            rebuild: false,
            parallel: false,
            notify: false,
            ad_hoc: Some((root, params)),
        };
        let report = self.run(&mut set, &run);
        self.session.add_ad_hoc_counters(&report.counters);
        if let Some(failed) = report.failed.iter().find(|f| f.guid == output_guid) {
            return Err(BuildError::new(failed.kind, failed.message.clone()).for_guid(output_guid));
        }
        if report.result == BuildResult::Cancelled {
            return Err(BuildError::cancelled().for_guid(output_guid));
        }
        self.session.mark_ad_hoc(output_guid);
        Ok(())
    }

    /// Builds an in-memory product of `asset`, at most once per asset,
    /// params and pipeline within this session.
    pub fn build_product(
        &self,
        source: Option<&InstanceInfo>,
        asset: &Asset,
        params: Option<&Value>,
    ) -> Result<Arc<Asset>, BuildError> {
        let pipeline = self.ctx.find(&asset.type_name).ok_or_else(|| {
            BuildError::pipeline(format!("no pipeline for asset type '{}'", asset.type_name))
        })?;
        let key = (
            asset.deep_hash(),
            fingerprint::params_hash(params),
            self.ctx.pipeline_hash(pipeline.as_ref()),
        );
        self.session
            .product_cell(key)
            .get_or_init(|| {
                tracing::debug!(type_name = %asset.type_name, "building product");
                pipeline.build_product(source, asset, params).map(Arc::new)
            })
            .clone()
    }

    /// Returns the deep structural hash of `asset`, the value its node's
    /// source asset hash would take.
    pub fn calculate_inclusive_hash(&self, asset: &Asset) -> u32 {
        asset.deep_hash()
    }

    fn cache(&self) -> Option<&'a dyn BuildCache> {
        match self.ctx.config.cache.mode {
            CacheMode::Off => None,
            _ => self.cache,
        }
    }

    fn file_hashing(&self) -> FileHashing {
        self.ctx.config.history.file_hashing
    }

    fn run(&self, set: &mut DependencySet, run: &Run<'_>) -> BuildReport {
        let counters = Counters::default();
        if run.ad_hoc.is_none() {
            self.session.take_ad_hoc_counters();
        }
        let levels = match set.levels() {
            Ok(levels) => levels,
            Err(e) => {
                tracing::error!(error = %e, "cannot order dependency set");
                return BuildReport {
                    result: BuildResult::Failed,
                    counters: counters.snapshot(),
                    failed: Vec::new(),
                };
            }
        };

        let forced = if run.rebuild {
            vec![true; set.len()]
        } else {
            let roots = (0..set.len()).filter(|&idx| {
                set.get(idx)
                    .is_some_and(|n| n.flags.contains(DependencyFlags::FORCE_ADD))
            });
            set.descendants(roots)
        };

        if run.notify {
            self.observer.on_build_start(set.len());
        }

        let pool = if run.parallel && self.ctx.config.build.threads > 0 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(self.ctx.config.build.threads)
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    tracing::warn!(error = %e, "cannot create build thread pool; using the global pool");
                    None
                }
            }
        } else {
            None
        };

        let progress = AtomicUsize::new(0);
        let mut states: Vec<Option<NodeState>> = vec![None; set.len()];
        for level in &levels {
            if self.cancel.is_cancelled() {
                break;
            }
            let results = {
                let set: &DependencySet = set;
                let states = &states;
                let work = |idx: &usize| -> Option<(usize, NodeState)> {
                    let node = set.get(*idx)?;
                    let state = self.visit(set, *idx, node, states, forced[*idx], run, &counters);
                    if run.notify && !matches!(&state.result, Err(e) if e.kind == ErrorKind::Cancelled) {
                        let index = progress.fetch_add(1, Ordering::Relaxed);
                        let result = state.result.clone().unwrap_or(NodeResult::Failed);
                        self.observer.on_build_progress(node, index, result);
                    }
                    Some((*idx, state))
                };
                let visit_level = || -> Vec<(usize, NodeState)> {
                    if run.parallel {
                        level.par_iter().filter_map(&work).collect()
                    } else {
                        level.iter().filter_map(&work).collect()
                    }
                };
                match &pool {
                    Some(pool) => pool.install(visit_level),
                    None => visit_level(),
                }
            };

            for (idx, state) in results {
                if let Some(node) = set.get_mut(idx) {
                    node.fingerprint = state.local;
                    node.reason = state.reason;
                    if let Err(e) = &state.result {
                        if state.failed() {
                            node.fail(e.message.clone());
                        }
                    }
                }
                states[idx] = Some(state);
            }
        }

        let cancelled = self.cancel.is_cancelled();
        let failed: Vec<FailedNode> = states
            .iter()
            .enumerate()
            .filter_map(|(idx, state)| {
                let state = state.as_ref()?;
                let Err(error) = &state.result else {
                    return None;
                };
                if !state.failed() {
                    return None;
                }
                let node = set.get(idx)?;
                Some(FailedNode {
                    guid: node.output_guid,
                    source_guid: node.source_guid,
                    path: node.output_path.clone(),
                    pipeline: node.pipeline.clone(),
                    reason: state.reason,
                    kind: error.kind,
                    message: error.message.clone(),
                })
            })
            .collect();

        if let Err(e) = self.history.save() {
            tracing::warn!(error = %e, "cannot save build history");
        }

        let mut counters = counters.snapshot();
        if run.ad_hoc.is_none() {
            counters += self.session.take_ad_hoc_counters();
        }
        let result = if cancelled {
            tracing::warn!(
                succeeded = counters.succeeded,
                failed = counters.failed,
                "Build aborted"
            );
            BuildResult::Cancelled
        } else {
            tracing::info!(
                "Build finished; {} succeeded ({} built), {} failed",
                counters.succeeded,
                counters.succeeded_built,
                counters.failed
            );
            if failed.is_empty() {
                BuildResult::Succeeded
            } else {
                BuildResult::Failed
            }
        };
        if run.notify {
            self.observer.on_build_end();
        }
        BuildReport {
            result,
            counters,
            failed,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &self,
        set: &DependencySet,
        idx: usize,
        node: &DependencyNode,
        states: &[Option<NodeState>],
        forced: bool,
        run: &Run<'_>,
        counters: &Counters,
    ) -> NodeState {
        let mut state = NodeState {
            local: node.fingerprint,
            combined: node.fingerprint,
            reason: BuildReason::NONE,
            changed: false,
            result: Ok(NodeResult::Succeeded),
        };
        let guid = node.output_guid;

        if self.cancel.is_cancelled() {
            state.result = Err(BuildError::cancelled().for_guid(guid));
            return state;
        }
        if node.flags.contains(DependencyFlags::FAILED) {
            let message = node.error.clone().unwrap_or_else(|| "dependency walk failed".into());
            return self.fail(node, state, counters, BuildError::source_unavailable(message));
        }

        let (local, file_timestamps) = match self.local_fingerprint(node) {
            Ok(fp) => fp,
            Err(e) => return self.fail(node, state, counters, e),
        };

        let children: Vec<(&DependencyNode, &NodeState)> = node
            .children
            .iter()
            .filter_map(|&c| Some((set.get(c)?, states.get(c)?.as_ref()?)))
            .collect();
        let used: Vec<Fingerprint> = children
            .iter()
            .filter(|(child, _)| child.flags.contains(DependencyFlags::USE))
            .map(|(_, s)| s.combined)
            .collect();
        let combined = fingerprint::combine(local, &used);
        state.local = local;
        state.combined = combined;

        let ad_hoc_root = run.is_ad_hoc_root(idx);
        if !forced && !ad_hoc_root && self.session.is_ad_hoc(guid) {
            tracing::debug!(%guid, "already built ad hoc this session");
            Counters::bump(&counters.skipped);
            Counters::bump(&counters.succeeded);
            return state;
        }

        let mut reason = self.classify(node, local, combined, &children);
        if forced {
            reason |= BuildReason::FORCED;
        }
        if ad_hoc_root {
            reason |= BuildReason::AD_HOC;
        }
        state.reason = reason;

        let record = BuildHistoryRecord {
            pipeline: node.pipeline.clone(),
            pipeline_version: node.pipeline_version,
            local,
            combined,
            file_timestamps,
        };

        if !node.is_build() {
            if !reason.is_empty() {
                self.history.set(guid, record);
            }
            state.changed = reason.contains(BuildReason::SOURCE_MODIFIED);
            Counters::bump(&counters.succeeded);
            return state;
        }
        if reason.is_empty() {
            tracing::trace!(%guid, path = %node.output_path, "up to date");
            Counters::bump(&counters.skipped);
            Counters::bump(&counters.succeeded);
            return state;
        }

        let failed_children: Vec<Guid> = children
            .iter()
            .filter(|(_, s)| s.failed())
            .map(|(child, _)| child.output_guid)
            .collect();

        // A failed child keeps its fingerprint, so a degraded build must
        // neither come from nor go to the cache under the clean key.
        let params = run.params(idx);
        let cache = if params.is_none() && failed_children.is_empty() {
            self.cache()
        } else {
            None
        };
        if !failed_children.is_empty() {
            tracing::debug!(%guid, failed = failed_children.len(), "children failed; bypassing cache");
        }
        let key = CacheKey::new(guid, combined);

        if let Some(cache) = cache {
            if self.ctx.config.cache.mode == CacheMode::Void {
                Counters::bump(&counters.cache_void);
            } else if !reason.contains(BuildReason::FORCED) {
                match self.lookup(cache, &key) {
                    Some(entry) => match self.restore_entry(&entry) {
                        Ok(changed) => {
                            tracing::info!(%guid, path = %node.output_path, "Cached instance(s) used");
                            self.history.set(guid, record);
                            Counters::bump(&counters.cache_hit);
                            Counters::bump(&counters.succeeded);
                            Counters::bump(&counters.succeeded_built);
                            state.changed = changed;
                            return state;
                        }
                        Err(e) => {
                            tracing::warn!(%guid, error = %e, "cannot restore cached outputs; building");
                            Counters::bump(&counters.cache_miss);
                        }
                    },
                    None => Counters::bump(&counters.cache_miss),
                }
            }
        }

        tracing::info!(%guid, reason = %reason, "Building asset {}", node.output_path);

        let invocation = if params.is_some() || !failed_children.is_empty() {
            self.invoke(node, local, reason, params, failed_children)
        } else {
            let mut invoked = false;
            let result = self
                .session
                .output_cell(combined)
                .get_or_init(|| {
                    invoked = true;
                    self.invoke(node, local, reason, None, failed_children)
                })
                .clone();
            if !invoked {
                tracing::debug!(%guid, fingerprint = %combined, "reusing outputs of an identical build");
            }
            result
        };
        let invocation = match invocation {
            Ok(invocation) => invocation,
            Err(e) => return self.fail(node, state, counters, e),
        };

        let outputs = invocation.outputs_for(node);
        for output in &outputs {
            if let Err(e) = restore(self.output_db, output) {
                let error = BuildError::pipeline(format!(
                    "cannot commit output '{}': {e}",
                    output.path
                ));
                return self.fail(node, state, counters, error);
            }
            self.session.remember_read(output.clone());
        }

        if let Some(cache) = cache {
            let child_keys: Vec<CacheKey> = children
                .iter()
                .filter(|(_, s)| s.result.is_ok())
                .map(|(child, s)| CacheKey::new(child.output_guid, s.combined))
                .filter(|k| cache.contains(k))
                .collect();
            let entry = CacheEntry::new(outputs, child_keys);
            if let Err(e) = self.retry(|| cache.put(&key, &entry)) {
                let error = BuildError::new(ErrorKind::CacheWriteFailed, e.to_string()).for_guid(guid);
                tracing::warn!(%guid, error = %e, "cannot store build in cache");
                Counters::bump(&counters.cache_write_failed);
                self.observer.on_cache_write_failed(node, &error);
            }
        }

        self.history.set(guid, record);
        for warning in &invocation.warnings {
            tracing::warn!(%guid, path = %node.output_path, "{warning}");
        }
        tracing::info!(%guid, path = %node.output_path, "Build successful");
        Counters::bump(&counters.succeeded);
        Counters::bump(&counters.succeeded_built);
        state.changed = true;
        state.result = Ok(if invocation.warnings.is_empty() {
            NodeResult::Succeeded
        } else {
            NodeResult::SucceededWithWarnings
        });
        state
    }

    fn fail(
        &self,
        node: &DependencyNode,
        mut state: NodeState,
        counters: &Counters,
        error: BuildError,
    ) -> NodeState {
        let error = error.for_guid(node.output_guid);
        if error.kind == ErrorKind::Cancelled {
            state.result = Err(error);
            return state;
        }
        tracing::error!(
            guid = %node.output_guid,
            path = %node.output_path,
            pipeline = %node.pipeline,
            error = %error,
            "Build failed"
        );
        self.history.remove(node.output_guid);
        Counters::bump(&counters.failed);
        state.changed = false;
        state.result = Err(error);
        state
    }

    fn classify(
        &self,
        node: &DependencyNode,
        local: Fingerprint,
        combined: Fingerprint,
        children: &[(&DependencyNode, &NodeState)],
    ) -> BuildReason {
        let mut reason = BuildReason::NONE;
        match self.history.get(node.output_guid) {
            Some(record)
                if record.pipeline == node.pipeline
                    && record.pipeline_version == node.pipeline_version =>
            {
                if record.local != local {
                    reason |= BuildReason::SOURCE_MODIFIED;
                    if record.local.source_asset_hash != local.source_asset_hash {
                        reason |= BuildReason::ASSET_MODIFIED;
                    }
                } else if record.combined != combined {
                    reason |= BuildReason::DEPENDENCY_MODIFIED;
                }
            }
            Some(_) => reason |= BuildReason::SOURCE_MODIFIED,
            None => reason |= BuildReason::SOURCE_MODIFIED | BuildReason::ASSET_MODIFIED,
        }
        if children.iter().any(|(_, s)| s.changed || s.failed()) {
            reason |= BuildReason::DEPENDENCY_MODIFIED;
        }
        reason
    }

    /// Computes a node's own fingerprint and the stamps of its external files.
    fn local_fingerprint(
        &self,
        node: &DependencyNode,
    ) -> Result<(Fingerprint, BTreeMap<String, u64>), BuildError> {
        let source_asset_hash = node.source_asset.deep_hash();
        let source_data_hash = if node.is_instance() {
            self.source_data_hash(node.source_guid)?
        } else {
            0
        };

        let mut files: Vec<_> = node.files.iter().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let hasher = FileHasher::new(self.history, self.file_hashing());
        let mut hashes = Vec::with_capacity(files.len());
        let mut stamps = BTreeMap::new();
        for file in files {
            let (hash, _) = hasher
                .hash(&file.path)
                .map_err(|e| BuildError::source_unavailable(e.to_string()))?;
            let key = file.path.to_string_lossy().into_owned();
            stamps.insert(key.clone(), file.last_write);
            hashes.push((key, hash));
        }
        let files_hash = fingerprint::files_hash(hashes.iter().map(|(k, h)| (k.as_str(), *h)));

        Ok((
            Fingerprint::new(node.pipeline_hash, source_asset_hash, source_data_hash, files_hash),
            stamps,
        ))
    }

    /// Hashes the data blobs of a source instance. Blobs are gated on their
    /// database stamp alone.
    fn source_data_hash(&self, guid: Guid) -> Result<u32, BuildError> {
        let unavailable = |e: DbError| BuildError::source_unavailable(e.to_string());
        let names = self.source_db.data_names(guid).map_err(unavailable)?;
        let mut hashes = Vec::with_capacity(names.len());
        for name in &names {
            let key = format!("{guid}/{name}");
            let stamp = self.source_db.data_last_write(guid, name).unwrap_or(0);
            let hash = self
                .history
                .gated_hash(&key, stamp, 0, self.file_hashing(), || {
                    self.source_db.read_data(guid, name).map(|bytes| hash32(&bytes))
                })
                .map_err(unavailable)?;
            hashes.push((name.as_str(), hash));
        }
        Ok(fingerprint::data_hash(hashes))
    }

    fn invoke(
        &self,
        node: &DependencyNode,
        local: Fingerprint,
        reason: BuildReason,
        params: Option<&Value>,
        failed_children: Vec<Guid>,
    ) -> Result<Invocation, BuildError> {
        let pipeline = self.ctx.registry.by_name(&node.pipeline).ok_or_else(|| {
            BuildError::pipeline(format!("pipeline '{}' is not registered", node.pipeline))
        })?;
        let source = if node.is_instance() {
            self.source_db.instance(node.source_guid)
        } else {
            None
        };
        let request = BuildRequest {
            source: source.as_ref(),
            asset: &node.source_asset,
            source_asset_hash: local.source_asset_hash,
            output_path: &node.output_path,
            output_guid: node.output_guid,
            params,
            reason,
        };
        let mut ctx = BuildContext::new(self, failed_children);
        pipeline.build_output(&mut ctx, &request)?;
        let (outputs, warnings) = ctx.finish();
        Ok(Invocation {
            primary: node.output_guid,
            outputs,
            warnings,
        })
    }

    fn lookup(&self, cache: &dyn BuildCache, key: &CacheKey) -> Option<CacheEntry> {
        match self.retry(|| cache.get(key)) {
            Ok(entry) => entry,
            Err(e) if e.is_corruption() => {
                tracing::warn!(
                    key = %key,
                    kind = %ErrorKind::HashMismatchInternal,
                    error = %e,
                    "ignoring inconsistent cache entry"
                );
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache lookup failed");
                None
            }
        }
    }

    /// Writes cached outputs into the output database. Returns `true` if any
    /// of them differs from what the database held.
    fn restore_entry(&self, entry: &CacheEntry) -> Result<bool, DbError> {
        let mut changed = false;
        for output in &entry.outputs {
            let same = isolate(self.output_db, output.guid)
                .map(|current| current.payload_hash() == output.payload_hash())
                .unwrap_or(false);
            if !same {
                restore(self.output_db, output)?;
                changed = true;
            }
            self.session.remember_read(output.clone());
        }
        Ok(changed)
    }

    fn retry<T>(&self, mut op: impl FnMut() -> Result<T, CacheError>) -> Result<T, CacheError> {
        let retries = self.ctx.config.cache.retries;
        let mut attempt = 0;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < retries => {
                    attempt += 1;
                    tracing::debug!(attempt, error = %e, "retrying cache operation");
                }
                other => return other,
            }
        }
    }
}
