//! In-session memoization shared by all nodes of one builder.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use kiln_common::{Fingerprint, Guid};
use kiln_db::OutputInstance;

use crate::asset::Asset;
use crate::dependency::DependencyNode;
use crate::error::BuildError;

use super::report::BuildCounters;

/// A memo cell: the first caller computes the value, later callers block
/// until it is ready and then share it.
pub(crate) type Memo<T> = Arc<OnceLock<Result<T, BuildError>>>;

/// Product memo key: asset hash, params hash, pipeline hash.
pub(crate) type ProductKey = (u32, u32, u32);

/// Outputs of one pipeline invocation.
#[derive(Debug, Clone)]
pub(crate) struct Invocation {
    /// Output identifier of the node that ran the pipeline.
    pub primary: Guid,
    /// Staged outputs, primary included.
    pub outputs: Vec<OutputInstance>,
    /// Warnings the pipeline emitted.
    pub warnings: Vec<String>,
}

impl Invocation {
    /// Returns the outputs as `node` would have produced them: the primary
    /// output moves to the node's identifier and path.
    pub fn outputs_for(&self, node: &DependencyNode) -> Vec<OutputInstance> {
        self.outputs
            .iter()
            .map(|out| {
                if out.guid == self.primary {
                    out.retarget(node.output_guid, &node.output_path)
                } else {
                    out.clone()
                }
            })
            .collect()
    }
}

#[derive(Default)]
pub(crate) struct Session {
    products: Mutex<HashMap<ProductKey, Memo<Arc<Asset>>>>,
    outputs: Mutex<HashMap<Fingerprint, Memo<Invocation>>>,
    read_cache: Mutex<HashMap<Guid, OutputInstance>>,
    ad_hoc: Mutex<HashSet<Guid>>,
    ad_hoc_counters: Mutex<BuildCounters>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    pub fn product_cell(&self, key: ProductKey) -> Memo<Arc<Asset>> {
        Arc::clone(lock(&self.products).entry(key).or_default())
    }

    pub fn output_cell(&self, fingerprint: Fingerprint) -> Memo<Invocation> {
        Arc::clone(lock(&self.outputs).entry(fingerprint).or_default())
    }

    pub fn cached_read(&self, guid: Guid) -> Option<OutputInstance> {
        lock(&self.read_cache).get(&guid).cloned()
    }

    pub fn remember_read(&self, instance: OutputInstance) {
        lock(&self.read_cache).insert(instance.guid, instance);
    }

    pub fn mark_ad_hoc(&self, guid: Guid) {
        lock(&self.ad_hoc).insert(guid);
    }

    pub fn is_ad_hoc(&self, guid: Guid) -> bool {
        lock(&self.ad_hoc).contains(&guid)
    }

    pub fn add_ad_hoc_counters(&self, counters: &BuildCounters) {
        *lock(&self.ad_hoc_counters) += *counters;
    }

    /// Returns and clears the counters of ad-hoc builds since the last call.
    pub fn take_ad_hoc_counters(&self) -> BuildCounters {
        std::mem::take(&mut *lock(&self.ad_hoc_counters))
    }
}

/// Atomic counters of one build run.
#[derive(Default)]
pub(crate) struct Counters {
    pub succeeded: AtomicUsize,
    pub succeeded_built: AtomicUsize,
    pub failed: AtomicUsize,
    pub cache_hit: AtomicUsize,
    pub cache_miss: AtomicUsize,
    pub cache_void: AtomicUsize,
    pub skipped: AtomicUsize,
    pub cache_write_failed: AtomicUsize,
}

impl Counters {
    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BuildCounters {
        let get = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        BuildCounters {
            succeeded: get(&self.succeeded),
            succeeded_built: get(&self.succeeded_built),
            failed: get(&self.failed),
            cache_hit: get(&self.cache_hit),
            cache_miss: get(&self.cache_miss),
            cache_void: get(&self.cache_void),
            skipped: get(&self.skipped),
            cache_write_failed: get(&self.cache_write_failed),
        }
    }
}
