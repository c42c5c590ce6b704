//! Build outcomes reported to the host.

use std::fmt;
use std::ops::AddAssign;

use kiln_common::Guid;

use crate::dependency::BuildReason;
use crate::error::ErrorKind;

/// Overall outcome of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildResult {
    /// Every visited node succeeded.
    Succeeded,
    /// At least one node failed.
    Failed,
    /// The build was cancelled before all nodes were visited.
    Cancelled,
}

/// Outcome of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeResult {
    /// Up to date, restored, or built cleanly.
    Succeeded,
    /// Built, but the pipeline reported warnings.
    SucceededWithWarnings,
    /// The node failed.
    Failed,
}

/// Per-build counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildCounters {
    /// Nodes that ended successfully, whether skipped, restored or built.
    pub succeeded: usize,
    /// Successful nodes whose outputs were written, by a pipeline or from
    /// the cache.
    pub succeeded_built: usize,
    /// Nodes that failed.
    pub failed: usize,
    /// Nodes restored from the build cache.
    pub cache_hit: usize,
    /// Cache lookups that found nothing usable.
    pub cache_miss: usize,
    /// Lookups skipped because the cache is voided.
    pub cache_void: usize,
    /// Nodes skipped as up to date.
    pub skipped: usize,
    /// Cache writes that failed.
    pub cache_write_failed: usize,
}

impl AddAssign for BuildCounters {
    fn add_assign(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.succeeded_built += other.succeeded_built;
        self.failed += other.failed;
        self.cache_hit += other.cache_hit;
        self.cache_miss += other.cache_miss;
        self.cache_void += other.cache_void;
        self.skipped += other.skipped;
        self.cache_write_failed += other.cache_write_failed;
    }
}

/// A node that failed, as reported to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedNode {
    /// Output identifier.
    pub guid: Guid,
    /// Source instance identifier; nil for embedded assets.
    pub source_guid: Guid,
    /// Output path.
    pub path: String,
    /// Pipeline name; empty if the source could not be read.
    pub pipeline: String,
    /// Build reason at the time of failure.
    pub reason: BuildReason,
    /// Failure classification.
    pub kind: ErrorKind,
    /// Failure description.
    pub message: String,
}

impl fmt::Display for FailedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) [{}]: {}", self.path, self.guid, self.kind, self.message)
    }
}

/// Result of [`Builder::build`](super::Builder::build).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Overall outcome.
    pub result: BuildResult,
    /// Counters for this build.
    pub counters: BuildCounters,
    /// Every node that failed, in set order.
    pub failed: Vec<FailedNode>,
}

impl BuildReport {
    /// Returns `true` if the build succeeded.
    pub fn is_success(&self) -> bool {
        self.result == BuildResult::Succeeded
    }

    /// Returns the output identifiers of the failed nodes.
    pub fn failed_guids(&self) -> Vec<Guid> {
        self.failed.iter().map(|f| f.guid).collect()
    }
}
