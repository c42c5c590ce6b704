//! Build progress callbacks.

use crate::dependency::DependencyNode;
use crate::error::BuildError;

use super::report::NodeResult;

/// Receives progress notifications during [`Builder::build`](super::Builder::build).
///
/// Calls may arrive from several worker threads at once.
pub trait BuildObserver: Send + Sync {
    /// The build is about to visit `count` nodes.
    fn on_build_start(&self, count: usize) {
        let _ = count;
    }

    /// A node reached a terminal state. `index` counts visited nodes from zero.
    fn on_build_progress(&self, node: &DependencyNode, index: usize, result: NodeResult) {
        let _ = (node, index, result);
    }

    /// The build finished or was cancelled.
    fn on_build_end(&self) {}

    /// A node built fine but its cache entry could not be stored.
    fn on_cache_write_failed(&self, node: &DependencyNode, error: &BuildError) {
        let _ = (node, error);
    }
}

/// Ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl BuildObserver for NullObserver {}
