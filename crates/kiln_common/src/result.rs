//! Errors signalling bugs inside kiln rather than failed builds.

/// Result of an operation that only fails when kiln's own bookkeeping is
/// inconsistent. Failed asset builds are never reported through this type.
pub type KilnResult<T> = Result<T, InternalError>;

/// An inconsistency in a dependency set or other internal structure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InternalError {
    /// A node index points past the end of its set.
    #[error("internal error: node index {index} out of range (set has {len} nodes)")]
    NodeOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of nodes in the set.
        len: usize,
    },

    /// Child edges form a cycle through this node.
    #[error("internal error: dependency cycle through node {node}")]
    Cycle {
        /// Index of a node on the cycle.
        node: usize,
    },
}
