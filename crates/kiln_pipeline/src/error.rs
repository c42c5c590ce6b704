//! Build error taxonomy.

use std::fmt;

use kiln_common::Guid;

/// Classification of a build failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A source asset, data blob or external file could not be read.
    SourceUnavailable,
    /// A cache entry was read but failed a self-consistency check.
    HashMismatchInternal,
    /// The pipeline's transformation reported failure.
    PipelineInvocationFailed,
    /// The cache storage layer failed to store an entry.
    CacheWriteFailed,
    /// The build was cancelled before the node completed.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SourceUnavailable => "source unavailable",
            ErrorKind::HashMismatchInternal => "cache entry inconsistent",
            ErrorKind::PipelineInvocationFailed => "pipeline failed",
            ErrorKind::CacheWriteFailed => "cache write failed",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A build failure attributed to one node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BuildError {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Output identifier of the node, if known.
    pub guid: Option<Guid>,
    /// Human-readable description.
    pub message: String,
}

impl BuildError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            guid: None,
            message: message.into(),
        }
    }

    /// Shorthand for [`ErrorKind::SourceUnavailable`].
    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SourceUnavailable, message)
    }

    /// Shorthand for [`ErrorKind::PipelineInvocationFailed`].
    pub fn pipeline(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PipelineInvocationFailed, message)
    }

    /// Shorthand for [`ErrorKind::Cancelled`].
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "build cancelled")
    }

    /// Attaches the node identifier.
    pub fn for_guid(mut self, guid: Guid) -> Self {
        self.guid = Some(guid);
        self
    }
}

/// Errors raised while registering pipelines.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Two pipelines claim the same asset type.
    #[error("asset type '{type_name}' is handled by both '{existing}' and '{added}'")]
    DuplicateType {
        /// The contested asset type.
        type_name: String,
        /// Pipeline registered first.
        existing: String,
        /// Pipeline being registered.
        added: String,
    },

    /// Two pipelines share a name.
    #[error("pipeline '{name}' is already registered")]
    DuplicateName {
        /// The repeated name.
        name: String,
    },
}
