//! Error types for database access.

use kiln_common::Guid;

/// Errors reported by a [`Database`](crate::Database) implementation.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// No instance exists with the given identifier.
    #[error("no instance {guid}")]
    NotFound {
        /// The missing instance.
        guid: Guid,
    },

    /// The instance exists but has no data blob with the given name.
    #[error("instance {guid} has no data blob '{name}'")]
    DataNotFound {
        /// The instance that was read.
        guid: Guid,
        /// The requested blob name.
        name: String,
    },

    /// The nil identifier was used where a real instance is required.
    #[error("invalid nil guid for instance '{path}'")]
    NilGuid {
        /// The path the caller tried to use.
        path: String,
    },

    /// A transaction was committed without an object payload.
    #[error("transaction for {guid} has no object")]
    EmptyTransaction {
        /// The instance being written.
        guid: Guid,
    },

    /// The storage engine failed.
    #[error("database storage error: {reason}")]
    Storage {
        /// Description of the failure.
        reason: String,
    },
}
