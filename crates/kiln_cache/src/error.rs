//! Error types for cache and history operations.

use std::path::PathBuf;

use crate::entry::CacheKey;

/// Errors that can occur during cache and history operations.
///
/// Reads are fail-safe: the builder turns every read error into a cache miss.
/// Transient errors are retried before giving up.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A cache, history or external file could not be read or written.
    #[error("cannot access {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The history file is not a valid history document.
    #[error("unreadable build history: {reason}")]
    HistoryParse {
        /// Description of the parse failure.
        reason: String,
    },

    /// An entry file is truncated or does not start with the entry magic.
    #[error("bad entry header in {path}: {reason}")]
    InvalidHeader {
        /// The entry file path.
        path: PathBuf,
        /// Description of the header problem.
        reason: String,
    },

    /// The payload does not hash to the checksum stored in the header.
    #[error("payload of {path} hashes to {actual}, header says {expected}")]
    ChecksumMismatch {
        /// The entry file path.
        path: PathBuf,
        /// The expected checksum from the header.
        expected: String,
        /// The actual checksum computed from the payload.
        actual: String,
    },

    /// The file was written by another entry or history format version.
    #[error("{path} has format version {actual}, this build reads {expected}")]
    VersionMismatch {
        /// The entry file path.
        path: PathBuf,
        /// The expected format version.
        expected: u32,
        /// The actual format version found in the file.
        actual: u32,
    },

    /// An entry decoded cleanly but describes a different key.
    #[error("entry at {path} holds {found}, expected {expected}")]
    KeyMismatch {
        /// The entry file path.
        path: PathBuf,
        /// The key the file name promised.
        expected: CacheKey,
        /// The key stored inside the entry.
        found: CacheKey,
    },

    /// A child key listed by an entry is not present in the cache.
    #[error("entry {key} references missing child {child}")]
    MissingChild {
        /// The entry being written or read.
        key: CacheKey,
        /// The child that is absent.
        child: CacheKey,
    },

    /// An entry or history document could not be encoded or decoded.
    #[error("cannot encode or decode: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// The storage backend is temporarily unavailable.
    #[error("cache backend unavailable: {reason}")]
    Unavailable {
        /// Description of the outage.
        reason: String,
    },
}

impl CacheError {
    /// Returns `true` if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            CacheError::Unavailable { .. } => true,
            CacheError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Returns `true` if an entry was found but failed a self-consistency check.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            CacheError::InvalidHeader { .. }
                | CacheError::ChecksumMismatch { .. }
                | CacheError::VersionMismatch { .. }
                | CacheError::KeyMismatch { .. }
                | CacheError::MissingChild { .. }
                | CacheError::Serialization { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_common::{Fingerprint, Guid};

    fn key(n: u128) -> CacheKey {
        CacheKey::new(Guid::from_u128(n), Fingerprint::new(1, 2, 3, 4))
    }

    fn io(kind: std::io::ErrorKind) -> CacheError {
        CacheError::Io {
            path: PathBuf::from(".kiln/cache/entries/a.entry"),
            source: std::io::Error::new(kind, "boom"),
        }
    }

    #[test]
    fn io_names_the_path() {
        let msg = io(std::io::ErrorKind::NotFound).to_string();
        assert!(msg.starts_with("cannot access .kiln/cache/entries/a.entry"));
    }

    #[test]
    fn version_display_reads_both_sides() {
        let err = CacheError::VersionMismatch {
            path: PathBuf::from("history.json"),
            expected: 3,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "history.json has format version 1, this build reads 3"
        );
    }

    #[test]
    fn missing_child_names_both_keys() {
        let err = CacheError::MissingChild {
            key: key(1),
            child: key(2),
        };
        let msg = err.to_string();
        assert!(msg.contains(&key(1).to_string()));
        assert!(msg.contains(&key(2).to_string()));
    }

    #[test]
    fn only_outages_are_retried() {
        assert!(io(std::io::ErrorKind::TimedOut).is_transient());
        assert!(io(std::io::ErrorKind::Interrupted).is_transient());
        assert!(!io(std::io::ErrorKind::PermissionDenied).is_transient());
        assert!(CacheError::Unavailable {
            reason: "remote store offline".to_string()
        }
        .is_transient());
        assert!(!CacheError::MissingChild {
            key: key(1),
            child: key(2),
        }
        .is_transient());
    }

    #[test]
    fn inconsistent_entries_are_misses() {
        let checksum = CacheError::ChecksumMismatch {
            path: PathBuf::from("a.entry"),
            expected: "00ff".to_string(),
            actual: "ff00".to_string(),
        };
        assert!(checksum.is_corruption());
        assert!(CacheError::KeyMismatch {
            path: PathBuf::from("a.entry"),
            expected: key(1),
            found: key(2),
        }
        .is_corruption());
        assert!(!io(std::io::ErrorKind::NotFound).is_corruption());
        assert!(!CacheError::HistoryParse {
            reason: "eof".to_string()
        }
        .is_corruption());
    }
}
