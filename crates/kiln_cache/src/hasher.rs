//! External file hashing with timestamp gating.
//!
//! Files are hashed by streaming their contents through a 32-bit hasher. The
//! history store remembers each file's last-write stamp, size and hash so an
//! unchanged file is not read again unless content hashing is forced.

use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use kiln_common::Hasher32;
use kiln_config::FileHashing;

use crate::error::CacheError;
use crate::history::BuildHistoryStore;

/// Size and modification stamp of a file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    /// Last-write time in nanoseconds since the Unix epoch.
    pub last_write: u64,
    /// Size in bytes.
    pub size: u64,
}

/// Hashes external files, consulting the history's file-hash table.
pub struct FileHasher<'a> {
    history: &'a BuildHistoryStore,
    mode: FileHashing,
}

impl<'a> FileHasher<'a> {
    /// Creates a hasher recording into `history`.
    pub fn new(history: &'a BuildHistoryStore, mode: FileHashing) -> Self {
        Self { history, mode }
    }

    /// Reads the stamp of a file.
    pub fn stamp(path: &Path) -> Result<FileStamp, CacheError> {
        let meta = std::fs::metadata(path).map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let last_write = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Ok(FileStamp {
            last_write,
            size: meta.len(),
        })
    }

    /// Computes the 32-bit content hash of a file.
    pub fn hash_file(path: &Path) -> Result<u32, CacheError> {
        let io_err = |e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        let mut file = std::fs::File::open(path).map_err(io_err)?;
        let mut hasher = Hasher32::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).map_err(io_err)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.digest())
    }

    /// Returns the hash of `path`, re-reading it only when its stamp differs
    /// from the recorded one or content hashing is forced.
    pub fn hash(&self, path: &Path) -> Result<(u32, FileStamp), CacheError> {
        let stamp = Self::stamp(path)?;
        let key = path.to_string_lossy();
        let hash = self
            .history
            .gated_hash(&key, stamp.last_write, stamp.size, self.mode, || {
                tracing::trace!(path = %path.display(), "hashing file contents");
                Self::hash_file(path)
            })?;
        Ok((hash, stamp))
    }
}
