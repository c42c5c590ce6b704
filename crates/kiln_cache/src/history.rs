//! Persistent build history.
//!
//! The history is stored as a single JSON document. It records, per output
//! identifier, the fingerprint and pipeline version of the last successful
//! build together with the timestamps of the external files it read. A
//! second table keeps the last known content hash of every hashed file or
//! data blob so unchanged inputs are not re-read.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use kiln_common::{Fingerprint, Guid};
use kiln_config::FileHashing;
use serde::{Deserialize, Serialize};

use crate::entry::write_atomic;
use crate::error::CacheError;

/// Current history document format. Documents with another version are
/// discarded on load.
const HISTORY_FORMAT_VERSION: u32 = 1;

/// State of the last successful build of one output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildHistoryRecord {
    /// Name of the pipeline that built it.
    pub pipeline: String,
    /// Version of that pipeline.
    pub pipeline_version: u32,
    /// The node's own fingerprint, without children.
    pub local: Fingerprint,
    /// The fingerprint with every consumed child folded in.
    pub combined: Fingerprint,
    /// Last-write stamps of the external files read, by path.
    pub file_timestamps: BTreeMap<String, u64>,
}

/// Last known hash of one file or data blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHashRecord {
    /// Last-write stamp when the hash was computed.
    pub last_write: u64,
    /// Size in bytes when the hash was computed.
    pub size: u64,
    /// 32-bit content hash.
    pub hash: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryDocument {
    format_version: u32,
    records: BTreeMap<Guid, BuildHistoryRecord>,
    files: BTreeMap<String, FileHashRecord>,
}

impl Default for HistoryDocument {
    fn default() -> Self {
        Self {
            format_version: HISTORY_FORMAT_VERSION,
            records: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }
}

/// Thread-safe build history, optionally backed by a file.
pub struct BuildHistoryStore {
    path: Option<PathBuf>,
    doc: Mutex<HistoryDocument>,
    dirty: AtomicBool,
}

impl BuildHistoryStore {
    /// Creates an empty store that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: Mutex::new(HistoryDocument::default()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Opens the history file at `path`.
    ///
    /// A missing, unreadable or incompatible file yields an empty store,
    /// which makes the next build a full one.
    pub fn open(path: &Path) -> Self {
        let doc = match Self::load(path) {
            Ok(Some(doc)) => doc,
            Ok(None) => HistoryDocument::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding build history");
                HistoryDocument::default()
            }
        };
        Self {
            path: Some(path.to_path_buf()),
            doc: Mutex::new(doc),
            dirty: AtomicBool::new(false),
        }
    }

    fn load(path: &Path) -> Result<Option<HistoryDocument>, CacheError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CacheError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        let doc: HistoryDocument =
            serde_json::from_str(&content).map_err(|e| CacheError::HistoryParse {
                reason: e.to_string(),
            })?;
        if doc.format_version != HISTORY_FORMAT_VERSION {
            return Err(CacheError::VersionMismatch {
                path: path.to_path_buf(),
                expected: HISTORY_FORMAT_VERSION,
                actual: doc.format_version,
            });
        }
        Ok(Some(doc))
    }

    /// Returns the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns the record for `guid`.
    pub fn get(&self, guid: Guid) -> Option<BuildHistoryRecord> {
        self.lock().records.get(&guid).cloned()
    }

    /// Stores the record for `guid`, replacing any previous one.
    pub fn set(&self, guid: Guid, record: BuildHistoryRecord) {
        self.lock().records.insert(guid, record);
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Removes the record for `guid`.
    pub fn remove(&self, guid: Guid) -> Option<BuildHistoryRecord> {
        let removed = self.lock().records.remove(&guid);
        if removed.is_some() {
            self.dirty.store(true, Ordering::Relaxed);
        }
        removed
    }

    /// Returns every record, sorted by identifier.
    pub fn records(&self) -> Vec<(Guid, BuildHistoryRecord)> {
        self.lock()
            .records
            .iter()
            .map(|(guid, record)| (*guid, record.clone()))
            .collect()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Returns `true` if there are no records.
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// Returns the number of entries in the file-hash table.
    pub fn file_hash_count(&self) -> usize {
        self.lock().files.len()
    }

    /// Returns the stored hash record for a file or blob key.
    pub fn file_hash(&self, key: &str) -> Option<FileHashRecord> {
        self.lock().files.get(key).copied()
    }

    /// Returns the hash of a file or blob, computing it only when needed.
    ///
    /// With [`FileHashing::Timestamp`], a stored hash whose stamp and size
    /// match is trusted. Otherwise `compute` runs and its result is stored.
    pub fn gated_hash<E>(
        &self,
        key: &str,
        last_write: u64,
        size: u64,
        mode: FileHashing,
        compute: impl FnOnce() -> Result<u32, E>,
    ) -> Result<u32, E> {
        if mode == FileHashing::Timestamp {
            if let Some(known) = self.file_hash(key) {
                if known.last_write == last_write && known.size == size {
                    return Ok(known.hash);
                }
            }
        }
        let hash = compute()?;
        let record = FileHashRecord {
            last_write,
            size,
            hash,
        };
        let previous = self.lock().files.insert(key.to_string(), record);
        if previous != Some(record) {
            self.dirty.store(true, Ordering::Relaxed);
        }
        Ok(hash)
    }

    /// Returns `true` if there are changes not yet saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    /// Writes the store to its file. In-memory stores and clean stores are
    /// left alone.
    pub fn save(&self) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.is_dirty() {
            return Ok(());
        }
        let json = {
            let doc = self.lock();
            serde_json::to_string_pretty(&*doc).map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?
        };
        write_atomic(path, json.as_bytes())?;
        self.dirty.store(false, Ordering::Relaxed);
        tracing::debug!(path = %path.display(), "saved build history");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HistoryDocument> {
        self.doc
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
