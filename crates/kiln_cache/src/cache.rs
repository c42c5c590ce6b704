//! Build cache backends.
//!
//! A [`BuildCache`] maps a [`CacheKey`] to the isolated outputs of one build
//! plus the keys of the child builds it consumed. Entries are written
//! children-first: `put` refuses an entry whose children are not stored yet,
//! and `get` refuses to return an entry whose children have since vanished.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::entry::{decode_entry, encode_entry, write_atomic, CacheEntry, CacheKey};
use crate::error::CacheError;

/// Subdirectory holding entry files.
const ENTRY_SUBDIR: &str = "entries";

/// File extension of entry files.
const ENTRY_EXT: &str = "entry";

/// A content-addressed store of built subtrees.
///
/// Implementations must be safe to share between build worker threads. Each
/// `put` must be atomic and concurrent `put`s for different keys must not
/// interfere.
pub trait BuildCache: Send + Sync {
    /// Looks up an entry.
    ///
    /// Returns `Ok(None)` on a clean miss. An entry that exists but fails a
    /// consistency check is reported as an error for which
    /// [`CacheError::is_corruption`] holds; callers treat it as a miss.
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Stores an entry, replacing any previous entry for the same key.
    ///
    /// Fails without writing anything if a child key is missing or an output
    /// cannot be serialized.
    fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Returns `true` if an entry exists for `key`, without validating it.
    fn contains(&self, key: &CacheKey) -> bool;
}

fn check_children(
    cache: &dyn BuildCache,
    key: &CacheKey,
    entry: &CacheEntry,
) -> Result<(), CacheError> {
    match entry.child_keys.iter().find(|child| !cache.contains(child)) {
        Some(child) => Err(CacheError::MissingChild {
            key: *key,
            child: *child,
        }),
        None => Ok(()),
    }
}

/// Result of verifying every entry of a filesystem cache.
#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Entries that decoded and whose whole subtree is present.
    pub valid: Vec<CacheKey>,
    /// Entry files that failed to decode or validate.
    pub corrupt: Vec<(PathBuf, CacheError)>,
}

impl VerifyReport {
    /// Returns `true` if no corrupt entries were found.
    pub fn is_clean(&self) -> bool {
        self.corrupt.is_empty()
    }
}

/// Build cache stored as one file per entry under a directory.
///
/// Each entry lives at `<dir>/entries/<guid>.<fingerprint>.entry` with a
/// validated binary header. Reads are fail-safe: corruption is reported as
/// an error the builder counts as a miss.
pub struct FsBuildCache {
    dir: PathBuf,
    compress: bool,
}

impl FsBuildCache {
    /// Creates a cache rooted at `dir`. Nothing is created until the first put.
    pub fn new(dir: &Path, compress: bool) -> Self {
        Self {
            dir: dir.to_path_buf(),
            compress,
        }
    }

    /// Returns the root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file path of the entry for `key`.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir
            .join(ENTRY_SUBDIR)
            .join(format!("{}.{ENTRY_EXT}", key.file_stem()))
    }

    /// Lists the keys of every entry file, sorted.
    pub fn keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        Ok(self.entry_files()?.into_iter().map(|(key, _)| key).collect())
    }

    fn entry_files(&self) -> Result<Vec<(CacheKey, PathBuf)>, CacheError> {
        let dir = self.dir.join(ENTRY_SUBDIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let io_err = |e| CacheError::Io {
            path: dir.clone(),
            source: e,
        };
        let mut files = Vec::new();
        for item in std::fs::read_dir(&dir).map_err(io_err)? {
            let path = item.map_err(io_err)?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(CacheKey::from_file_stem)
            {
                files.push((key, path));
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }

    fn read(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(key);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io { path, source: e }),
        };
        let (found, entry) = decode_entry(&path, &raw)?;
        if found != *key {
            return Err(CacheError::KeyMismatch {
                path,
                expected: *key,
                found,
            });
        }
        Ok(Some(entry))
    }

    /// Decodes every entry and checks that its whole subtree is present.
    pub fn verify(&self) -> Result<VerifyReport, CacheError> {
        let mut decoded: HashMap<CacheKey, CacheEntry> = HashMap::new();
        let mut report = VerifyReport::default();
        for (key, path) in self.entry_files()? {
            match self.read(&key) {
                Ok(Some(entry)) => {
                    decoded.insert(key, entry);
                }
                Ok(None) => {}
                Err(e) => report.corrupt.push((path, e)),
            }
        }

        let mut keys: Vec<CacheKey> = decoded.keys().copied().collect();
        keys.sort();
        for key in keys {
            match missing_descendant(&decoded, &key) {
                None => report.valid.push(key),
                Some(child) => report.corrupt.push((
                    self.entry_path(&key),
                    CacheError::MissingChild { key, child },
                )),
            }
        }
        Ok(report)
    }

    /// Removes every entry that is neither live nor reachable from a live
    /// entry through its child keys. Returns the number of files removed.
    pub fn gc(&self, live: &HashSet<CacheKey>) -> Result<usize, CacheError> {
        let mut keep: BTreeSet<CacheKey> = BTreeSet::new();
        let mut stack: Vec<CacheKey> = live.iter().copied().collect();
        while let Some(key) = stack.pop() {
            if !keep.insert(key) {
                continue;
            }
            if let Ok(Some(entry)) = self.read(&key) {
                stack.extend(entry.child_keys);
            }
        }

        let mut removed = 0;
        for (key, path) in self.entry_files()? {
            if keep.contains(&key) {
                continue;
            }
            std::fs::remove_file(&path).map_err(|e| CacheError::Io {
                path: path.clone(),
                source: e,
            })?;
            tracing::debug!(%key, "removed unreferenced cache entry");
            removed += 1;
        }
        Ok(removed)
    }
}

fn missing_descendant(
    decoded: &HashMap<CacheKey, CacheEntry>,
    root: &CacheKey,
) -> Option<CacheKey> {
    let mut seen = HashSet::new();
    let mut stack = vec![*root];
    while let Some(key) = stack.pop() {
        if !seen.insert(key) {
            continue;
        }
        match decoded.get(&key) {
            Some(entry) => stack.extend(entry.child_keys.iter().copied()),
            None => return Some(key),
        }
    }
    None
}

impl BuildCache for FsBuildCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let Some(entry) = self.read(key)? else {
            return Ok(None);
        };
        check_children(self, key, &entry)?;
        Ok(Some(entry))
    }

    fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
        check_children(self, key, entry)?;
        let bytes = encode_entry(key, entry, self.compress)?;
        write_atomic(&self.entry_path(key), &bytes)
    }

    fn contains(&self, key: &CacheKey) -> bool {
        self.entry_path(key).is_file()
    }
}

/// Build cache held in process memory.
///
/// Entries are stored by value, so returned entries never alias anything a
/// concurrent build might mutate.
#[derive(Default)]
pub struct MemoryBuildCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryBuildCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops one entry, leaving entries that reference it dangling.
    pub fn evict(&self, key: &CacheKey) -> bool {
        self.lock().remove(key).is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BuildCache for MemoryBuildCache {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let Some(entry) = self.lock().get(key).cloned() else {
            return Ok(None);
        };
        check_children(self, key, &entry)?;
        Ok(Some(entry))
    }

    fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
        check_children(self, key, entry)?;
        self.lock().insert(*key, entry.clone());
        Ok(())
    }

    fn contains(&self, key: &CacheKey) -> bool {
        self.lock().contains_key(key)
    }
}
