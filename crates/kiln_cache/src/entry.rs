//! Cache keys, cache entries and their on-disk encoding.
//!
//! Each entry file starts with a header holding magic bytes, the format
//! version and a checksum of the payload. The payload is the bincode-encoded
//! key and entry, optionally deflated. Files are written to a temporary name
//! and renamed into place so readers never observe a partial entry.

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use kiln_common::{ContentHash, Fingerprint, Guid};
use kiln_db::OutputInstance;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Magic bytes identifying a kiln cache entry.
const ENTRY_MAGIC: [u8; 4] = *b"KILN";

/// Current entry format version. Increment on breaking changes to
/// the header or payload format.
pub const ENTRY_FORMAT_VERSION: u32 = 1;

/// Addresses one built subtree: the root's output identifier plus its
/// combined fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    /// Output identifier of the subtree root.
    pub guid: Guid,
    /// Combined fingerprint of the subtree root.
    pub fingerprint: Fingerprint,
}

impl CacheKey {
    /// Creates a key.
    pub const fn new(guid: Guid, fingerprint: Fingerprint) -> Self {
        Self { guid, fingerprint }
    }

    /// Returns the file stem used by the filesystem cache.
    pub fn file_stem(&self) -> String {
        format!("{}.{}", self.guid, self.fingerprint)
    }

    /// Parses a file stem produced by [`file_stem`](Self::file_stem).
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let (guid, fingerprint) = stem.split_once('.')?;
        Some(Self {
            guid: guid.parse().ok()?,
            fingerprint: fingerprint.parse().ok()?,
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.guid, self.fingerprint)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({self})")
    }
}

/// What the cache stores per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Isolated copies of every output instance the build produced.
    pub outputs: Vec<OutputInstance>,
    /// Keys of child subtrees the build consumed, all present in the cache
    /// when this entry was written.
    pub child_keys: Vec<CacheKey>,
}

impl CacheEntry {
    /// Creates an entry.
    pub fn new(outputs: Vec<OutputInstance>, child_keys: Vec<CacheKey>) -> Self {
        Self {
            outputs,
            child_keys,
        }
    }
}

/// Header prepended to every entry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryHeader {
    /// Magic bytes: must be `b"KILN"`.
    pub magic: [u8; 4],
    /// Entry format version.
    pub format_version: u32,
    /// Kiln version that produced this entry.
    pub kiln_version: String,
    /// Whether the payload is deflated.
    pub compressed: bool,
    /// Content hash of the stored payload bytes.
    pub checksum: ContentHash,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    key: CacheKey,
    entry: CacheEntry,
}

/// Encodes an entry with its header.
///
/// Fails without producing any bytes if an output cannot be serialized.
pub fn encode_entry(
    key: &CacheKey,
    entry: &CacheEntry,
    compress: bool,
) -> Result<Vec<u8>, CacheError> {
    let stored = StoredEntry {
        key: *key,
        entry: entry.clone(),
    };
    let mut payload = bincode::serde::encode_to_vec(&stored, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
    if compress {
        payload = deflate(&payload)?;
    }

    let header = EntryHeader {
        magic: ENTRY_MAGIC,
        format_version: ENTRY_FORMAT_VERSION,
        kiln_version: env!("CARGO_PKG_VERSION").to_string(),
        compressed: compress,
        checksum: ContentHash::from_bytes(&payload),
    };
    let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

    // 4-byte header length (little-endian) + header + payload
    let header_len = header_bytes.len() as u32;
    let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
    output.extend_from_slice(&header_len.to_le_bytes());
    output.extend_from_slice(&header_bytes);
    output.extend_from_slice(&payload);
    Ok(output)
}

/// Decodes and validates an entry file read from `path`.
pub fn decode_entry(path: &Path, raw: &[u8]) -> Result<(CacheKey, CacheEntry), CacheError> {
    let invalid = |reason: &str| CacheError::InvalidHeader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if raw.len() < 4 {
        return Err(invalid("truncated header length"));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&raw[..4]);
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    if raw.len() < 4 + header_len {
        return Err(invalid("truncated header"));
    }

    let (header, _): (EntryHeader, usize) =
        bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode::config::standard())
            .map_err(|e| invalid(&e.to_string()))?;

    if header.magic != ENTRY_MAGIC {
        return Err(invalid("missing magic bytes"));
    }
    if header.format_version != ENTRY_FORMAT_VERSION {
        return Err(CacheError::VersionMismatch {
            path: path.to_path_buf(),
            expected: ENTRY_FORMAT_VERSION,
            actual: header.format_version,
        });
    }

    let payload = &raw[4 + header_len..];
    let actual = ContentHash::from_bytes(payload);
    if actual != header.checksum {
        return Err(CacheError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: header.checksum.to_string(),
            actual: actual.to_string(),
        });
    }

    let inflated;
    let payload = if header.compressed {
        inflated = inflate(payload)?;
        &inflated[..]
    } else {
        payload
    };
    let (stored, _): (StoredEntry, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard()).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })?;
    Ok((stored.key, stored.entry))
}

/// Writes `bytes` to `path` through a temporary sibling and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    static NEXT_TEMP: AtomicU64 = AtomicU64::new(0);

    let io_err = |path: &Path, source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let temp = path.with_extension(format!(
        "tmp.{}.{}",
        std::process::id(),
        NEXT_TEMP.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(&temp, bytes).map_err(|e| io_err(&temp, e))?;
    if let Err(e) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(io_err(path, e));
    }
    Ok(())
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), Compression::fast());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| CacheError::Serialization {
            reason: format!("deflate failed: {e}"),
        })
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut out = Vec::with_capacity(data.len() * 2);
    DeflateDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| CacheError::Serialization {
            reason: format!("inflate failed: {e}"),
        })?;
    Ok(out)
}
