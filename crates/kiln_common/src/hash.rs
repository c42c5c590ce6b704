//! Content hashing for fingerprints, change detection and cache integrity.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hasher;
use xxhash_rust::xxh32::Xxh32;

/// Seed shared by every 32-bit hash computed by kiln.
const HASH32_SEED: u32 = 0;

/// Computes the 32-bit XXH32 hash of a byte slice.
pub fn hash32(data: &[u8]) -> u32 {
    xxhash_rust::xxh32::xxh32(data, HASH32_SEED)
}

/// Incremental 32-bit hasher.
///
/// Used for streaming file contents and for structural hashes that are fed
/// field by field. Integer writes are little-endian so results are identical
/// across platforms.
#[derive(Clone)]
pub struct Hasher32(Xxh32);

impl Hasher32 {
    /// Creates a hasher with the shared seed.
    pub fn new() -> Self {
        Self(Xxh32::new(HASH32_SEED))
    }

    /// Feeds raw bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Feeds a `u32` in little-endian order.
    pub fn update_u32(&mut self, value: u32) {
        self.0.update(&value.to_le_bytes());
    }

    /// Feeds a `u64` in little-endian order.
    pub fn update_u64(&mut self, value: u64) {
        self.0.update(&value.to_le_bytes());
    }

    /// Feeds a length-prefixed string so that adjacent strings cannot collide.
    pub fn update_str(&mut self, value: &str) {
        self.update_u64(value.len() as u64);
        self.0.update(value.as_bytes());
    }

    /// Returns the hash of everything fed so far.
    pub fn digest(&self) -> u32 {
        self.0.digest()
    }
}

impl Default for Hasher32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for Hasher32 {
    fn finish(&self) -> u64 {
        u64::from(self.digest())
    }

    fn write(&mut self, bytes: &[u8]) {
        self.update(bytes);
    }
}

/// 128-bit XXH3 digest of persisted bytes.
///
/// Cache entries store it as their integrity checksum and output instances
/// use it to tell whether a restore would change anything. Formats as 32
/// lowercase hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(u128);

impl ContentHash {
    /// Hashes a byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(xxhash_rust::xxh3::xxh3_128(data))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:08x}..)", self.0 >> 96)
    }
}

/// Streaming [`ContentHash`] over length-prefixed fields.
///
/// Each field carries its length, so `["ab", "c"]` and `["a", "bc"]` differ.
#[derive(Clone)]
pub struct ContentHasher(xxhash_rust::xxh3::Xxh3);

impl ContentHasher {
    /// Creates an empty hasher.
    pub fn new() -> Self {
        Self(xxhash_rust::xxh3::Xxh3::new())
    }

    /// Feeds one field.
    pub fn field(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(&(bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
        self
    }

    /// Returns the digest of everything fed so far.
    pub fn finish(&self) -> ContentHash {
        ContentHash(self.0.digest128())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash32_deterministic() {
        assert_eq!(hash32(b"hello world"), hash32(b"hello world"));
        assert_ne!(hash32(b"hello"), hash32(b"world"));
    }

    #[test]
    fn streaming_matches_one_shot() {
        let mut h = Hasher32::new();
        h.update(b"hello ");
        h.update(b"world");
        assert_eq!(h.digest(), hash32(b"hello world"));
    }

    #[test]
    fn length_prefix_separates_strings() {
        let mut a = Hasher32::new();
        a.update_str("ab");
        a.update_str("c");
        let mut b = Hasher32::new();
        b.update_str("a");
        b.update_str("bc");
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn content_hash_is_32_hex_digits() {
        let text = ContentHash::from_bytes(b"pixels").to_string();
        assert_eq!(text.len(), 32);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn content_hasher_separates_fields() {
        let split_late = ContentHasher::new().field(b"ab").field(b"c").finish();
        let split_early = ContentHasher::new().field(b"a").field(b"bc").finish();
        assert_ne!(split_late, split_early);
        assert_eq!(
            split_late,
            ContentHasher::new().field(b"ab").field(b"c").finish()
        );
    }

    #[test]
    fn content_hash_survives_json() {
        let hash = ContentHash::from_bytes(b"entry payload");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(serde_json::from_str::<ContentHash>(&json).unwrap(), hash);
    }
}
