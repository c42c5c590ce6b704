//! The four-component build fingerprint.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Four independent 32-bit hashes identifying one transformation input state.
///
/// Two equal fingerprints mean the pipeline would see the same settings, the
/// same asset, the same data blobs and the same external files.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Fingerprint {
    /// Pipeline name, version and settings.
    pub pipeline_hash: u32,
    /// Deep structural hash of the source asset.
    pub source_asset_hash: u32,
    /// Hash of the source instance's data blobs.
    pub source_data_hash: u32,
    /// Hash of the external files' contents.
    pub files_hash: u32,
}

impl Fingerprint {
    /// Creates a fingerprint from its four components.
    pub const fn new(
        pipeline_hash: u32,
        source_asset_hash: u32,
        source_data_hash: u32,
        files_hash: u32,
    ) -> Self {
        Self {
            pipeline_hash,
            source_asset_hash,
            source_data_hash,
            files_hash,
        }
    }

    /// Returns the components in declaration order.
    pub const fn components(&self) -> [u32; 4] {
        [
            self.pipeline_hash,
            self.source_asset_hash,
            self.source_data_hash,
            self.files_hash,
        ]
    }

    /// Returns `true` if the asset or data components differ from `other`.
    pub fn source_differs(&self, other: &Fingerprint) -> bool {
        self.source_asset_hash != other.source_asset_hash
            || self.source_data_hash != other.source_data_hash
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:08x}-{:08x}-{:08x}",
            self.pipeline_hash, self.source_asset_hash, self.source_data_hash, self.files_hash
        )
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// Error returned when a string is not four dash-separated hex words.
#[derive(Debug, thiserror::Error)]
#[error("invalid fingerprint '{input}'")]
pub struct ParseFingerprintError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseFingerprintError {
            input: s.to_string(),
        };
        let mut parts = [0u32; 4];
        let mut words = s.split('-');
        for slot in &mut parts {
            let word = words.next().ok_or_else(err)?;
            if word.len() != 8 {
                return Err(err());
            }
            *slot = u32::from_str_radix(word, 16).map_err(|_| err())?;
        }
        if words.next().is_some() {
            return Err(err());
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }
}
