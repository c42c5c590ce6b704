//! 128-bit identifiers for database instances and build outputs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A globally unique 128-bit identifier.
///
/// Every source instance, output instance and dependency node is addressed by
/// a `Guid`. The nil value (all zero bits) is reserved and means "no
/// instance"; it is never a valid key in a database or build store.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(Uuid);

impl Guid {
    /// The nil identifier.
    pub const NIL: Guid = Guid(Uuid::nil());

    /// Creates a fresh random identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an identifier from its raw 16 bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Creates an identifier from a `u128`, mostly useful in tests.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Returns the raw 16 bytes of this identifier.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Returns `true` if this is the nil identifier.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Returns `Some(self)` unless this is the nil identifier.
    pub fn non_nil(self) -> Option<Self> {
        if self.is_nil() {
            None
        } else {
            Some(self)
        }
    }
}

impl Default for Guid {
    fn default() -> Self {
        Self::NIL
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self.0.hyphenated())
    }
}

/// Error returned when a string is not a valid identifier.
#[derive(Debug, thiserror::Error)]
#[error("invalid guid '{input}'")]
pub struct ParseGuidError {
    /// The rejected input.
    pub input: String,
}

impl FromStr for Guid {
    type Err = ParseGuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('{').trim_end_matches('}');
        Uuid::parse_str(trimmed)
            .map(Guid)
            .map_err(|_| ParseGuidError {
                input: s.to_string(),
            })
    }
}
