//! Shared foundational types used across the kiln asset build pipeline.
//!
//! This crate provides the 128-bit [`Guid`] that addresses every instance in
//! the source and output databases, the four-component build [`Fingerprint`]
//! and the hashing primitives behind it, plus the internal error type.

#![warn(missing_docs)]

pub mod fingerprint;
pub mod guid;
pub mod hash;
pub mod result;

pub use fingerprint::{Fingerprint, ParseFingerprintError};
pub use guid::{Guid, ParseGuidError};
pub use hash::{hash32, ContentHash, ContentHasher, Hasher32};
pub use result::{InternalError, KilnResult};
