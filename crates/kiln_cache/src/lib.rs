//! Build cache and build history persistence for the kiln asset pipeline.
//!
//! The [`BuildCache`] stores isolated copies of built outputs keyed by the
//! root output identifier and its combined fingerprint, so whole subtrees can
//! be restored without running any pipeline. The [`BuildHistoryStore`]
//! records what was last built and the file hashes used to decide staleness
//! cheaply.

#![warn(missing_docs)]

pub mod cache;
pub mod entry;
pub mod error;
pub mod hasher;
pub mod history;

pub use cache::{BuildCache, FsBuildCache, MemoryBuildCache, VerifyReport};
pub use entry::{CacheEntry, CacheKey};
pub use error::CacheError;
pub use hasher::{FileHasher, FileStamp};
pub use history::{BuildHistoryRecord, BuildHistoryStore, FileHashRecord};
