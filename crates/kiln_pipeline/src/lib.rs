//! Incremental asset builds for kiln.
//!
//! A host walks its root assets with [`Depends`] to produce a
//! [`DependencySet`], then hands the set to a [`Builder`]. The builder
//! fingerprints every node, compares the fingerprints with the
//! [`BuildHistoryStore`](kiln_cache::BuildHistoryStore), restores whole
//! subtrees from the [`BuildCache`](kiln_cache::BuildCache) where it can, and
//! invokes the registered [`Pipeline`]s only for what is left.

#![warn(missing_docs)]

pub mod asset;
pub mod builder;
pub mod cancel;
pub mod dependency;
pub mod dependency_set;
pub mod depends;
pub mod error;
pub mod fingerprint;
pub mod pipeline;

pub use asset::Asset;
pub use builder::{
    BuildContext, BuildCounters, BuildObserver, BuildReport, BuildResult, Builder, FailedNode,
    NodeResult, NullObserver,
};
pub use cancel::CancellationToken;
pub use dependency::{BuildReason, DependencyFlags, DependencyNode, ExternalFileRef};
pub use dependency_set::DependencySet;
pub use depends::Depends;
pub use error::{BuildError, ErrorKind, RegistryError};
pub use pipeline::{BuildRequest, Pipeline, PipelineContext, PipelineRegistry};
