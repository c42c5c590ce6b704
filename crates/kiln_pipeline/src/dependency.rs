//! Dependency nodes, their flags and build reasons.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::PathBuf;
use std::sync::Arc;

use kiln_common::{Fingerprint, Guid};

use crate::asset::Asset;

macro_rules! bitmask {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr => $label:literal,)* }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $name(u8);

        impl $name {
            /// No bits set.
            pub const NONE: Self = Self(0);
            $($(#[$fmeta])* pub const $flag: Self = Self($bit);)*

            /// Returns `true` if every bit of `other` is set.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// Returns `true` if any bit of `other` is set.
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Returns `true` if no bits are set.
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// Sets the bits of `other`.
            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            /// Clears the bits of `other`.
            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            /// Returns the raw bits.
            pub const fn bits(self) -> u8 {
                self.0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_empty() {
                    return f.write_str("none");
                }
                let mut first = true;
                $(
                    if self.contains(Self::$flag) {
                        if !first {
                            f.write_str("|")?;
                        }
                        f.write_str($label)?;
                        first = false;
                    }
                )*
                let _ = first;
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

bitmask! {
    /// How a dependency participates in the build.
    DependencyFlags {
        /// The node produces output and its pipeline is invoked.
        BUILD = 1 => "build",
        /// The parent consumes this node's product; its fingerprint is folded
        /// into the parent's.
        USE = 2 => "use",
        /// The node is referenced as a runtime resource.
        RESOURCE = 4 => "resource",
        /// The node could not be walked or read.
        FAILED = 8 => "failed",
        /// The caller forces this node and its descendants to rebuild.
        FORCE_ADD = 16 => "force",
    }
}

bitmask! {
    /// Why a node is being rebuilt.
    BuildReason {
        /// A child was rebuilt, restored with new output, or failed.
        DEPENDENCY_MODIFIED = 1 => "dependency",
        /// The node's own inputs or pipeline version changed.
        SOURCE_MODIFIED = 2 => "source",
        /// The asset itself changed; always set with `SOURCE_MODIFIED`.
        ASSET_MODIFIED = 4 => "asset",
        /// Requested directly outside the dependency walk.
        AD_HOC = 8 => "ad-hoc",
        /// Rebuild requested regardless of freshness.
        FORCED = 16 => "forced",
    }
}

/// A file outside the database that a node depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalFileRef {
    /// Absolute or project-relative file path.
    pub path: PathBuf,
    /// Last-write stamp captured when the dependency was declared.
    pub last_write: u64,
}

/// One asset's build bookkeeping within a session.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    /// Name of the pipeline handling the asset.
    pub pipeline: String,
    /// Version of that pipeline.
    pub pipeline_version: u32,
    /// Pipeline hash, including merged hashes of embedded and declared types.
    pub pipeline_hash: u32,
    /// Source instance identifier; nil for embedded assets.
    pub source_guid: Guid,
    /// The decoded source asset.
    pub source_asset: Arc<Asset>,
    /// External files read by the pipeline.
    pub files: Vec<ExternalFileRef>,
    /// Output instance path.
    pub output_path: String,
    /// Output instance identifier; the node's identity within a set.
    pub output_guid: Guid,
    /// Local fingerprint, filled in by the builder.
    pub fingerprint: Fingerprint,
    /// Participation flags.
    pub flags: DependencyFlags,
    /// Build reason, filled in by the builder.
    pub reason: BuildReason,
    /// Indices of child nodes within the owning set.
    pub children: Vec<usize>,
    /// Why the node was marked failed during the walk.
    pub error: Option<String>,
}

impl DependencyNode {
    /// Creates a node with no files, children or fingerprint yet.
    pub fn new(
        pipeline: impl Into<String>,
        pipeline_version: u32,
        pipeline_hash: u32,
        source_asset: Arc<Asset>,
        output_path: impl Into<String>,
        output_guid: Guid,
        flags: DependencyFlags,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            pipeline_version,
            pipeline_hash,
            source_guid: Guid::NIL,
            source_asset,
            files: Vec::new(),
            output_path: output_path.into(),
            output_guid,
            fingerprint: Fingerprint::default(),
            flags,
            reason: BuildReason::NONE,
            children: Vec::new(),
            error: None,
        }
    }

    /// Sets the source instance the asset was read from.
    pub fn with_source(mut self, source_guid: Guid) -> Self {
        self.source_guid = source_guid;
        self
    }

    /// Returns `true` if the node was read from a source database instance.
    pub fn is_instance(&self) -> bool {
        !self.source_guid.is_nil()
    }

    /// Returns `true` if the node produces output.
    pub fn is_build(&self) -> bool {
        self.flags.contains(DependencyFlags::BUILD)
    }

    /// Marks the node failed with a reason.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.flags.insert(DependencyFlags::FAILED);
        self.error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let mut flags = DependencyFlags::BUILD | DependencyFlags::USE;
        assert!(flags.contains(DependencyFlags::BUILD));
        assert!(!flags.contains(DependencyFlags::FAILED));
        flags |= DependencyFlags::FAILED;
        assert!(flags.intersects(DependencyFlags::FAILED | DependencyFlags::RESOURCE));
        flags.remove(DependencyFlags::BUILD);
        assert!(!flags.contains(DependencyFlags::BUILD));
    }

    #[test]
    fn reason_display() {
        assert_eq!(BuildReason::NONE.to_string(), "none");
        let reason = BuildReason::SOURCE_MODIFIED | BuildReason::ASSET_MODIFIED;
        assert_eq!(reason.to_string(), "source|asset");
        assert_eq!(format!("{:?}", BuildReason::FORCED), "BuildReason(forced)");
    }

    #[test]
    fn node_fail_sets_flag() {
        let mut node = DependencyNode::new(
            "texture",
            1,
            0,
            Arc::new(Asset::new("texture", serde_json::json!({}))),
            "out/t",
            Guid::from_u128(1),
            DependencyFlags::BUILD,
        );
        assert!(!node.is_instance());
        node.fail("no such file");
        assert!(node.flags.contains(DependencyFlags::FAILED));
        assert_eq!(node.error.as_deref(), Some("no such file"));
    }
}
