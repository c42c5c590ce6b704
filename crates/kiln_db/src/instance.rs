//! Instance metadata and self-contained instance copies.

use std::collections::BTreeMap;

use kiln_common::{ContentHash, ContentHasher, Guid};
use serde::{Deserialize, Serialize};

/// Metadata of a stored instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    /// Instance identifier.
    pub guid: Guid,
    /// Full database path, `/`-separated (e.g. `textures/stone`).
    pub path: String,
    /// Type name of the stored object.
    pub type_name: String,
    /// Monotonic modification stamp of the object or any of its blobs.
    pub last_modified: u64,
}

impl InstanceInfo {
    /// Returns the last path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Returns the parent group path, empty for root-level instances.
    pub fn group(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[..idx],
            None => "",
        }
    }
}

/// A serialized object as stored in a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Type name the bytes decode to.
    pub type_name: String,
    /// Encoded object.
    pub bytes: Vec<u8>,
}

/// A fully isolated copy of one output instance.
///
/// Holds the object and every data blob by value, never a handle into a
/// database, so it can be cached, shipped between threads and written back
/// into any database later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputInstance {
    /// Instance identifier.
    pub guid: Guid,
    /// Database path of the instance.
    pub path: String,
    /// Type name of the object.
    pub type_name: String,
    /// Encoded object.
    pub object: Vec<u8>,
    /// Named data blobs.
    pub data: BTreeMap<String, Vec<u8>>,
}

impl OutputInstance {
    /// Creates an instance with an object and no data blobs.
    pub fn new(
        guid: Guid,
        path: impl Into<String>,
        type_name: impl Into<String>,
        object: Vec<u8>,
    ) -> Self {
        Self {
            guid,
            path: path.into(),
            type_name: type_name.into(),
            object,
            data: BTreeMap::new(),
        }
    }

    /// Adds a data blob, replacing any blob with the same name.
    pub fn with_data(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.data.insert(name.into(), bytes);
        self
    }

    /// Returns the same content addressed by another identifier and path.
    pub fn retarget(&self, guid: Guid, path: &str) -> Self {
        Self {
            guid,
            path: path.to_string(),
            ..self.clone()
        }
    }

    /// Returns a checksum over the payload (object, type and blobs).
    ///
    /// Identity (guid and path) is excluded so retargeted copies compare equal.
    pub fn payload_hash(&self) -> ContentHash {
        let mut hasher = ContentHasher::new();
        hasher.field(self.type_name.as_bytes()).field(&self.object);
        for (name, bytes) in &self.data {
            hasher.field(name.as_bytes()).field(bytes);
        }
        hasher.finish()
    }
}

/// Writes staged by an open transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInstance {
    /// Instance being written.
    pub guid: Guid,
    /// Target path.
    pub path: String,
    /// Object to store; a commit without one is rejected.
    pub object: Option<StoredObject>,
    /// Data blobs to store.
    pub data: BTreeMap<String, Vec<u8>>,
}

impl From<OutputInstance> for PendingInstance {
    fn from(instance: OutputInstance) -> Self {
        Self {
            guid: instance.guid,
            path: instance.path,
            object: Some(StoredObject {
                type_name: instance.type_name,
                bytes: instance.object,
            }),
            data: instance.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_group() {
        let info = InstanceInfo {
            guid: Guid::from_u128(1),
            path: "textures/rock/stone".to_string(),
            type_name: "texture".to_string(),
            last_modified: 0,
        };
        assert_eq!(info.name(), "stone");
        assert_eq!(info.group(), "textures/rock");
    }

    #[test]
    fn root_level_group_is_empty() {
        let info = InstanceInfo {
            guid: Guid::from_u128(1),
            path: "stone".to_string(),
            type_name: "texture".to_string(),
            last_modified: 0,
        };
        assert_eq!(info.name(), "stone");
        assert_eq!(info.group(), "");
    }

    #[test]
    fn retarget_keeps_payload() {
        let a = OutputInstance::new(Guid::from_u128(1), "a", "mesh", vec![1, 2, 3])
            .with_data("vertices", vec![9; 12]);
        let b = a.retarget(Guid::from_u128(2), "b");
        assert_eq!(b.guid, Guid::from_u128(2));
        assert_eq!(b.path, "b");
        assert_eq!(a.payload_hash(), b.payload_hash());
    }

    #[test]
    fn payload_hash_tracks_blobs() {
        let a = OutputInstance::new(Guid::from_u128(1), "a", "mesh", vec![1]);
        let b = a.clone().with_data("extra", vec![0]);
        assert_ne!(a.payload_hash(), b.payload_hash());
    }

    #[test]
    fn serde_roundtrip() {
        let a = OutputInstance::new(Guid::from_u128(7), "out/a", "mesh", vec![1, 2])
            .with_data("blob", vec![3]);
        let json = serde_json::to_string(&a).unwrap();
        let back: OutputInstance = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
