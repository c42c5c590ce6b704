//! In-memory source assets and their structural hash.

use kiln_common::{Guid, Hasher32};
use kiln_db::{Database, DbError, StoredObject};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BuildError;

// Type tags fed before every value so that, for example, the string "1"
// and the number 1 never hash alike.
const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_ARRAY: u8 = 4;
const TAG_OBJECT: u8 = 5;

/// A source asset: a type name selecting the pipeline plus a structured body.
///
/// Sub-objects are embedded by value in the body, so the structural hash
/// covers them too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Asset type name, matched against the pipelines' declared types.
    pub type_name: String,
    /// Asset fields.
    pub body: Value,
}

impl Asset {
    /// Creates an asset.
    pub fn new(type_name: impl Into<String>, body: Value) -> Self {
        Self {
            type_name: type_name.into(),
            body,
        }
    }

    /// Returns a field of an object body.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }

    /// Returns the deep structural hash of the asset.
    ///
    /// Object keys are visited in sorted order, so two assets that compare
    /// equal always hash alike regardless of how their maps were built.
    pub fn deep_hash(&self) -> u32 {
        let mut hasher = Hasher32::new();
        hasher.update_str(&self.type_name);
        hash_value(&mut hasher, &self.body);
        hasher.digest()
    }

    /// Decodes an asset from a stored database object.
    pub fn from_stored(object: &StoredObject) -> Result<Self, serde_json::Error> {
        let body = serde_json::from_slice(&object.bytes)?;
        Ok(Self {
            type_name: object.type_name.clone(),
            body,
        })
    }

    /// Encodes the body for storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing a `Value` into memory cannot fail.
        serde_json::to_vec(&self.body).unwrap_or_default()
    }

    /// Reads and decodes the asset stored in a database instance.
    pub fn read(db: &dyn Database, guid: Guid) -> Result<Self, BuildError> {
        let object = db.read_object(guid).map_err(|e| match e {
            DbError::NotFound { .. } => {
                BuildError::source_unavailable(format!("no source instance {guid}"))
            }
            other => BuildError::source_unavailable(other.to_string()),
        })?;
        Self::from_stored(&object).map_err(|e| {
            BuildError::source_unavailable(format!("instance {guid} is not a valid asset: {e}"))
        })
    }
}

fn hash_value(hasher: &mut Hasher32, value: &Value) {
    match value {
        Value::Null => hasher.update(&[TAG_NULL]),
        Value::Bool(b) => hasher.update(&[TAG_BOOL, u8::from(*b)]),
        Value::Number(n) => {
            hasher.update(&[TAG_NUMBER]);
            hasher.update_str(&n.to_string());
        }
        Value::String(s) => {
            hasher.update(&[TAG_STRING]);
            hasher.update_str(s);
        }
        Value::Array(items) => {
            hasher.update(&[TAG_ARRAY]);
            hasher.update_u64(items.len() as u64);
            for item in items {
                hash_value(hasher, item);
            }
        }
        Value::Object(map) => {
            hasher.update(&[TAG_OBJECT]);
            hasher.update_u64(map.len() as u64);
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                hasher.update_str(key);
                hash_value(hasher, &map[key.as_str()]);
            }
        }
    }
}
