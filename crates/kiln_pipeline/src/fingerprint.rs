//! Fingerprint computation and combination.
//!
//! A node's local fingerprint covers its own inputs. Its combined fingerprint
//! additionally folds in the combined fingerprints of the children whose
//! products it uses, component by component, so a change deep in a used
//! subtree shows up in exactly the component that changed.

use kiln_common::{hash32, Fingerprint, Hasher32};

/// Hashes a pipeline's identity and settings.
pub fn pipeline_hash(name: &str, version: u32, declared: u32, configured: u32) -> u32 {
    let mut hasher = Hasher32::new();
    hasher.update_str(name);
    hasher.update_u32(version);
    hasher.update_u32(declared);
    hasher.update_u32(configured);
    hasher.digest()
}

/// Merges the hash of another pipeline into a node's pipeline hash.
///
/// Merging is order-independent so the result does not depend on the order
/// in which a pipeline declares the types it relies on.
pub fn merge_pipeline_hash(current: u32, other: u32) -> u32 {
    current.wrapping_add(other)
}

/// Folds named blob hashes into one data hash. Blobs must be given sorted
/// by name.
pub fn data_hash<'a>(blobs: impl IntoIterator<Item = (&'a str, u32)>) -> u32 {
    let mut hasher = Hasher32::new();
    let mut any = false;
    for (name, hash) in blobs {
        hasher.update_str(name);
        hasher.update_u32(hash);
        any = true;
    }
    if any {
        hasher.digest()
    } else {
        0
    }
}

/// Folds external file hashes into one files hash. Files must be given sorted
/// by path.
pub fn files_hash<'a>(files: impl IntoIterator<Item = (&'a str, u32)>) -> u32 {
    // Same shape as blobs; kept separate so the two can diverge.
    data_hash(files)
}

/// Returns `local` with the given child fingerprints folded in.
///
/// Children are sorted first so the result is independent of declaration
/// order. With no children the local fingerprint is returned unchanged.
pub fn combine(local: Fingerprint, children: &[Fingerprint]) -> Fingerprint {
    if children.is_empty() {
        return local;
    }
    let mut sorted = children.to_vec();
    sorted.sort();
    sorted.dedup();

    let fold = |own: u32, pick: fn(&Fingerprint) -> u32| {
        let mut hasher = Hasher32::new();
        hasher.update_u32(own);
        for child in &sorted {
            hasher.update_u32(pick(child));
        }
        hasher.digest()
    };
    Fingerprint {
        pipeline_hash: fold(local.pipeline_hash, |f| f.pipeline_hash),
        source_asset_hash: fold(local.source_asset_hash, |f| f.source_asset_hash),
        source_data_hash: fold(local.source_data_hash, |f| f.source_data_hash),
        files_hash: fold(local.files_hash, |f| f.files_hash),
    }
}

/// Hashes optional build parameters for in-session product memoization.
pub fn params_hash(params: Option<&serde_json::Value>) -> u32 {
    match params {
        Some(value) => hash32(value.to_string().as_bytes()),
        None => 0,
    }
}
