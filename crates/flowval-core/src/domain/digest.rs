//! Canonical JSON digests for run inputs.
//!
//! Reports record the digest of the catalog and registry they were produced
//! from, so two reports can be checked for comparable inputs.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::error::{FlowvalError, Result};

/// Recursively rebuild objects so keys are emitted in sorted order.
///
/// `serde_json::Map` already iterates sorted unless the `preserve_order`
/// feature is enabled somewhere in the dependency graph; rebuilding keeps the
/// digest independent of that.
fn sort_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(String, serde_json::Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sort_keys).collect())
        }
        other => other,
    }
}

/// SHA-256 hex digest of the compact, key-sorted JSON form of `value`.
pub fn canonical_digest<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let json = sort_keys(serde_json::to_value(value)?);
    let bytes = serde_json::to_vec(&json).map_err(FlowvalError::Serialization)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
