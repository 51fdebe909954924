// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical JSON hashing.
//!
//! Fingerprints (input hashes, schema ids) are SHA-256 digests of a
//! byte-stable serialization: object keys sorted, null-valued keys dropped.

use sha2::{Digest, Sha256};

/// Recursively remove null-valued object keys.
#[must_use]
pub fn without_nulls(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, without_nulls(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(without_nulls).collect())
        }
        other => other,
    }
}

/// Hex SHA-256 of the canonical serialization of `value`.
///
/// `serde_json` maps iterate in sorted key order, so serializing a
/// [`serde_json::Value`] is already byte-stable.
#[must_use]
pub fn canonical_digest(value: &serde_json::Value) -> String {
    let normalized = without_nulls(value.clone());
    let bytes = serde_json::to_vec(&normalized).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}
