// SPDX-License-Identifier: MIT OR Apache-2.0
//! Identifier helpers.
//!
//! Run ids are UUIDv7 so listings can page by id in time order. Version ids
//! are 32-char lowercase hex digests of the normalized properties.

use uuid::Uuid;

/// A version identifier: 32 lowercase hex chars of the property digest.
pub type VersionId = String;

/// Generate a fresh, time-ordered run id.
#[must_use]
pub fn new_run_id() -> Uuid {
    Uuid::now_v7()
}

/// Returns `true` if the uuid is version 7.
#[must_use]
pub fn is_uuid7(id: &Uuid) -> bool {
    id.get_version_num() == 7
}

/// Returns `true` if the string looks like a version hash (32 hex chars).
#[must_use]
pub fn looks_like_version_id(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_uuid7() {
        assert!(is_uuid7(&new_run_id()));
    }

    #[test]
    fn run_ids_are_time_ordered() {
        let a = new_run_id();
        let b = new_run_id();
        assert!(a <= b, "{a} should not sort after {b}");
    }

    #[test]
    fn version_id_shape() {
        assert!(looks_like_version_id("0123456789abcdef0123456789abcdef"));
        assert!(!looks_like_version_id("0123456789abcdef"));
        assert!(!looks_like_version_id("0123456789abcdef0123456789abcdeg"));
    }
}
