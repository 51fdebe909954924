// SPDX-License-Identifier: MIT OR Apache-2.0
//! Keypath helpers.
//!
//! Paths address positions inside JSON payloads: object keys and array
//! indices for file key paths, dotted strings for privacy stripping.

use serde_json::Value;

/// Set `new_value` at the position addressed by `path` (keys and indices).
/// Missing intermediate objects are created; out-of-range indices are
/// ignored.
pub fn set_at_keypath(target: &mut Value, path: &[Value], new_value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *target = new_value;
        return;
    };
    match (head, target) {
        (Value::String(key), Value::Object(map)) => {
            let entry = map.entry(key.clone()).or_insert(Value::Null);
            set_at_keypath(entry, rest, new_value);
        }
        (Value::Number(idx), Value::Array(items)) => {
            if let Some(slot) = idx.as_u64().and_then(|i| items.get_mut(i as usize)) {
                set_at_keypath(slot, rest, new_value);
            }
        }
        _ => {}
    }
}

/// Remove the position addressed by a dotted path (`"a.b.c"`). A bare key
/// removes the whole subtree. Missing paths are a no-op.
pub fn remove_dotted_path(target: &mut Value, path: &str) {
    let mut segments = path.split('.');
    let Some(first) = segments.next() else {
        return;
    };
    let rest: Vec<&str> = segments.collect();
    let Value::Object(map) = target else {
        return;
    };
    if rest.is_empty() {
        map.remove(first);
        return;
    }
    if let Some(child) = map.get_mut(first) {
        remove_dotted_path(child, &rest.join("."));
    }
}
