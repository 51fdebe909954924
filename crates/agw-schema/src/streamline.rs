// SPDX-License-Identifier: MIT OR Apache-2.0
//! The schema streamliner.
//!
//! Produces a unique representation of a JSON schema so that schemas can be
//! matched regardless of implementation details:
//!
//! - non-internal refs are inlined (with a cycle guard),
//! - optional nullable fields become plainly optional; required nullable
//!   fields keep a `["T", "null"]` type array,
//! - empty metadata keys are dropped,
//! - legacy internal refs (`File` + `format`) are rewritten to the canonical
//!   `Image` / `Audio` / `PDF` defs, and `$defs` is rebuilt to contain
//!   exactly the internal defs still referenced.

use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Keys removed when their value is empty.
const FALSY_KEYS_TO_REMOVE: &[&str] = &["examples", "description", "items", "properties"];

/// Keys that introduce schema composition.
const OF_KEYS: &[&str] = &["oneOf", "anyOf", "allOf"];

#[derive(Debug, thiserror::Error)]
enum StreamlineError {
    #[error("circular reference detected: {0}")]
    Circular(String),
    #[error("invalid schema: {0}")]
    Invalid(String),
}

/// The canonical internal `$defs`.
static INTERNAL_DEFS: LazyLock<Map<String, Value>> = LazyLock::new(|| {
    let file = json!({
        "type": "object",
        "properties": {
            "url": {"type": "string", "description": "The file URL"},
            "data": {"type": "string", "description": "Base64 encoded file data"},
            "content_type": {"type": "string", "description": "The file content type"},
        },
    });
    let mut defs = Map::new();
    for name in ["File", "Image", "Audio", "PDF"] {
        defs.insert(name.to_string(), file.clone());
    }
    defs.insert(
        "DatetimeLocal".to_string(),
        json!({
            "type": "object",
            "properties": {
                "date": {"type": "string", "format": "date"},
                "local_time": {"type": "string", "format": "time"},
                "timezone": {"type": "string"},
            },
            "required": ["date", "local_time", "timezone"],
        }),
    );
    defs
});

/// Streamline a schema. Returns the input unchanged when it contains a
/// circular reference or cannot be processed.
#[must_use]
pub fn streamline_schema(schema: &Value) -> Value {
    let defs = schema
        .get("$defs")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let mut used_internal: BTreeSet<String> = BTreeSet::new();
    let mut processing: BTreeSet<String> = BTreeSet::new();

    match inner(schema.clone(), &defs, true, &mut processing, &mut used_internal) {
        Ok(mut streamlined) => {
            rebuild_defs(&mut streamlined, &used_internal);
            streamlined
        }
        Err(StreamlineError::Circular(_)) => schema.clone(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to streamline schema");
            schema.clone()
        }
    }
}

/// Keep only the internal defs that are still referenced.
fn rebuild_defs(schema: &mut Value, used_internal: &BTreeSet<String>) {
    let Some(obj) = schema.as_object_mut() else {
        return;
    };
    obj.remove("$defs");
    if used_internal.is_empty() {
        return;
    }
    let mut defs = Map::new();
    for name in used_internal {
        if let Some(def) = INTERNAL_DEFS.get(name) {
            defs.insert(name.clone(), def.clone());
        }
    }
    obj.insert("$defs".to_string(), Value::Object(defs));
}

fn inner(
    schema: Value,
    defs: &Map<String, Value>,
    is_required: bool,
    processing: &mut BTreeSet<String>,
    used_internal: &mut BTreeSet<String>,
) -> Result<Value, StreamlineError> {
    let Value::Object(mut obj) = schema else {
        return Ok(schema);
    };

    guess_type(&mut obj);
    remove_falsy_keys(&mut obj);

    let obj_type = obj.get("type").and_then(Value::as_str).map(str::to_string);
    match obj_type.as_deref() {
        Some("array") => return streamline_array(obj, defs, processing, used_internal),
        Some("object") => return streamline_object(obj, defs, processing, used_internal),
        _ => {}
    }

    if obj.contains_key("$ref") {
        return follow_ref(obj, defs, is_required, processing, used_internal);
    }

    handle_ofs(obj, defs, is_required, processing, used_internal)
}

/// Set a missing `type` when the shape makes it obvious.
fn guess_type(obj: &mut Map<String, Value>) {
    if obj.contains_key("type") {
        return;
    }
    if obj.contains_key("properties") {
        obj.insert("type".to_string(), json!("object"));
    } else if obj.contains_key("items") {
        obj.insert("type".to_string(), json!("array"));
    }
}

fn remove_falsy_keys(obj: &mut Map<String, Value>) {
    for key in FALSY_KEYS_TO_REMOVE {
        let falsy = match obj.get(*key) {
            Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Array(a)) => a.is_empty(),
            Some(Value::Object(o)) => o.is_empty(),
            _ => false,
        };
        if falsy {
            obj.remove(*key);
        }
    }
}

fn streamline_array(
    mut obj: Map<String, Value>,
    defs: &Map<String, Value>,
    processing: &mut BTreeSet<String>,
    used_internal: &mut BTreeSet<String>,
) -> Result<Value, StreamlineError> {
    let Some(items) = obj.remove("items") else {
        return Ok(Value::Object(obj));
    };
    let items = match items {
        Value::Object(_) => inner(items, defs, true, processing, used_internal)?,
        Value::Array(list) if list.len() == 1 => {
            // Avoid lists of a single item.
            let only = list.into_iter().next().unwrap_or(Value::Null);
            inner(only, defs, true, processing, used_internal)?
        }
        Value::Array(list) => {
            let mut out = Vec::with_capacity(list.len());
            for item in list {
                out.push(inner(item, defs, true, processing, used_internal)?);
            }
            Value::Array(out)
        }
        other => {
            return Err(StreamlineError::Invalid(format!(
                "unexpected items type: {other}"
            )))
        }
    };
    obj.insert("items".to_string(), items);
    Ok(Value::Object(obj))
}

fn streamline_object(
    mut obj: Map<String, Value>,
    defs: &Map<String, Value>,
    processing: &mut BTreeSet<String>,
    used_internal: &mut BTreeSet<String>,
) -> Result<Value, StreamlineError> {
    let required: BTreeSet<String> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let Some(Value::Object(properties)) = obj.remove("properties") else {
        return Ok(Value::Object(obj));
    };

    let mut streamlined = Map::new();
    for (key, value) in properties {
        let is_required = required.contains(&key);
        streamlined.insert(
            key,
            inner(value, defs, is_required, processing, used_internal)?,
        );
    }
    obj.insert("properties".to_string(), Value::Object(streamlined));
    if !required.is_empty() {
        obj.insert(
            "required".to_string(),
            Value::Array(required.into_iter().map(Value::String).collect()),
        );
    }
    Ok(Value::Object(obj))
}

fn follow_ref(
    mut obj: Map<String, Value>,
    defs: &Map<String, Value>,
    is_required: bool,
    processing: &mut BTreeSet<String>,
    used_internal: &mut BTreeSet<String>,
) -> Result<Value, StreamlineError> {
    let Some(Value::String(ref_val)) = obj.get("$ref").cloned() else {
        return Err(StreamlineError::Invalid("non-string $ref".to_string()));
    };
    let ref_name = ref_val.trim_start_matches("#/$defs/").to_string();

    if processing.contains(&ref_name) {
        return Err(StreamlineError::Circular(ref_name));
    }

    if let Some(replacement) = handle_internal_ref(&ref_name, &obj, used_internal) {
        return Ok(replacement);
    }

    obj.remove("$ref");
    let Some(definition) = defs.get(&ref_name).and_then(Value::as_object) else {
        return Err(StreamlineError::Invalid(format!(
            "can't find the definition of the ref: {ref_val}"
        )));
    };

    // Merge the definition under the ref's own siblings.
    let mut merged = definition.clone();
    for (k, v) in obj {
        merged.insert(k, v);
    }

    processing.insert(ref_name.clone());
    let result = inner(Value::Object(merged), defs, is_required, processing, used_internal);
    processing.remove(&ref_name);
    result
}

/// Replace legacy internal refs with canonical ones.
///
/// We used to write `{"$ref": "#/$defs/File", "format": "image"}`, which is a
/// valid schema but harder to handle than plain `{"$ref": "#/$defs/Image"}`.
fn handle_internal_ref(
    ref_name: &str,
    obj: &Map<String, Value>,
    used_internal: &mut BTreeSet<String>,
) -> Option<Value> {
    if !INTERNAL_DEFS.contains_key(ref_name) {
        // Not an internal ref; the caller inlines it.
        return None;
    }

    let Some(format) = obj.get("format").and_then(Value::as_str) else {
        used_internal.insert(ref_name.to_string());
        return Some(Value::Object(obj.clone()));
    };

    if ref_name != "File" {
        tracing::warn!(ref_name, format, "unexpected format on a non-File ref");
        used_internal.insert(ref_name.to_string());
        return Some(Value::Object(obj.clone()));
    }

    let new_ref = match format {
        "image" => "Image",
        "audio" => "Audio",
        "pdf" => "PDF",
        other => {
            tracing::warn!(format = other, "unexpected format for internal File ref");
            used_internal.insert(ref_name.to_string());
            return Some(Value::Object(obj.clone()));
        }
    };

    let mut rewritten = obj.clone();
    rewritten.remove("format");
    rewritten.insert("$ref".to_string(), json!(format!("#/$defs/{new_ref}")));
    used_internal.insert(new_ref.to_string());
    Some(Value::Object(rewritten))
}

fn handle_ofs(
    mut obj: Map<String, Value>,
    defs: &Map<String, Value>,
    is_required: bool,
    processing: &mut BTreeSet<String>,
    used_internal: &mut BTreeSet<String>,
) -> Result<Value, StreamlineError> {
    let used_keys: Vec<&str> = OF_KEYS.iter().copied().filter(|k| obj.contains_key(*k)).collect();
    let Some(key) = used_keys.first().copied() else {
        return Ok(Value::Object(obj));
    };
    if used_keys.len() != 1 {
        return Err(StreamlineError::Invalid(
            "expected a single of key in schema".to_string(),
        ));
    }

    let Some(Value::Array(sub)) = obj.remove(key) else {
        tracing::warn!(key, "expected a list for an of key");
        return Ok(Value::Object(obj));
    };

    let not_null: Vec<&Value> = sub
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) != Some("null"))
        .collect();

    if !is_required && obj.get("default") == Some(&Value::Null) {
        obj.remove("default");
    }

    if not_null.len() != 1 {
        // Not a single non-null member; keep the composition as-is but
        // streamline each branch.
        let mut out = Vec::with_capacity(sub.len());
        for item in &sub {
            out.push(inner(item.clone(), defs, is_required, processing, used_internal)?);
        }
        obj.insert(key.to_string(), Value::Array(out));
        return Ok(Value::Object(obj));
    }

    let had_null = sub.len() > 1;
    let mut merged = obj;
    if let Value::Object(member) = not_null[0] {
        for (k, v) in member {
            merged.insert(k.clone(), v.clone());
        }
    }
    let mut streamlined = inner(Value::Object(merged), defs, is_required, processing, used_internal)?;

    if had_null && is_required {
        // The field is required but was nullable; keep null as a type array.
        if let Some(obj) = streamlined.as_object_mut() {
            if let Some(Value::String(t)) = obj.get("type").cloned() {
                obj.insert("type".to_string(), json!([t, "null"]));
                if let Some(Value::Array(variants)) = obj.get_mut("enum") {
                    variants.push(Value::Null);
                }
            }
        }
    }

    Ok(streamlined)
}
