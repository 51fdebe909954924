// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured-output schema preparation.
//!
//! Providers that support schema-guided decoding are strict about the
//! schemas they accept: every object must set `additionalProperties: false`
//! and list all of its properties as required. Originally-optional fields
//! keep their optionality through nullability: `anyOf [T, null]`.

use serde_json::{json, Map, Value};

/// Prepare a streamlined output schema for schema-guided decoding.
///
/// Returns `None` when the schema is not representable in strict mode (for
/// example a non-object root with no type), in which case callers fall back
/// to a JSON-object response format.
#[must_use]
pub fn prepare_output_schema(schema: &Value) -> Option<Value> {
    let obj = schema.as_object()?;
    if obj.get("format").and_then(Value::as_str) == Some("message") {
        return None;
    }
    Some(prepare(schema))
}

fn prepare(schema: &Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return schema.clone();
    };
    let mut out = obj.clone();

    match obj.get("type").and_then(Value::as_str) {
        Some("object") => prepare_object(&mut out),
        Some("array") => {
            if let Some(items) = obj.get("items") {
                out.insert("items".to_string(), prepare(items));
            }
        }
        _ => {}
    }

    for of_key in ["anyOf", "oneOf", "allOf"] {
        if let Some(Value::Array(subs)) = obj.get(of_key) {
            out.insert(
                of_key.to_string(),
                Value::Array(subs.iter().map(prepare).collect()),
            );
        }
    }
    Value::Object(out)
}

fn prepare_object(out: &mut Map<String, Value>) {
    out.insert("additionalProperties".to_string(), json!(false));

    let Some(Value::Object(properties)) = out.get("properties").cloned() else {
        return;
    };
    let originally_required: Vec<String> = out
        .get("required")
        .and_then(Value::as_array)
        .map(|r| {
            r.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut prepared = Map::new();
    for (key, prop) in &properties {
        let mut p = prepare(prop);
        if !originally_required.contains(key) {
            // Optional fields become required-but-nullable.
            p = json!({"anyOf": [p, {"type": "null"}]});
        }
        prepared.insert(key.clone(), p);
    }

    let all_keys: Vec<Value> = properties.keys().cloned().map(Value::String).collect();
    out.insert("properties".to_string(), Value::Object(prepared));
    out.insert("required".to_string(), Value::Array(all_keys));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objects_become_strict() {
        let schema = json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"},
            },
        });
        let out = prepare_output_schema(&schema).unwrap();
        assert_eq!(out["additionalProperties"], json!(false));
        let required = out["required"].as_array().unwrap();
        assert_eq!(required.len(), 2);
        // Optional field kept optional via nullability.
        assert_eq!(
            out["properties"]["age"],
            json!({"anyOf": [{"type": "integer"}, {"type": "null"}]})
        );
        // Required field untouched.
        assert_eq!(out["properties"]["name"], json!({"type": "string"}));
    }

    #[test]
    fn nested_objects_are_prepared_recursively() {
        let schema = json!({
            "type": "object",
            "required": ["pet"],
            "properties": {
                "pet": {
                    "type": "object",
                    "properties": {"name": {"type": "string"}},
                },
            },
        });
        let out = prepare_output_schema(&schema).unwrap();
        assert_eq!(out["properties"]["pet"]["additionalProperties"], json!(false));
        assert_eq!(
            out["properties"]["pet"]["properties"]["name"],
            json!({"anyOf": [{"type": "string"}, {"type": "null"}]})
        );
    }

    #[test]
    fn array_items_are_prepared() {
        let schema = json!({
            "type": "array",
            "items": {"type": "object", "properties": {"x": {"type": "number"}}},
        });
        let out = prepare_output_schema(&schema).unwrap();
        assert_eq!(out["items"]["additionalProperties"], json!(false));
    }

    #[test]
    fn raw_message_schemas_are_not_schema_guided() {
        assert!(prepare_output_schema(&json!({"format": "message"})).is_none());
        assert!(prepare_output_schema(&json!({"type": "string", "format": "message"})).is_none());
    }
}
