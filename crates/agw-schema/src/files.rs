// SPDX-License-Identifier: MIT OR Apache-2.0
//! Embedded-file discovery and extraction.
//!
//! Structured inputs may embed files anywhere the schema references the
//! internal File / Image / Audio / PDF defs. Extraction walks schema and
//! payload together, pulls each file into a separate list (remembering its
//! key path), and replaces the in-payload object with a positional
//! `{"number": N}` placeholder the prompt builder can point at.

use serde_json::{json, Map, Value};

use agw_core::error::{ErrorKind, GatewayError};
use agw_core::file::{File, FileKind, FileWithKeyPath};

use crate::FILE_DEFS;

/// Returns `true` when the schema's `$defs` mention any file def.
#[must_use]
pub fn schema_contains_file(schema: &Value) -> bool {
    schema
        .get("$defs")
        .and_then(Value::as_object)
        .is_some_and(|defs| FILE_DEFS.iter().any(|name| defs.contains_key(*name)))
}

/// The file kind implied by a `$defs` reference, honoring the legacy
/// `File` + `format` spelling.
#[must_use]
pub fn file_format_for_ref(ref_name: &str, schema: &Value) -> Option<FileKind> {
    match ref_name.trim_start_matches("#/$defs/") {
        "Image" => Some(FileKind::Image),
        "Audio" => Some(FileKind::Audio),
        "PDF" => Some(FileKind::Pdf),
        "File" => match schema.get("format").and_then(Value::as_str) {
            Some("image") => Some(FileKind::Image),
            Some("audio") => Some(FileKind::Audio),
            Some("pdf") => Some(FileKind::Pdf),
            Some("document") => Some(FileKind::Document),
            _ => None,
        },
        _ => None,
    }
}

/// Walk `payload` guided by `schema` and extract embedded files.
///
/// Returns the adjusted schema (file defs collapsed to the placeholder
/// form), the payload with placeholders substituted, and the extracted
/// files in discovery order.
///
/// # Errors
///
/// Fails with [`ErrorKind::InvalidFile`] when an embedded file has neither
/// `url` nor `data`.
pub fn extract_files(
    schema: &Value,
    payload: &Value,
) -> Result<(Value, Value, Vec<FileWithKeyPath>), GatewayError> {
    if !schema_contains_file(schema) {
        return Ok((schema.clone(), payload.clone(), Vec::new()));
    }

    let root_defs = schema
        .get("$defs")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut out = Vec::new();
    let mut payload = payload.clone();
    find_files(schema, &mut payload, &mut out, &mut Vec::new(), &root_defs)?;

    let mut schema = schema.clone();
    if let Some(defs) = schema.get_mut("$defs").and_then(Value::as_object_mut) {
        defs.insert(
            "File".to_string(),
            json!({
                "type": "object",
                "properties": {
                    "number": {"type": "integer", "description": "The index of the file message"},
                },
            }),
        );
    }
    Ok((schema, payload, out))
}

fn find_files(
    schema: &Value,
    payload: &mut Value,
    out: &mut Vec<FileWithKeyPath>,
    key_path: &mut Vec<Value>,
    root_defs: &Map<String, Value>,
) -> Result<(), GatewayError> {
    if let Value::Array(items) = payload {
        if let Some(item_schema) = schema.get("items") {
            for (idx, item) in items.iter_mut().enumerate() {
                key_path.push(json!(idx));
                find_files(item_schema, item, out, key_path, root_defs)?;
                key_path.pop();
            }
        }
        for of_key in ["allOf", "anyOf", "oneOf"] {
            if let Some(subs) = schema.get(of_key).and_then(Value::as_array) {
                for sub in subs {
                    find_files(sub, payload, out, key_path, root_defs)?;
                }
            }
        }
        return Ok(());
    }

    if !payload.is_object() {
        return Ok(());
    }

    for of_key in ["allOf", "anyOf", "oneOf"] {
        if let Some(subs) = schema.get(of_key).and_then(Value::as_array) {
            for sub in subs {
                find_files(sub, payload, out, key_path, root_defs)?;
            }
        }
    }

    if let Some(ref_val) = schema.get("$ref").and_then(Value::as_str) {
        let ref_name = ref_val.trim_start_matches("#/$defs/");
        if FILE_DEFS.contains(&ref_name) {
            replace_file(payload, key_path, file_format_for_ref(ref_val, schema), out)?;
            return Ok(());
        }
        if let Some(def) = root_defs.get(ref_name) {
            return find_files(def, payload, out, key_path, root_defs);
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        if let Some(obj) = payload.as_object_mut() {
            for (key, value) in obj.iter_mut() {
                if let Some(prop_schema) = properties.get(key) {
                    key_path.push(json!(key));
                    find_files(prop_schema, value, out, key_path, root_defs)?;
                    key_path.pop();
                }
            }
        }
    }
    Ok(())
}

/// Validate the file payload, append it to `out`, and substitute the
/// positional placeholder.
fn replace_file(
    payload: &mut Value,
    key_path: &[Value],
    format: Option<FileKind>,
    out: &mut Vec<FileWithKeyPath>,
) -> Result<(), GatewayError> {
    let mut file: File = serde_json::from_value(payload.clone()).map_err(|e| {
        GatewayError::new(ErrorKind::InvalidFile, format!("invalid file payload: {e}"))
            .with_detail("file", payload.clone())
    })?;
    if file.url.is_none() && file.data.is_none() {
        return Err(GatewayError::new(
            ErrorKind::InvalidFile,
            "file has neither url nor data",
        )
        .with_detail("key_path", Value::Array(key_path.to_vec())));
    }
    if file.format.is_none() {
        file.format = format;
    }
    *payload = json!({"number": out.len()});
    out.push(FileWithKeyPath {
        file,
        key_path: key_path.to_vec(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn image_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "photo": {"$ref": "#/$defs/Image"},
                "caption": {"type": "string"},
            },
            "$defs": {"Image": {"type": "object"}},
        })
    }

    #[test]
    fn schemas_without_file_defs_pass_through() {
        let schema = json!({"type": "object", "properties": {"a": {"type": "string"}}});
        let payload = json!({"a": "x"});
        let (s, p, files) = extract_files(&schema, &payload).unwrap();
        assert_eq!(s, schema);
        assert_eq!(p, payload);
        assert!(files.is_empty());
    }

    #[test]
    fn extracts_a_single_image() {
        let payload = json!({
            "photo": {"url": "https://example.com/cat.png", "content_type": "image/png"},
            "caption": "a cat",
        });
        let (schema, payload, files) = extract_files(&image_schema(), &payload).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file.url.as_deref(), Some("https://example.com/cat.png"));
        assert_eq!(files[0].file.format, Some(FileKind::Image));
        assert_eq!(files[0].key_path, vec![json!("photo")]);
        assert_eq!(payload["photo"], json!({"number": 0}));
        // The File def is collapsed to the placeholder form.
        assert!(schema["$defs"]["File"]["properties"].get("number").is_some());
    }

    #[test]
    fn extracts_files_from_arrays_with_indices() {
        let schema = json!({
            "type": "object",
            "properties": {
                "photos": {"type": "array", "items": {"$ref": "#/$defs/Image"}},
            },
            "$defs": {"Image": {"type": "object"}},
        });
        let payload = json!({
            "photos": [
                {"url": "https://a"},
                {"url": "https://b"},
            ],
        });
        let (_, payload, files) = extract_files(&schema, &payload).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].key_path, vec![json!("photos"), json!(0)]);
        assert_eq!(files[1].key_path, vec![json!("photos"), json!(1)]);
        assert_eq!(payload["photos"], json!([{"number": 0}, {"number": 1}]));
    }

    #[test]
    fn follows_refs_through_root_defs() {
        let schema = json!({
            "type": "object",
            "properties": {"wrapper": {"$ref": "#/$defs/Wrapper"}},
            "$defs": {
                "Wrapper": {
                    "type": "object",
                    "properties": {"file": {"$ref": "#/$defs/PDF"}},
                },
                "PDF": {"type": "object"},
            },
        });
        let payload = json!({"wrapper": {"file": {"data": "aGk=", "content_type": "application/pdf"}}});
        let (_, payload, files) = extract_files(&schema, &payload).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file.format, Some(FileKind::Pdf));
        assert_eq!(payload["wrapper"]["file"], json!({"number": 0}));
    }

    #[test]
    fn legacy_file_format_ref_sets_kind() {
        let schema = json!({
            "type": "object",
            "properties": {"clip": {"$ref": "#/$defs/File", "format": "audio"}},
            "$defs": {"File": {"type": "object"}},
        });
        let payload = json!({"clip": {"url": "https://a.mp3"}});
        let (_, _, files) = extract_files(&schema, &payload).unwrap();
        assert_eq!(files[0].file.format, Some(FileKind::Audio));
    }

    #[test]
    fn empty_file_is_rejected() {
        let payload = json!({"photo": {}, "caption": "?"});
        let err = extract_files(&image_schema(), &payload).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidFile);
    }
}
