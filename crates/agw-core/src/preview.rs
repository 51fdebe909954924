// SPDX-License-Identifier: MIT OR Apache-2.0
//! Human-readable previews of inputs and outputs.
//!
//! Previews are short, type-aware summaries stored alongside runs so search
//! listings never have to load full payloads.

use serde_json::Value;

/// Maximum preview length in characters.
const MAX_PREVIEW_LEN: usize = 200;

/// Compute a short preview of an arbitrary JSON value.
///
/// Strings are truncated with an ellipsis, files render as `[img:url]` /
/// `[file:url]`, objects render as a labelled `key: value` list, arrays as a
/// bracketed item list.
#[must_use]
pub fn compute_preview(value: &Value) -> String {
    truncate(&preview_value(value))
}

/// Preview of a raw-messages payload: the text of the last message prefixed
/// with its role, e.g. `"User: Hello, world!"`.
#[must_use]
pub fn message_preview(role: &str, text: &str) -> String {
    let label = match role {
        "user" => "User",
        "assistant" => "Assistant",
        "system" => "System",
        other => other,
    };
    truncate(&format!("{label}: {text}"))
}

fn preview_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(preview_value).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            if let Some(file) = file_preview(map) {
                return file;
            }
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{k}: {}", preview_value(v)))
                .collect();
            inner.join(", ")
        }
    }
}

/// Render objects that look like file payloads as a compact tag.
fn file_preview(map: &serde_json::Map<String, Value>) -> Option<String> {
    if !map.contains_key("url") && !map.contains_key("storage_url") && !map.contains_key("data") {
        return None;
    }
    let content_type = map.get("content_type").and_then(Value::as_str).unwrap_or("");
    let url = map
        .get("url")
        .or_else(|| map.get("storage_url"))
        .and_then(Value::as_str)
        .unwrap_or("<data>");
    let tag = if content_type.starts_with("image/") { "img" } else { "file" };
    Some(format!("[{tag}:{url}]"))
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_PREVIEW_LEN {
        return s.to_string();
    }
    let cut: String = s.chars().take(MAX_PREVIEW_LEN - 1).collect();
    format!("{cut}…")
}
