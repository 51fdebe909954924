// SPDX-License-Identifier: MIT OR Apache-2.0
//! Best-effort completion of truncated JSON.
//!
//! While a completion streams, the accumulated text is usually a prefix of a
//! JSON document. This module closes open strings, arrays, and objects so
//! the prefix can be parsed and surfaced as a partial structured output.
//! Dangling tokens (a trailing comma, a key waiting for its value) are
//! trimmed before closing.

use serde_json::Value;

/// Try to parse `raw` as JSON, completing a truncated suffix when needed.
///
/// Returns `None` when no sensible completion exists (e.g. plain prose).
#[must_use]
pub fn parse_partial_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let completed = complete(trimmed)?;
    serde_json::from_str(&completed).ok()
}

/// Scan the prefix and append whatever closes it.
fn complete(raw: &str) -> Option<String> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in raw.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
            }
            _ => {}
        }
    }

    let mut out = raw.to_string();
    if escaped {
        // A lone trailing backslash cannot be completed meaningfully.
        out.pop();
    }
    if in_string {
        out.push('"');
    }

    // Trim tokens that would make the close invalid: trailing commas and
    // keys with no value yet.
    loop {
        let t = out.trim_end();
        if let Some(stripped) = t.strip_suffix(',') {
            out = stripped.to_string();
            continue;
        }
        if let Some(stripped) = t.strip_suffix(':') {
            // `"key":` → drop the key entirely.
            out = match stripped.trim_end().rfind('"').and_then(|end| {
                let before = &stripped[..end];
                before.rfind('"').map(|start| stripped[..start].to_string())
            }) {
                Some(without_key) => without_key,
                None => return None,
            };
            out = out.trim_end().trim_end_matches(',').to_string();
            continue;
        }
        break;
    }

    while let Some(close) = stack.pop() {
        out.push(close);
    }
    Some(out)
}

/// Extract the JSON document embedded in `raw`, tolerating prose or code
/// fences around it: the slice from the first `{` or `[` to the matching
/// closer.
#[must_use]
pub fn extract_json_str(raw: &str) -> Option<&str> {
    let start = raw.find(['{', '['])?;
    let rest = &raw[start..];
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (idx, c) in rest.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(&rest[..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_finds_fenced_json() {
        let raw = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_json_str(raw), Some("{\"a\": 1}"));
    }

    #[test]
    fn extract_ignores_surrounding_prose() {
        let raw = "Here you go: {\"a\": 1} hope that helps";
        assert_eq!(extract_json_str(raw), Some("{\"a\": 1}"));
    }

    #[test]
    fn extract_fails_on_plain_text() {
        assert_eq!(extract_json_str("no json here"), None);
        assert_eq!(extract_json_str("{\"unclosed\": 1"), None);
    }

    #[test]
    fn complete_json_parses_directly() {
        assert_eq!(parse_partial_json("{\"a\": 1}"), Some(json!({"a": 1})));
    }

    #[test]
    fn open_object_is_closed() {
        assert_eq!(parse_partial_json("{\"a\": 1"), Some(json!({"a": 1})));
    }

    #[test]
    fn open_string_is_closed() {
        assert_eq!(
            parse_partial_json("{\"greeting\": \"Hel"),
            Some(json!({"greeting": "Hel"}))
        );
    }

    #[test]
    fn dangling_key_is_trimmed() {
        assert_eq!(parse_partial_json("{\"a\": 1, \"b\":"), Some(json!({"a": 1})));
    }

    #[test]
    fn trailing_comma_is_trimmed() {
        assert_eq!(parse_partial_json("[1, 2,"), Some(json!([1, 2])));
    }

    #[test]
    fn nested_structures_close_in_order() {
        assert_eq!(
            parse_partial_json("{\"items\": [{\"name\": \"a\""),
            Some(json!({"items": [{"name": "a"}]}))
        );
    }

    #[test]
    fn prose_is_not_json() {
        assert_eq!(parse_partial_json("Let me think about that"), None);
        assert_eq!(parse_partial_json(""), None);
    }

    #[test]
    fn escaped_quotes_inside_strings() {
        assert_eq!(
            parse_partial_json("{\"a\": \"say \\\"hi\\\""),
            Some(json!({"a": "say \"hi\""}))
        );
    }

    #[test]
    fn mismatched_closers_fail() {
        assert_eq!(parse_partial_json("{\"a\": [1}"), None);
    }

    #[test]
    fn growing_prefixes_converge_to_the_full_document() {
        let full = "{\"name\": \"John\", \"tags\": [\"a\", \"b\"]}";
        for cut in 1..full.len() {
            let prefix = &full[..cut];
            // Every prefix either parses to something or is skipped; the
            // final cut must parse exactly.
            let _ = parse_partial_json(prefix);
        }
        assert_eq!(
            parse_partial_json(full),
            Some(json!({"name": "John", "tags": ["a", "b"]}))
        );
    }
}
