// SPDX-License-Identifier: MIT OR Apache-2.0
//! agw-template
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Jinja-style templating for version messages.
//!
//! Version prompts may carry `{{variable}}` placeholders. Rendering expands
//! them from the request's input variables, records which variables were
//! consumed (unused ones stay in the stored input record), and fails with
//! `invalid_template` — including line and column — when a template
//! references a variable the input does not provide.

use std::collections::BTreeSet;

use minijinja::Environment;
use serde_json::Value;

use agw_core::error::{ErrorKind, GatewayError};
use agw_core::message::{Message, MessageContent};

/// Returns `true` when the string contains template syntax.
#[must_use]
pub fn contains_template(s: &str) -> bool {
    s.contains("{{") || s.contains("{%")
}

/// Render a single template string against the provided variables.
///
/// Returns the rendered string and the set of top-level variables the
/// template consumed.
///
/// # Errors
///
/// [`ErrorKind::InvalidTemplate`] when the template is syntactically invalid
/// or references a variable absent from `variables`; details carry `line`
/// and `column`.
pub fn render_str(
    source: &str,
    variables: &serde_json::Map<String, Value>,
) -> Result<(String, BTreeSet<String>), GatewayError> {
    if !contains_template(source) {
        return Ok((source.to_string(), BTreeSet::new()));
    }

    let env = Environment::new();
    let template = env.template_from_str(source).map_err(|e| {
        let line = e.line().unwrap_or(1);
        GatewayError::new(ErrorKind::InvalidTemplate, format!("invalid template: {e}"))
            .with_detail("line", line)
            .with_detail("column", 1)
    })?;

    let referenced: BTreeSet<String> = template
        .undeclared_variables(false)
        .into_iter()
        .collect();

    // Undefined variables are located before rendering so the error can
    // carry a precise position.
    for name in &referenced {
        if !variables.contains_key(name) {
            let (line, column) = locate_variable(source, name);
            return Err(GatewayError::new(
                ErrorKind::InvalidTemplate,
                format!("undefined template variable: {name}"),
            )
            .with_detail("variable", name.clone())
            .with_detail("line", line)
            .with_detail("column", column));
        }
    }

    let context = minijinja::Value::from_serialize(variables);
    let rendered = template.render(context).map_err(|e| {
        let line = e.line().unwrap_or(1);
        GatewayError::new(ErrorKind::InvalidTemplate, format!("template render failed: {e}"))
            .with_detail("line", line)
            .with_detail("column", 1)
    })?;

    let used: BTreeSet<String> = referenced
        .into_iter()
        .filter(|name| variables.contains_key(name))
        .collect();
    Ok((rendered, used))
}

/// Find the 1-based line and column of the first reference to `name`.
fn locate_variable(source: &str, name: &str) -> (usize, usize) {
    for (line_idx, line) in source.lines().enumerate() {
        let mut search_from = 0;
        while let Some(open) = line[search_from..].find("{{") {
            let start = search_from + open;
            let rest = &line[start..];
            let end = rest.find("}}").map_or(rest.len(), |e| e + 2);
            if rest[..end].contains(name) {
                return (line_idx + 1, start + 1);
            }
            search_from = start + 2;
        }
    }
    (1, 1)
}

/// Render each text block of each message.
///
/// Non-text blocks pass through unchanged. Returns the rendered messages
/// and the union of consumed variables.
///
/// # Errors
///
/// Propagates [`render_str`] failures.
pub fn render_messages(
    messages: &[Message],
    variables: &serde_json::Map<String, Value>,
) -> Result<(Vec<Message>, BTreeSet<String>), GatewayError> {
    let mut used = BTreeSet::new();
    let mut rendered = Vec::with_capacity(messages.len());
    for message in messages {
        let mut content = Vec::with_capacity(message.content.len());
        for block in &message.content {
            match block {
                MessageContent::Text { text } => {
                    let (text, consumed) = render_str(text, variables)?;
                    used.extend(consumed);
                    content.push(MessageContent::Text { text });
                }
                other => content.push(other.clone()),
            }
        }
        rendered.push(Message {
            role: message.role,
            content,
        });
    }
    Ok((rendered, used))
}

/// Render the legacy `instructions` string and build the trailing user
/// message from input keys the template did not consume.
///
/// The user message lists leftover keys as `"key: value"` lines; an empty
/// leftover set yields no message.
///
/// # Errors
///
/// Propagates [`render_str`] failures.
pub fn render_instructions(
    instructions: &str,
    variables: &serde_json::Map<String, Value>,
) -> Result<(String, Option<String>, BTreeSet<String>), GatewayError> {
    let (rendered, used) = render_str(instructions, variables)?;
    let leftover = leftover_user_message(variables, &used);
    Ok((rendered, leftover, used))
}

/// Build the `"key: value"` user message for unconsumed input keys.
#[must_use]
pub fn leftover_user_message(
    variables: &serde_json::Map<String, Value>,
    used: &BTreeSet<String>,
) -> Option<String> {
    let lines: Vec<String> = variables
        .iter()
        .filter(|(key, _)| !used.contains(*key))
        .map(|(key, value)| match value {
            Value::String(s) => format!("{key}: {s}"),
            other => format!("{key}: {other}"),
        })
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn plain_strings_render_verbatim() {
        let (out, used) = render_str("Hello, world!", &vars(json!({}))).unwrap();
        assert_eq!(out, "Hello, world!");
        assert!(used.is_empty());
    }

    #[test]
    fn variables_expand() {
        let (out, used) = render_str("Hello, {{ name }}!", &vars(json!({"name": "John"}))).unwrap();
        assert_eq!(out, "Hello, John!");
        assert!(used.contains("name"));
    }

    #[test]
    fn undefined_variable_reports_line_and_column() {
        let source = "Hello!\nYour order {{ order_id }} shipped.";
        let err = render_str(source, &vars(json!({"name": "x"}))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTemplate);
        assert_eq!(err.details.get("line"), Some(&json!(2)));
        assert_eq!(err.details.get("column"), Some(&json!(12)));
        assert_eq!(err.details.get("variable"), Some(&json!("order_id")));
    }

    #[test]
    fn syntax_errors_are_invalid_template() {
        let err = render_str("{{ name", &vars(json!({"name": "x"}))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTemplate);
    }

    #[test]
    fn unused_variables_are_not_reported_as_used() {
        let (_, used) = render_str(
            "Hello, {{ name }}!",
            &vars(json!({"name": "John", "age": 3})),
        )
        .unwrap();
        assert_eq!(used.len(), 1);
    }

    #[test]
    fn messages_render_text_blocks_only() {
        let messages = vec![
            Message::system("You greet {{ name }}."),
            Message::user("Hi!"),
        ];
        let (rendered, used) =
            render_messages(&messages, &vars(json!({"name": "Cecily"}))).unwrap();
        assert_eq!(rendered[0].text(), "You greet Cecily.");
        assert_eq!(rendered[1].text(), "Hi!");
        assert!(used.contains("name"));
    }

    #[test]
    fn instructions_append_leftover_keys() {
        let (rendered, leftover, used) = render_instructions(
            "Summarize for {{ audience }}.",
            &vars(json!({"audience": "kids", "topic": "space"})),
        )
        .unwrap();
        assert_eq!(rendered, "Summarize for kids.");
        assert_eq!(leftover.as_deref(), Some("topic: space"));
        assert!(used.contains("audience"));
    }

    #[test]
    fn no_leftover_message_when_everything_was_used() {
        let (_, leftover, _) =
            render_instructions("{{ a }}", &vars(json!({"a": "x"}))).unwrap();
        assert!(leftover.is_none());
    }

    #[test]
    fn non_string_leftovers_render_as_json() {
        let leftover =
            leftover_user_message(&vars(json!({"count": 3})), &BTreeSet::new()).unwrap();
        assert_eq!(leftover, "count: 3");
    }
}
