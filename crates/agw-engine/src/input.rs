// SPDX-License-Identifier: MIT OR Apache-2.0
//! The input pipeline.
//!
//! Turns a schema, a version's prompt, and the caller's raw input into the
//! message list for the provider, the canonical input record for
//! persistence, the extracted file list, and the input fingerprint. The
//! fingerprint is computed after file hoisting: files contribute their URL
//! or content hash, never raw bytes.

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

use agw_core::error::GatewayError;
use agw_core::file::FileWithKeyPath;
use agw_core::hash::canonical_digest;
use agw_core::message::{Message, MessageContent};
use agw_core::version::VersionProperties;
use agw_schema::{extract_files, validate_instance, SchemaPair};
use agw_template::{leftover_user_message, render_instructions, render_messages};

use crate::keypath::set_at_keypath;

/// Everything the runner needs from the input stage.
#[derive(Debug, Clone)]
pub struct PreparedInput {
    /// Messages to send to the provider.
    pub messages: Vec<Message>,
    /// The canonical input stored on the run.
    pub canonical_input: Value,
    /// Files extracted from the payload, with their key paths.
    pub files: Vec<FileWithKeyPath>,
    /// Template variables that were consumed.
    pub used_variables: BTreeSet<String>,
    /// Fingerprint of the canonical input.
    pub input_hash: String,
    /// Whether the output is structured (validated JSON) rather than raw.
    pub structured_output: bool,
    /// The streamlined output schema.
    pub output_schema: Value,
}

/// Prepare a *structured* input: validate, extract files, template, hash.
///
/// # Errors
///
/// `bad_request` on schema violations, `invalid_file` on bad file payloads,
/// `invalid_template` on templating failures.
pub fn prepare_structured_input(
    schema: &SchemaPair,
    properties: &VersionProperties,
    raw_input: Value,
) -> Result<PreparedInput, GatewayError> {
    validate_instance(&schema.input_schema, &raw_input)?;
    let (_, payload_with_placeholders, files) = extract_files(&schema.input_schema, &raw_input)?;

    let variables = payload_with_placeholders
        .as_object()
        .cloned()
        .unwrap_or_default();
    let (mut messages, used_variables) = prompt_messages(properties, &variables)?;

    // Whatever the templates did not consume goes into a trailing user
    // message, files attached.
    let leftover = leftover_user_message(&variables, &used_variables);
    let mut trailing: Vec<MessageContent> = Vec::new();
    if let Some(text) = leftover {
        trailing.push(MessageContent::Text { text });
    }
    for file in &files {
        trailing.push(MessageContent::File {
            file: file.file.clone(),
        });
    }
    if !trailing.is_empty() {
        messages.push(Message {
            role: agw_core::message::Role::User,
            content: trailing,
        });
    }

    let input_hash = hash_with_files(&payload_with_placeholders, &files);
    Ok(PreparedInput {
        messages,
        canonical_input: raw_input,
        files,
        used_variables,
        input_hash,
        structured_output: !schema.has_raw_output(),
        output_schema: schema.output_schema.clone(),
    })
}

/// Prepare a *raw messages* input: version prompt plus request messages.
///
/// # Errors
///
/// `invalid_template` on templating failures.
pub fn prepare_raw_input(
    schema: &SchemaPair,
    properties: &VersionProperties,
    request_messages: Vec<Message>,
    variables: Map<String, Value>,
) -> Result<PreparedInput, GatewayError> {
    let (mut messages, used_variables) = prompt_messages(properties, &variables)?;
    messages.extend(request_messages.iter().cloned());

    let serialized_messages = serde_json::to_value(&request_messages)
        .map_err(|e| GatewayError::internal(format!("failed to serialize messages: {e}")))?;

    // The stored input is the variables record; messages ride along only
    // when the request carried any.
    let mut canonical = variables.clone();
    if !request_messages.is_empty() {
        canonical.insert("messages".to_string(), serialized_messages);
    }
    let canonical_input = Value::Object(canonical);

    let input_hash = canonical_digest(&fingerprint_files_in(canonical_input.clone()));
    Ok(PreparedInput {
        messages,
        canonical_input,
        files: Vec::new(),
        used_variables,
        input_hash,
        structured_output: !schema.has_raw_output(),
        output_schema: schema.output_schema.clone(),
    })
}

/// Render the version's prompt: message templates when present, otherwise
/// the legacy instructions string as a system message.
fn prompt_messages(
    properties: &VersionProperties,
    variables: &Map<String, Value>,
) -> Result<(Vec<Message>, BTreeSet<String>), GatewayError> {
    if let Some(templates) = &properties.messages {
        return render_messages(templates, variables);
    }
    if let Some(instructions) = &properties.instructions {
        let (rendered, _, used) = render_instructions(instructions, variables)?;
        return Ok((vec![Message::system(rendered)], used));
    }
    Ok((Vec::new(), BTreeSet::new()))
}

/// Fingerprint of a payload whose files were replaced by placeholders:
/// each placeholder position gets the file's stable fingerprint.
fn hash_with_files(payload_with_placeholders: &Value, files: &[FileWithKeyPath]) -> String {
    let mut view = payload_with_placeholders.clone();
    for file in files {
        set_at_keypath(&mut view, &file.key_path, json!(file.file.fingerprint()));
    }
    canonical_digest(&view)
}

/// Replace inline file payloads inside an arbitrary value with their
/// fingerprints, for hashing raw-message inputs.
fn fingerprint_files_in(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.contains_key("data")
                && (map.contains_key("content_type")
                    || map.contains_key("url")
                    || map.contains_key("format"))
            {
                if let Ok(file) = serde_json::from_value::<agw_core::file::File>(Value::Object(
                    map.clone(),
                )) {
                    return json!(file.fingerprint());
                }
            }
            Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, fingerprint_files_in(v)))
                    .collect(),
            )
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(fingerprint_files_in).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agw_core::error::ErrorKind;

    fn structured_schema() -> SchemaPair {
        SchemaPair {
            input_schema: json!({
                "type": "object",
                "required": ["name"],
                "properties": {"name": {"type": "string"}},
            }),
            output_schema: json!({
                "type": "object",
                "properties": {"greeting": {"type": "string"}},
            }),
        }
    }

    fn templated_version(template: &str) -> VersionProperties {
        VersionProperties {
            model: Some("gpt-4o".into()),
            messages: Some(vec![Message::user(template)]),
            ..Default::default()
        }
    }

    #[test]
    fn structured_input_is_validated() {
        let err = prepare_structured_input(
            &structured_schema(),
            &templated_version("Hello, {{ name }}!"),
            json!({}),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }

    #[test]
    fn templates_render_from_the_input() {
        let prepared = prepare_structured_input(
            &structured_schema(),
            &templated_version("Hello, {{ name }}!"),
            json!({"name": "John"}),
        )
        .unwrap();
        assert_eq!(prepared.messages[0].text(), "Hello, John!");
        assert_eq!(prepared.canonical_input, json!({"name": "John"}));
        assert!(prepared.used_variables.contains("name"));
        // Everything was consumed; no trailing user message.
        assert_eq!(prepared.messages.len(), 1);
    }

    #[test]
    fn unconsumed_keys_become_a_trailing_user_message() {
        let schema = SchemaPair {
            input_schema: json!({
                "type": "object",
                "properties": {"name": {"type": "string"}, "topic": {"type": "string"}},
            }),
            output_schema: json!({"type": "object"}),
        };
        let prepared = prepare_structured_input(
            &schema,
            &templated_version("Hello, {{ name }}!"),
            json!({"name": "John", "topic": "space"}),
        )
        .unwrap();
        assert_eq!(prepared.messages.len(), 2);
        assert_eq!(prepared.messages[1].text(), "topic: space");
    }

    #[test]
    fn instructions_render_as_a_system_message() {
        let properties = VersionProperties {
            model: Some("gpt-4o".into()),
            instructions: Some("Greet {{ name }} warmly.".into()),
            ..Default::default()
        };
        let prepared = prepare_structured_input(
            &structured_schema(),
            &properties,
            json!({"name": "John"}),
        )
        .unwrap();
        assert_eq!(prepared.messages[0].role, agw_core::message::Role::System);
        assert_eq!(prepared.messages[0].text(), "Greet John warmly.");
    }

    #[test]
    fn input_hash_is_stable_and_sensitive() {
        let a = prepare_structured_input(
            &structured_schema(),
            &templated_version("Hello, {{ name }}!"),
            json!({"name": "John"}),
        )
        .unwrap();
        let b = prepare_structured_input(
            &structured_schema(),
            &templated_version("Hello, {{ name }}!"),
            json!({"name": "John"}),
        )
        .unwrap();
        assert_eq!(a.input_hash, b.input_hash);
        let c = prepare_structured_input(
            &structured_schema(),
            &templated_version("Hello, {{ name }}!"),
            json!({"name": "Jane"}),
        )
        .unwrap();
        assert_ne!(a.input_hash, c.input_hash);
    }

    #[test]
    fn files_are_extracted_and_fingerprinted_not_hashed_raw() {
        let schema = SchemaPair {
            input_schema: json!({
                "type": "object",
                "properties": {"photo": {"$ref": "#/$defs/Image"}},
                "$defs": {"Image": {"type": "object"}},
            }),
            output_schema: json!({"type": "object"}),
        };
        let input = json!({"photo": {"data": "aGVsbG8=", "content_type": "image/png"}});
        let prepared =
            prepare_structured_input(&schema, &VersionProperties::default(), input.clone())
                .unwrap();
        assert_eq!(prepared.files.len(), 1);
        // The canonical record keeps the original payload.
        assert_eq!(prepared.canonical_input, input);
        // The file travels as a message block.
        assert_eq!(prepared.messages.last().unwrap().files().len(), 1);
    }

    #[test]
    fn raw_input_prepends_version_prompt() {
        let schema = SchemaPair::raw_string_output();
        let prepared = prepare_raw_input(
            &schema,
            &templated_version("Hello, {{ name }}!"),
            vec![Message::user("How are you?")],
            json!({"name": "Cecily"}).as_object().cloned().unwrap(),
        )
        .unwrap();
        assert_eq!(prepared.messages[0].text(), "Hello, Cecily!");
        assert_eq!(prepared.messages[1].text(), "How are you?");
        assert!(!prepared.structured_output);
        assert_eq!(prepared.canonical_input["name"], "Cecily");
    }

    #[test]
    fn raw_input_without_variables_stores_messages() {
        let schema = SchemaPair::raw_string_output();
        let prepared = prepare_raw_input(
            &schema,
            &VersionProperties::default(),
            vec![Message::user("Hello, world!")],
            Map::new(),
        )
        .unwrap();
        assert!(prepared.canonical_input.get("messages").is_some());
        assert_eq!(prepared.messages.len(), 1);
    }

    #[test]
    fn raw_hash_fingerprints_inline_file_data() {
        let schema = SchemaPair::raw_messages();
        let with_file = vec![Message {
            role: agw_core::message::Role::User,
            content: vec![MessageContent::File {
                file: agw_core::file::File {
                    data: Some("aGVsbG8=".into()),
                    content_type: Some("image/png".into()),
                    ..Default::default()
                },
            }],
        }];
        let a = prepare_raw_input(&schema, &VersionProperties::default(), with_file.clone(), Map::new())
            .unwrap();
        let b = prepare_raw_input(&schema, &VersionProperties::default(), with_file, Map::new())
            .unwrap();
        assert_eq!(a.input_hash, b.input_hash);
    }

    #[test]
    fn undefined_template_variable_is_invalid_template() {
        let err = prepare_raw_input(
            &SchemaPair::raw_messages(),
            &templated_version("Hello, {{ missing }}!"),
            vec![],
            Map::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidTemplate);
    }
}
