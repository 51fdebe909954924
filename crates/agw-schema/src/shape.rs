// SPDX-License-Identifier: MIT OR Apache-2.0
//! Schema shape helpers.
//!
//! A schema pair is either *structured* (object schemas validated on every
//! run) or *raw messages*: the input schema marks `format: "messages"` and
//! the output schema `format: "message"`, meaning the agent is prompt-driven
//! and payloads are message lists and plain completions.

use serde_json::{json, Value};

use agw_core::hash::canonical_digest;

/// An input/output schema pair attached to an agent.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SchemaPair {
    /// Streamlined input schema.
    pub input_schema: Value,
    /// Streamlined output schema.
    pub output_schema: Value,
}

impl SchemaPair {
    /// A raw-messages pair: message-list input, plain-message output.
    #[must_use]
    pub fn raw_messages() -> Self {
        Self {
            input_schema: json!({"format": "messages"}),
            output_schema: json!({"format": "message"}),
        }
    }

    /// A raw-messages pair whose output is a plain string completion.
    #[must_use]
    pub fn raw_string_output() -> Self {
        Self {
            input_schema: json!({"format": "messages"}),
            output_schema: json!({"type": "string", "format": "message"}),
        }
    }

    /// Whether the input is a raw message list.
    #[must_use]
    pub fn has_raw_input(&self) -> bool {
        is_raw_messages_input(&self.input_schema)
    }

    /// Whether the output is a raw message.
    #[must_use]
    pub fn has_raw_output(&self) -> bool {
        is_raw_message_output(&self.output_schema)
    }

    /// Stable digest of the streamlined pair; identical streamlined schemas
    /// always produce the same digest.
    #[must_use]
    pub fn digest(&self) -> String {
        schema_digest(&self.input_schema, &self.output_schema)
    }
}

/// Whether an input schema marks the raw message-list form.
#[must_use]
pub fn is_raw_messages_input(schema: &Value) -> bool {
    schema.get("format").and_then(Value::as_str) == Some("messages")
}

/// Whether an output schema marks the raw message form.
#[must_use]
pub fn is_raw_message_output(schema: &Value) -> bool {
    schema.get("format").and_then(Value::as_str) == Some("message")
}

/// Stable digest of a schema pair, used to assign `schema_id`s.
#[must_use]
pub fn schema_digest(input_schema: &Value, output_schema: &Value) -> String {
    canonical_digest(&json!({
        "input": input_schema,
        "output": output_schema,
    }))
}
