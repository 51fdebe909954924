// SPDX-License-Identifier: MIT OR Apache-2.0
//! The canonical message form.
//!
//! Providers each speak their own wire schema; adapters translate to and from
//! this one. A message is a role plus ordered content blocks. Reasoning
//! emitted by thinking models is carried in [`ReasoningStep`]s, never mixed
//! into text content.

use serde::{Deserialize, Serialize};

use crate::file::File;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System prompt.
    System,
    /// End-user turn.
    User,
    /// Model turn.
    Assistant,
}

/// One ordered content block inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text.
    Text {
        /// The text payload.
        text: String,
    },
    /// An embedded file (image, audio, pdf, or document).
    File {
        /// The file payload.
        file: File,
    },
    /// A tool invocation requested by the model.
    ToolCallRequest(ToolCallRequest),
    /// The result of a tool invocation, fed back to the model.
    ToolCallResult(ToolCallResult),
    /// Reasoning text surfaced by a thinking model.
    Reasoning {
        /// The reasoning payload.
        text: String,
    },
}

/// A message in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author role.
    pub role: Role,
    /// Ordered content blocks.
    pub content: Vec<MessageContent>,
}

impl Message {
    /// A system message with a single text block.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![MessageContent::Text { text: text.into() }],
        }
    }

    /// A user message with a single text block.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![MessageContent::Text { text: text.into() }],
        }
    }

    /// An assistant message with a single text block.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![MessageContent::Text { text: text.into() }],
        }
    }

    /// Concatenation of all text blocks.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                MessageContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// All file blocks, in order.
    #[must_use]
    pub fn files(&self) -> Vec<&File> {
        self.content
            .iter()
            .filter_map(|c| match c {
                MessageContent::File { file } => Some(file),
                _ => None,
            })
            .collect()
    }

    /// All tool-call requests, in order.
    #[must_use]
    pub fn tool_call_requests(&self) -> Vec<&ToolCallRequest> {
        self.content
            .iter()
            .filter_map(|c| match c {
                MessageContent::ToolCallRequest(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    /// All tool-call results, in order.
    #[must_use]
    pub fn tool_call_results(&self) -> Vec<&ToolCallResult> {
        self.content
            .iter()
            .filter_map(|c| match c {
                MessageContent::ToolCallResult(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned call id.
    pub id: String,
    /// Canonical tool name; hosted tools start with `@`.
    pub tool_name: String,
    /// Parsed JSON arguments.
    pub tool_input: serde_json::Value,
}

impl ToolCallRequest {
    /// Stable identity of this request within a run: name plus the canonical
    /// serialization of its input. Used by the recursion guard.
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}:{}", self.tool_name, self.tool_input)
    }
}

/// The outcome of a tool invocation, fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Id of the request this answers.
    pub id: String,
    /// Tool name, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error string when the tool failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A completed tool call stored on the run: request plus outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call id.
    pub id: String,
    /// Canonical tool name.
    pub tool_name: String,
    /// Parsed JSON arguments.
    pub tool_input: serde_json::Value,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error string when the tool failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCall {
    /// Combine a request with its outcome.
    #[must_use]
    pub fn from_request(request: &ToolCallRequest, result: ToolCallResult) -> Self {
        Self {
            id: request.id.clone(),
            tool_name: request.tool_name.clone(),
            tool_input: request.tool_input.clone(),
            result: result.result,
            error: result.error,
        }
    }
}

// ---------------------------------------------------------------------------
// Reasoning
// ---------------------------------------------------------------------------

/// One reasoning step surfaced by a thinking model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// Optional short title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Accumulated reasoning text.
    pub explanation: String,
}

impl ReasoningStep {
    /// Append a streamed fragment to the explanation.
    pub fn append(&mut self, fragment: &str) {
        self.explanation.push_str(fragment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_concatenates_blocks() {
        let m = Message {
            role: Role::User,
            content: vec![
                MessageContent::Text { text: "a".into() },
                MessageContent::File { file: File::default() },
                MessageContent::Text { text: "b".into() },
            ],
        };
        assert_eq!(m.text(), "ab");
        assert_eq!(m.files().len(), 1);
    }

    #[test]
    fn request_identity_is_stable_per_arguments() {
        let a = ToolCallRequest {
            id: "1".into(),
            tool_name: "@search-google".into(),
            tool_input: serde_json::json!({"query": "rust"}),
        };
        let b = ToolCallRequest {
            id: "2".into(),
            tool_name: "@search-google".into(),
            tool_input: serde_json::json!({"query": "rust"}),
        };
        assert_eq!(a.identity(), b.identity());
        let c = ToolCallRequest {
            tool_input: serde_json::json!({"query": "go"}),
            ..a.clone()
        };
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn content_serde_is_tagged() {
        let m = Message::user("hi");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }
}
