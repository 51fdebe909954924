// SPDX-License-Identifier: MIT OR Apache-2.0
//! The adapter contract.

use serde_json::Value;

use agw_core::error::GatewayError;
use agw_core::file::File;
use agw_core::message::{Message, ReasoningStep, ToolCallRequest};
use agw_core::run::{FinishReason, LlmUsage};
use agw_core::version::ToolChoice;
use agw_models::Provider;
use agw_stream::ToolCallDelta;

/// Connection settings for one provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// API key sent with every request.
    pub api_key: String,
    /// Base URL override; each adapter has its own default.
    pub base_url: Option<String>,
}

impl ProviderConfig {
    /// A config with only an API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
        }
    }
}

/// A tool handed to the provider: canonical name plus schemas. Adapters map
/// the name to the provider-safe form on the way out.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    /// Canonical name; hosted tools start with `@`.
    pub name: String,
    /// Human description.
    pub description: Option<String>,
    /// JSON schema of the arguments.
    pub input_schema: Value,
    /// Whether the provider should enforce the schema strictly.
    pub strict: bool,
}

/// Everything an adapter needs to build one wire request.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Model id to request.
    pub model: String,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Nucleus sampling parameter.
    pub top_p: Option<f64>,
    /// Presence penalty.
    pub presence_penalty: Option<f64>,
    /// Frequency penalty.
    pub frequency_penalty: Option<f64>,
    /// Completion token ceiling requested by the version.
    pub max_tokens: Option<u32>,
    /// The model's own output ceiling, from the catalog.
    pub model_max_output_tokens: Option<u32>,
    /// Tool choice constraint.
    pub tool_choice: Option<ToolChoice>,
    /// Tools available this round.
    pub tools: Vec<ToolDefinition>,
    /// Prepared output schema when schema-guided decoding is on.
    pub output_schema: Option<Value>,
    /// Whether the run wants a JSON object even without a schema.
    pub json_mode: bool,
    /// Reasoning effort hint.
    pub reasoning_effort: Option<String>,
    /// Whether the request streams.
    pub stream: bool,
}

/// A parsed buffered response in canonical form.
#[derive(Debug, Clone, Default)]
pub struct ParsedCompletion {
    /// Completion text (reasoning excluded).
    pub content: String,
    /// Reasoning steps, for thinking models.
    pub reasoning_steps: Vec<ReasoningStep>,
    /// Native tool calls.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Usage reported by the provider.
    pub usage: LlmUsage,
    /// Finish reason.
    pub finish_reason: Option<FinishReason>,
}

/// A parsed streaming delta in canonical form.
#[derive(Debug, Clone, Default)]
pub struct StreamDelta {
    /// Completion text fragment.
    pub content: String,
    /// Reasoning text fragment.
    pub reasoning: String,
    /// Tool-call fragments keyed by stream index.
    pub tool_calls: Vec<ToolCallDelta>,
    /// Usage report, usually on the last event.
    pub usage: Option<LlmUsage>,
    /// Finish reason, when this event carries one.
    pub finish_reason: Option<FinishReason>,
}

/// The contract every provider adapter implements.
///
/// Adapters are stateless: streaming state (tool buffers, accumulated text)
/// lives in [`agw_stream::StreamingAggregator`], which consumes the deltas
/// produced here.
pub trait ProviderAdapter: Send + Sync {
    /// The provider this adapter speaks to.
    fn name(&self) -> Provider;

    /// Model used when a request names none.
    fn default_model(&self) -> &'static str;

    /// Endpoint URL for a request.
    fn request_url(&self, model: &str, stream: bool) -> String;

    /// Headers for a request.
    fn request_headers(&self, model: &str) -> Vec<(String, String)>;

    /// Build the wire request body.
    ///
    /// # Errors
    ///
    /// `model_does_not_support_mode` when a message carries content the
    /// provider cannot accept; `internal` on serialization failures.
    fn build_request(&self, messages: &[Message], options: &BuildOptions)
        -> Result<Value, GatewayError>;

    /// The messages actually sent, as stored on the completion record.
    /// Adapters that hoist the system prompt out of the list re-inject it.
    fn raw_prompt(&self, request: &Value) -> Vec<Value>;

    /// Parse a buffered 200 response.
    ///
    /// # Errors
    ///
    /// Taxonomy errors for max-token finishes, moderation-on-200, or
    /// malformed payloads.
    fn parse_response(&self, body: &Value) -> Result<ParsedCompletion, GatewayError>;

    /// Parse one SSE event payload into a delta.
    ///
    /// # Errors
    ///
    /// Taxonomy errors for in-stream provider errors; unparseable events
    /// yield an empty delta, never an error.
    fn extract_stream_delta(&self, event: &[u8]) -> Result<StreamDelta, GatewayError>;

    /// Re-parse stored wire messages into canonical form.
    ///
    /// # Errors
    ///
    /// `internal` when the stored payload no longer matches the wire schema.
    fn standardize_messages(&self, raw: &[Value]) -> Result<Vec<Message>, GatewayError>;

    /// Map a non-2xx response to the taxonomy.
    fn classify_error(&self, status: u16, body: &str) -> GatewayError;

    /// Whether a URL-only file must be downloaded and inlined before
    /// sending.
    fn requires_downloading_file(&self, file: &File, model: &str) -> bool;

    /// Response headers carrying rate-limit headroom, as
    /// `(label, header-name)` pairs.
    fn rate_limit_headers(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    /// Whether the provider supports schema-guided decoding.
    fn supports_structured_generation(&self) -> bool {
        false
    }
}
