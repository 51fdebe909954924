// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Anthropic Messages API adapter.
//!
//! Differences from the Chat Completions family: the system prompt is a
//! top-level field, `max_tokens` is mandatory (bounded by the model's
//! ceiling), at least one message must be present, thinking models stream
//! reasoning as dedicated `thinking` content blocks, and images travel as
//! base64 sources rather than URLs.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use agw_core::error::{ErrorKind, GatewayError};
use agw_core::file::{File, FileKind};
use agw_core::message::{
    Message, MessageContent, ReasoningStep, Role, ToolCallRequest, ToolCallResult,
};
use agw_core::run::{FinishReason, LlmUsage};
use agw_core::version::{ToolChoice, ToolChoiceMode};
use agw_models::Provider;
use agw_stream::ToolCallDelta;

use crate::adapter::{BuildOptions, ParsedCompletion, ProviderAdapter, ProviderConfig, StreamDelta};
use crate::error_map::classify_status;
use crate::names::{internal_tool_name_to_native, native_tool_name_to_internal};

const DEFAULT_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;
const THINKING_BUDGET_TOKENS: u32 = 10_000;

/// Adapter for the Anthropic API.
#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    config: ProviderConfig,
}

impl AnthropicAdapter {
    /// Build an adapter from connection settings.
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    /// Whether the model id requests extended thinking.
    fn is_thinking_model(model: &str) -> bool {
        model.contains("-thinking")
    }

    fn max_tokens(options: &BuildOptions) -> u32 {
        let ceiling = options.model_max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS).min(ceiling)
    }
}

fn content_blocks(message: &Message) -> Result<Vec<Value>, GatewayError> {
    let mut blocks = Vec::new();
    for block in &message.content {
        match block {
            MessageContent::Text { text } => {
                if !text.is_empty() {
                    blocks.push(json!({"type": "text", "text": text}));
                }
            }
            MessageContent::File { file } => {
                let data = file.data.clone().ok_or_else(|| {
                    GatewayError::internal("file data should be inlined before reaching Anthropic")
                })?;
                let media_type = file.content_type.clone().unwrap_or_else(|| match file.kind() {
                    FileKind::Image => "image/png".to_string(),
                    FileKind::Pdf => "application/pdf".to_string(),
                    _ => "application/octet-stream".to_string(),
                });
                let block_type = if file.is_pdf() { "document" } else { "image" };
                blocks.push(json!({
                    "type": block_type,
                    "source": {"type": "base64", "media_type": media_type, "data": data},
                }));
            }
            MessageContent::ToolCallRequest(request) => {
                blocks.push(json!({
                    "type": "tool_use",
                    "id": request.id,
                    "name": internal_tool_name_to_native(&request.tool_name),
                    "input": request.tool_input,
                }));
            }
            MessageContent::ToolCallResult(result) => {
                let content = match (&result.result, &result.error) {
                    (_, Some(error)) => format!("Error: {error}"),
                    (Some(Value::String(s)), None) => s.clone(),
                    (Some(other), None) => other.to_string(),
                    (None, None) => String::new(),
                };
                blocks.push(json!({
                    "type": "tool_result",
                    "tool_use_id": result.id,
                    "content": content,
                }));
            }
            MessageContent::Reasoning { .. } => {}
        }
    }
    Ok(blocks)
}

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> Provider {
        Provider::Anthropic
    }

    fn default_model(&self) -> &'static str {
        "claude-3-7-sonnet-20250219"
    }

    fn request_url(&self, _model: &str, _stream: bool) -> String {
        self.config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_URL.to_string())
    }

    fn request_headers(&self, _model: &str) -> Vec<(String, String)> {
        vec![
            ("x-api-key".to_string(), self.config.api_key.clone()),
            ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
        ]
    }

    fn build_request(
        &self,
        messages: &[Message],
        options: &BuildOptions,
    ) -> Result<Value, GatewayError> {
        // The system prompt is hoisted out of the message list.
        let (system, rest): (Option<String>, &[Message]) = match messages.first() {
            Some(m) if m.role == Role::System => (Some(m.text()), &messages[1..]),
            _ => (None, messages),
        };

        let mut wire_messages = Vec::with_capacity(rest.len());
        for message in rest {
            let role = match message.role {
                Role::Assistant => "assistant",
                _ => "user",
            };
            let blocks = content_blocks(message)?;
            if blocks.is_empty() {
                continue;
            }
            wire_messages.push(json!({"role": role, "content": blocks}));
        }
        if wire_messages.is_empty() {
            // Anthropic requires at least one message.
            wire_messages.push(json!({"role": "user", "content": [{"type": "text", "text": "-"}]}));
        }

        let actual_model = options.model.replace("-thinking", "");
        let mut body = Map::new();
        body.insert("model".into(), json!(actual_model));
        body.insert("messages".into(), json!(wire_messages));
        body.insert("max_tokens".into(), json!(Self::max_tokens(options)));
        body.insert("stream".into(), json!(options.stream));
        if let Some(system) = system {
            body.insert("system".into(), json!(system));
        }
        if let Some(t) = options.temperature {
            body.insert("temperature".into(), json!(t));
        }
        if let Some(p) = options.top_p {
            body.insert("top_p".into(), json!(p));
        }
        if Self::is_thinking_model(&options.model) {
            body.insert(
                "thinking".into(),
                json!({"type": "enabled", "budget_tokens": THINKING_BUDGET_TOKENS}),
            );
        }
        if !options.tools.is_empty() {
            let tools: Vec<Value> = options
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": internal_tool_name_to_native(&t.name),
                        "description": t.description,
                        "input_schema": t.input_schema,
                    })
                })
                .collect();
            body.insert("tools".into(), json!(tools));
            if let Some(choice) = &options.tool_choice {
                let value = match choice {
                    ToolChoice::Mode(ToolChoiceMode::Auto) => json!({"type": "auto"}),
                    ToolChoice::Mode(ToolChoiceMode::None) => json!({"type": "none"}),
                    ToolChoice::Mode(ToolChoiceMode::Required) => json!({"type": "any"}),
                    ToolChoice::Function { name } => json!({
                        "type": "tool",
                        "name": internal_tool_name_to_native(name),
                    }),
                };
                body.insert("tool_choice".into(), value);
            }
        }
        // Presence and frequency penalties are not supported by Anthropic.
        Ok(Value::Object(body))
    }

    fn raw_prompt(&self, request: &Value) -> Vec<Value> {
        let mut out = Vec::new();
        if let Some(system) = request.get("system") {
            out.push(json!({"role": "system", "content": system}));
        }
        if let Some(messages) = request.get("messages").and_then(Value::as_array) {
            out.extend(messages.iter().cloned());
        }
        out
    }

    fn parse_response(&self, body: &Value) -> Result<ParsedCompletion, GatewayError> {
        let response: WireResponse = serde_json::from_value(body.clone())
            .map_err(|e| GatewayError::internal(format!("malformed Anthropic payload: {e}")))?;

        if response.stop_reason.as_deref() == Some("max_tokens") {
            return Err(GatewayError::new(
                ErrorKind::MaxTokensExceeded,
                "the model hit the max token limit before finishing",
            ));
        }
        if response.content.is_empty() {
            return Err(GatewayError::new(
                ErrorKind::ProviderInternal,
                "no content in Anthropic response",
            ));
        }

        let mut parsed = ParsedCompletion {
            usage: response.usage.map(|u| u.to_usage()).unwrap_or_default(),
            finish_reason: response.stop_reason.as_deref().and_then(map_stop_reason),
            ..Default::default()
        };
        for block in response.content {
            match block {
                WireBlock::Text { text } => parsed.content.push_str(&text),
                WireBlock::Thinking { thinking } => parsed.reasoning_steps.push(ReasoningStep {
                    title: None,
                    explanation: thinking,
                }),
                WireBlock::ToolUse { id, name, input } => {
                    parsed.tool_calls.push(ToolCallRequest {
                        id,
                        tool_name: native_tool_name_to_internal(&name),
                        tool_input: input,
                    });
                }
            }
        }
        Ok(parsed)
    }

    fn extract_stream_delta(&self, event: &[u8]) -> Result<StreamDelta, GatewayError> {
        let Ok(chunk) = serde_json::from_slice::<WireChunk>(event) else {
            tracing::warn!(event = %String::from_utf8_lossy(event), "failed to parse Anthropic SSE event");
            return Ok(StreamDelta::default());
        };

        let mut delta = StreamDelta::default();
        match chunk.r#type.as_str() {
            "message_start" => {
                if let Some(usage) = chunk.message.and_then(|m| m.usage) {
                    delta.usage = Some(usage.to_usage());
                }
            }
            "message_delta" => {
                if let Some(usage) = chunk.usage {
                    delta.usage = Some(usage.to_usage());
                }
                if let Some(stop_reason) = chunk.delta.as_ref().and_then(|d| d.stop_reason.as_deref()) {
                    if stop_reason == "max_tokens" {
                        return Err(GatewayError::new(
                            ErrorKind::MaxTokensExceeded,
                            "the model hit the max token limit before finishing",
                        ));
                    }
                    delta.finish_reason = map_stop_reason(stop_reason);
                }
            }
            "content_block_start" => {
                if let Some(block) = chunk.content_block {
                    if block.r#type == "tool_use" {
                        let index = chunk.index.ok_or_else(|| {
                            GatewayError::new(
                                ErrorKind::FailedGeneration,
                                "missing index on tool_use content block start",
                            )
                        })?;
                        delta.tool_calls.push(ToolCallDelta {
                            index,
                            id: block.id,
                            name: block.name.map(|n| native_tool_name_to_internal(&n)),
                            arguments_delta: String::new(),
                        });
                    }
                }
            }
            "content_block_delta" => {
                if let Some(inner) = chunk.delta {
                    match inner.r#type.as_deref() {
                        Some("text_delta") => delta.content = inner.text.unwrap_or_default(),
                        Some("thinking_delta") => delta.reasoning = inner.thinking.unwrap_or_default(),
                        Some("input_json_delta") => {
                            let index = chunk.index.ok_or_else(|| {
                                GatewayError::new(
                                    ErrorKind::FailedGeneration,
                                    "missing index on input_json_delta",
                                )
                            })?;
                            delta.tool_calls.push(ToolCallDelta {
                                index,
                                id: None,
                                name: None,
                                arguments_delta: inner.partial_json.unwrap_or_default(),
                            });
                        }
                        // Signature deltas are part of thinking; not exposed.
                        _ => {}
                    }
                }
            }
            "error" => {
                let error = chunk.error.unwrap_or_default();
                return Err(classify_anthropic_error(None, &error.r#type, &error.message));
            }
            // ping, message_stop, content_block_stop carry nothing.
            _ => {}
        }
        Ok(delta)
    }

    fn standardize_messages(&self, raw: &[Value]) -> Result<Vec<Message>, GatewayError> {
        let mut out = Vec::with_capacity(raw.len());
        for value in raw {
            let role_str = value.get("role").and_then(Value::as_str).unwrap_or("user");
            if role_str == "system" {
                let text = value
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                out.push(Message::system(text));
                continue;
            }
            let role = if role_str == "assistant" { Role::Assistant } else { Role::User };
            let mut content = Vec::new();
            match value.get("content") {
                Some(Value::String(text)) => content.push(MessageContent::Text { text: text.clone() }),
                Some(Value::Array(blocks)) => {
                    for block in blocks {
                        standardize_block(block, &mut content)?;
                    }
                }
                _ => {}
            }
            if !content.is_empty() {
                out.push(Message { role, content });
            }
        }
        Ok(out)
    }

    fn classify_error(&self, status: u16, body: &str) -> GatewayError {
        match serde_json::from_str::<WireErrorEnvelope>(body) {
            Ok(envelope) => classify_anthropic_error(
                Some(status),
                &envelope.error.r#type,
                &envelope.error.message,
            ),
            Err(_) => classify_status(Provider::Anthropic, status, body),
        }
    }

    fn requires_downloading_file(&self, _file: &File, _model: &str) -> bool {
        true
    }

    fn rate_limit_headers(&self) -> &'static [(&'static str, &'static str)] {
        &[
            ("requests", "anthropic-ratelimit-requests-remaining"),
            ("tokens", "anthropic-ratelimit-tokens-remaining"),
            ("input_tokens", "anthropic-ratelimit-input-tokens-remaining"),
            ("output_tokens", "anthropic-ratelimit-output-tokens-remaining"),
        ]
    }
}

fn standardize_block(block: &Value, content: &mut Vec<MessageContent>) -> Result<(), GatewayError> {
    match block.get("type").and_then(Value::as_str) {
        Some("text") => {
            if let Some(text) = block.get("text").and_then(Value::as_str) {
                content.push(MessageContent::Text { text: text.to_string() });
            }
        }
        Some("image") | Some("document") => {
            let source = block.get("source").cloned().unwrap_or_default();
            content.push(MessageContent::File {
                file: File {
                    data: source.get("data").and_then(Value::as_str).map(str::to_string),
                    content_type: source
                        .get("media_type")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    ..Default::default()
                },
            });
        }
        Some("tool_use") => {
            content.push(MessageContent::ToolCallRequest(ToolCallRequest {
                id: block.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                tool_name: native_tool_name_to_internal(
                    block.get("name").and_then(Value::as_str).unwrap_or_default(),
                ),
                tool_input: block.get("input").cloned().unwrap_or(json!({})),
            }));
        }
        Some("tool_result") => {
            let raw = block.get("content").and_then(Value::as_str).unwrap_or_default();
            content.push(MessageContent::ToolCallResult(ToolCallResult {
                id: block
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                tool_name: None,
                result: Some(serde_json::from_str(raw).unwrap_or(Value::String(raw.to_string()))),
                error: None,
            }));
        }
        other => {
            return Err(GatewayError::internal(format!(
                "unknown Anthropic content block type: {other:?}"
            )))
        }
    }
    Ok(())
}

fn map_stop_reason(reason: &str) -> Option<FinishReason> {
    match reason {
        "end_turn" | "stop_sequence" => Some(FinishReason::Stop),
        "max_tokens" => Some(FinishReason::MaxTokens),
        "tool_use" => Some(FinishReason::ToolCalls),
        _ => None,
    }
}

fn classify_anthropic_error(status: Option<u16>, error_type: &str, message: &str) -> GatewayError {
    match error_type {
        "rate_limit_error" => GatewayError::new(
            ErrorKind::RateLimit,
            format!("Anthropic rate limited the request: {message}"),
        )
        .with_retry_after(std::time::Duration::from_secs(5)),
        "overloaded_error" | "api_error" => GatewayError::new(
            ErrorKind::ProviderInternal,
            format!("Anthropic is unavailable: {message}"),
        )
        .with_retry_after(std::time::Duration::from_secs(10)),
        "invalid_request_error" => classify_status(Provider::Anthropic, status.unwrap_or(400), message),
        _ => classify_status(Provider::Anthropic, status.unwrap_or(500), message),
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    content: Vec<WireBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

impl WireUsage {
    fn to_usage(&self) -> LlmUsage {
        LlmUsage {
            prompt_token_count: self.input_tokens,
            cached_token_count: self.cache_read_input_tokens,
            audio_token_count: None,
            completion_token_count: self.output_tokens,
            reasoning_token_count: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    r#type: String,
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    message: Option<WireChunkMessage>,
    #[serde(default)]
    content_block: Option<WireChunkBlock>,
    #[serde(default)]
    delta: Option<WireChunkDelta>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<WireErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct WireChunkMessage {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChunkBlock {
    r#type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireChunkDelta {
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    partial_json: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireErrorEnvelope {
    error: WireErrorPayload,
}

#[derive(Debug, Default, Deserialize)]
struct WireErrorPayload {
    #[serde(default)]
    r#type: String,
    #[serde(default)]
    message: String,
}
