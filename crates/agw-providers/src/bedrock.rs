// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Amazon Bedrock Converse adapter.
//!
//! Bedrock wraps Anthropic (and other) models behind the Converse API:
//! camel-case content blocks, `inferenceConfig`, and region-scoped model
//! ids. Two behaviours need special care: reasoning arrives as
//! `reasoningContent` blocks, and content moderation can come back as an
//! apologetic HTTP 200 instead of an error status.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use agw_core::error::{ErrorKind, GatewayError};
use agw_core::file::File;
use agw_core::message::{
    Message, MessageContent, ReasoningStep, Role, ToolCallRequest, ToolCallResult,
};
use agw_core::run::{FinishReason, LlmUsage};
use agw_models::Provider;
use agw_stream::ToolCallDelta;

use crate::adapter::{BuildOptions, ParsedCompletion, ProviderAdapter, ProviderConfig, StreamDelta};
use crate::error_map::{classify_status, is_moderation_refusal};
use crate::names::{internal_tool_name_to_native, native_tool_name_to_internal};

const DEFAULT_BASE: &str = "https://bedrock-runtime.us-east-1.amazonaws.com";

/// Adapter for the Bedrock Converse API.
#[derive(Debug, Clone)]
pub struct BedrockAdapter {
    config: ProviderConfig,
}

impl BedrockAdapter {
    /// Build an adapter from connection settings.
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    /// Map a canonical model id to the region-scoped Bedrock id.
    fn bedrock_model_id(model: &str) -> String {
        match model {
            "claude-3-5-sonnet-20241022" => "us.anthropic.claude-3-5-sonnet-20241022-v2:0".to_string(),
            "claude-3-7-sonnet-20250219" => "us.anthropic.claude-3-7-sonnet-20250219-v1:0".to_string(),
            other => other.to_string(),
        }
    }
}

fn content_blocks(message: &Message) -> Result<Vec<Value>, GatewayError> {
    let mut blocks = Vec::new();
    for block in &message.content {
        match block {
            MessageContent::Text { text } => {
                if !text.is_empty() {
                    blocks.push(json!({"text": text}));
                }
            }
            MessageContent::File { file } => {
                let data = file.data.clone().ok_or_else(|| {
                    GatewayError::internal("file data should be inlined before reaching Bedrock")
                })?;
                let format = file
                    .content_type
                    .as_deref()
                    .and_then(|ct| ct.split('/').nth(1))
                    .unwrap_or("png");
                blocks.push(json!({
                    "image": {"format": format, "source": {"bytes": data}},
                }));
            }
            MessageContent::ToolCallRequest(request) => {
                blocks.push(json!({
                    "toolUse": {
                        "toolUseId": request.id,
                        "name": internal_tool_name_to_native(&request.tool_name),
                        "input": request.tool_input,
                    },
                }));
            }
            MessageContent::ToolCallResult(result) => {
                let content = match (&result.result, &result.error) {
                    (_, Some(error)) => json!([{"text": format!("Error: {error}")}]),
                    (Some(value), None) => json!([{"json": value}]),
                    (None, None) => json!([]),
                };
                blocks.push(json!({
                    "toolResult": {"toolUseId": result.id, "content": content},
                }));
            }
            MessageContent::Reasoning { .. } => {}
        }
    }
    Ok(blocks)
}

impl ProviderAdapter for BedrockAdapter {
    fn name(&self) -> Provider {
        Provider::Bedrock
    }

    fn default_model(&self) -> &'static str {
        "claude-3-7-sonnet-20250219"
    }

    fn request_url(&self, model: &str, stream: bool) -> String {
        let base = self.config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE.to_string());
        let model_id = Self::bedrock_model_id(model);
        let action = if stream { "converse-stream" } else { "converse" };
        format!("{base}/model/{model_id}/{action}")
    }

    fn request_headers(&self, _model: &str) -> Vec<(String, String)> {
        vec![(
            "Authorization".to_string(),
            format!("Bearer {}", self.config.api_key),
        )]
    }

    fn build_request(
        &self,
        messages: &[Message],
        options: &BuildOptions,
    ) -> Result<Value, GatewayError> {
        let (system, rest): (Option<String>, &[Message]) = match messages.first() {
            Some(m) if m.role == Role::System => (Some(m.text()), &messages[1..]),
            _ => (None, messages),
        };

        let mut wire_messages = Vec::new();
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
            wire_messages.push(json!({"role": "user", "content": [{"text": "-"}]}));
        }

        let mut inference = Map::new();
        if let Some(max) = options.max_tokens {
            inference.insert("maxTokens".into(), json!(max));
        }
        if let Some(t) = options.temperature {
            inference.insert("temperature".into(), json!(t));
        }
        if let Some(p) = options.top_p {
            inference.insert("topP".into(), json!(p));
        }

        let mut body = Map::new();
        body.insert("messages".into(), json!(wire_messages));
        if let Some(system) = system {
            body.insert("system".into(), json!([{"text": system}]));
        }
        if !inference.is_empty() {
            body.insert("inferenceConfig".into(), Value::Object(inference));
        }
        if !options.tools.is_empty() {
            let tools: Vec<Value> = options
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "toolSpec": {
                            "name": internal_tool_name_to_native(&t.name),
                            "description": t.description,
                            "inputSchema": {"json": t.input_schema},
                        },
                    })
                })
                .collect();
            body.insert("toolConfig".into(), json!({"tools": tools}));
        }
        Ok(Value::Object(body))
    }

    fn raw_prompt(&self, request: &Value) -> Vec<Value> {
        let mut out = Vec::new();
        if let Some(system) = request
            .get("system")
            .and_then(Value::as_array)
            .and_then(|s| s.first())
            .and_then(|s| s.get("text"))
        {
            out.push(json!({"role": "system", "content": system}));
        }
        if let Some(messages) = request.get("messages").and_then(Value::as_array) {
            out.extend(messages.iter().cloned());
        }
        out
    }

    fn parse_response(&self, body: &Value) -> Result<ParsedCompletion, GatewayError> {
        let response: WireResponse = serde_json::from_value(body.clone())
            .map_err(|e| GatewayError::internal(format!("malformed Bedrock payload: {e}")))?;

        if response.stop_reason.as_deref() == Some("max_tokens") {
            return Err(GatewayError::new(
                ErrorKind::MaxTokensExceeded,
                "the model hit the max token limit before finishing",
            ));
        }

        let mut parsed = ParsedCompletion {
            usage: response.usage.map(|u| u.to_usage()).unwrap_or_default(),
            finish_reason: response.stop_reason.as_deref().and_then(map_stop_reason),
            ..Default::default()
        };
        let blocks = response.output.and_then(|o| o.message).map(|m| m.content).unwrap_or_default();
        for block in blocks {
            if let Some(text) = block.text {
                parsed.content.push_str(&text);
            }
            if let Some(reasoning) = block.reasoning_content {
                if let Some(text) = reasoning.reasoning_text.map(|t| t.text) {
                    parsed.reasoning_steps.push(ReasoningStep {
                        title: None,
                        explanation: text,
                    });
                }
            }
            if let Some(tool_use) = block.tool_use {
                parsed.tool_calls.push(ToolCallRequest {
                    id: tool_use.tool_use_id,
                    tool_name: native_tool_name_to_internal(&tool_use.name),
                    tool_input: tool_use.input,
                });
            }
        }

        // Bedrock moderations can come back as an apologetic 200.
        if parsed.tool_calls.is_empty() && is_moderation_refusal(&parsed.content) {
            return Err(GatewayError::new(
                ErrorKind::ContentModeration,
                "the provider refused the generation",
            )
            .with_detail("raw_completion", parsed.content));
        }
        Ok(parsed)
    }

    fn extract_stream_delta(&self, event: &[u8]) -> Result<StreamDelta, GatewayError> {
        let Ok(chunk) = serde_json::from_slice::<WireStreamEvent>(event) else {
            tracing::warn!(event = %String::from_utf8_lossy(event), "failed to parse Bedrock stream event");
            return Ok(StreamDelta::default());
        };

        let mut delta = StreamDelta::default();
        if let Some(start) = chunk.content_block_start {
            if let Some(tool_use) = start.start.and_then(|s| s.tool_use) {
                delta.tool_calls.push(ToolCallDelta {
                    index: start.content_block_index,
                    id: Some(tool_use.tool_use_id),
                    name: Some(native_tool_name_to_internal(&tool_use.name)),
                    arguments_delta: String::new(),
                });
            }
        }
        if let Some(block_delta) = chunk.content_block_delta {
            if let Some(inner) = block_delta.delta {
                if let Some(text) = inner.text {
                    delta.content.push_str(&text);
                }
                if let Some(reasoning) = inner.reasoning_content.and_then(|r| r.text) {
                    delta.reasoning.push_str(&reasoning);
                }
                if let Some(tool_use) = inner.tool_use {
                    delta.tool_calls.push(ToolCallDelta {
                        index: block_delta.content_block_index,
                        id: None,
                        name: None,
                        arguments_delta: tool_use.input,
                    });
                }
            }
        }
        if let Some(stop) = chunk.message_stop {
            if stop.stop_reason.as_deref() == Some("max_tokens") {
                return Err(GatewayError::new(
                    ErrorKind::MaxTokensExceeded,
                    "the model hit the max token limit before finishing",
                ));
            }
            delta.finish_reason = stop.stop_reason.as_deref().and_then(map_stop_reason);
        }
        if let Some(metadata) = chunk.metadata {
            if let Some(usage) = metadata.usage {
                delta.usage = Some(usage.to_usage());
            }
        }
        Ok(delta)
    }

    fn standardize_messages(&self, raw: &[Value]) -> Result<Vec<Message>, GatewayError> {
        let mut out = Vec::with_capacity(raw.len());
        for value in raw {
            let role_str = value.get("role").and_then(Value::as_str).unwrap_or("user");
            if role_str == "system" {
                let text = value.get("content").and_then(Value::as_str).unwrap_or_default();
                out.push(Message::system(text));
                continue;
            }
            let role = if role_str == "assistant" { Role::Assistant } else { Role::User };
            let mut content = Vec::new();
            for block in value.get("content").and_then(Value::as_array).cloned().unwrap_or_default() {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    content.push(MessageContent::Text { text: text.to_string() });
                } else if let Some(image) = block.get("image") {
                    content.push(MessageContent::File {
                        file: File {
                            data: image
                                .pointer("/source/bytes")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            content_type: image
                                .get("format")
                                .and_then(Value::as_str)
                                .map(|f| format!("image/{f}")),
                            ..Default::default()
                        },
                    });
                } else if let Some(tool_use) = block.get("toolUse") {
                    content.push(MessageContent::ToolCallRequest(ToolCallRequest {
                        id: tool_use
                            .get("toolUseId")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        tool_name: native_tool_name_to_internal(
                            tool_use.get("name").and_then(Value::as_str).unwrap_or_default(),
                        ),
                        tool_input: tool_use.get("input").cloned().unwrap_or(json!({})),
                    }));
                } else if let Some(tool_result) = block.get("toolResult") {
                    content.push(MessageContent::ToolCallResult(ToolCallResult {
                        id: tool_result
                            .get("toolUseId")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        tool_name: None,
                        result: tool_result
                            .pointer("/content/0/json")
                            .or_else(|| tool_result.pointer("/content/0/text"))
                            .cloned(),
                        error: None,
                    }));
                }
            }
            if !content.is_empty() {
                out.push(Message { role, content });
            }
        }
        Ok(out)
    }

    fn classify_error(&self, status: u16, body: &str) -> GatewayError {
        #[derive(Deserialize)]
        struct BedrockError {
            message: String,
        }
        let message = serde_json::from_str::<BedrockError>(body)
            .map(|e| e.message)
            .unwrap_or_else(|_| body.chars().take(500).collect());
        if status == 424 {
            // Bedrock signals model-side failures with 424.
            return GatewayError::new(
                ErrorKind::ProviderInternal,
                format!("Bedrock model invocation failed: {message}"),
            )
            .with_retry_after(std::time::Duration::from_secs(10));
        }
        classify_status(Provider::Bedrock, status, &message)
    }

    fn requires_downloading_file(&self, _file: &File, _model: &str) -> bool {
        true
    }
}

fn map_stop_reason(reason: &str) -> Option<FinishReason> {
    match reason {
        "end_turn" | "stop_sequence" => Some(FinishReason::Stop),
        "max_tokens" => Some(FinishReason::MaxTokens),
        "tool_use" => Some(FinishReason::ToolCalls),
        "content_filtered" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    output: Option<WireOutput>,
    #[serde(default, rename = "stopReason")]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireOutput {
    #[serde(default)]
    message: Option<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Vec<WireBlock>,
}

#[derive(Debug, Deserialize)]
struct WireBlock {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "reasoningContent")]
    reasoning_content: Option<WireReasoning>,
    #[serde(default, rename = "toolUse")]
    tool_use: Option<WireToolUse>,
}

#[derive(Debug, Deserialize)]
struct WireReasoning {
    #[serde(default, rename = "reasoningText")]
    reasoning_text: Option<WireReasoningText>,
}

#[derive(Debug, Deserialize)]
struct WireReasoningText {
    text: String,
}

#[derive(Debug, Deserialize)]
struct WireToolUse {
    #[serde(rename = "toolUseId")]
    tool_use_id: String,
    name: String,
    #[serde(default)]
    input: Value,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default, rename = "inputTokens")]
    input_tokens: Option<u64>,
    #[serde(default, rename = "outputTokens")]
    output_tokens: Option<u64>,
    #[serde(default, rename = "cacheReadInputTokens")]
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
struct WireStreamEvent {
    #[serde(default, rename = "contentBlockStart")]
    content_block_start: Option<WireBlockStart>,
    #[serde(default, rename = "contentBlockDelta")]
    content_block_delta: Option<WireBlockDelta>,
    #[serde(default, rename = "messageStop")]
    message_stop: Option<WireMessageStop>,
    #[serde(default)]
    metadata: Option<WireMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireBlockStart {
    #[serde(default, rename = "contentBlockIndex")]
    content_block_index: u32,
    #[serde(default)]
    start: Option<WireBlockStartInner>,
}

#[derive(Debug, Deserialize)]
struct WireBlockStartInner {
    #[serde(default, rename = "toolUse")]
    tool_use: Option<WireToolUseStart>,
}

#[derive(Debug, Deserialize)]
struct WireToolUseStart {
    #[serde(rename = "toolUseId")]
    tool_use_id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireBlockDelta {
    #[serde(default, rename = "contentBlockIndex")]
    content_block_index: u32,
    #[serde(default)]
    delta: Option<WireBlockDeltaInner>,
}

#[derive(Debug, Deserialize)]
struct WireBlockDeltaInner {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "reasoningContent")]
    reasoning_content: Option<WireReasoningDelta>,
    #[serde(default, rename = "toolUse")]
    tool_use: Option<WireToolUseDelta>,
}

#[derive(Debug, Deserialize)]
struct WireReasoningDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireToolUseDelta {
    #[serde(default)]
    input: String,
}

#[derive(Debug, Deserialize)]
struct WireMessageStop {
    #[serde(default, rename = "stopReason")]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMetadata {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> BedrockAdapter {
        BedrockAdapter::new(ProviderConfig::new("bedrock-key"))
    }

    #[test]
    fn url_embeds_the_region_scoped_model_id() {
        let url = adapter().request_url("claude-3-5-sonnet-20241022", false);
        assert!(url.ends_with("/model/us.anthropic.claude-3-5-sonnet-20241022-v2:0/converse"));
        let url = adapter().request_url("claude-3-5-sonnet-20241022", true);
        assert!(url.ends_with("/converse-stream"));
    }

    #[test]
    fn moderation_on_200_is_detected() {
        let body = json!({
            "output": {"message": {"content": [
                {"text": "I apologize, but that request is inappropriate."},
            ]}},
            "stopReason": "end_turn",
        });
        let err = adapter().parse_response(&body).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContentModeration);
    }

    #[test]
    fn reasoning_content_routes_to_reasoning_steps() {
        let body = json!({
            "output": {"message": {"content": [
                {"reasoningContent": {"reasoningText": {"text": "step by step"}}},
                {"text": "42"},
            ]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 5, "outputTokens": 2},
        });
        let parsed = adapter().parse_response(&body).unwrap();
        assert_eq!(parsed.content, "42");
        assert_eq!(parsed.reasoning_steps[0].explanation, "step by step");
    }

    #[test]
    fn stream_tool_use_fragments() {
        let a = adapter();
        let start = br#"{"contentBlockStart": {"contentBlockIndex": 0, "start": {"toolUse": {"toolUseId": "t1", "name": "_at_search__google"}}}}"#;
        let delta = a.extract_stream_delta(start).unwrap();
        assert_eq!(delta.tool_calls[0].name.as_deref(), Some("@search-google"));
        let frag = br#"{"contentBlockDelta": {"contentBlockIndex": 0, "delta": {"toolUse": {"input": "{\"q\": 1}"}}}}"#;
        let delta = a.extract_stream_delta(frag).unwrap();
        assert_eq!(delta.tool_calls[0].arguments_delta, "{\"q\": 1}");
    }

    #[test]
    fn stream_metadata_carries_usage() {
        let event = br#"{"metadata": {"usage": {"inputTokens": 9, "outputTokens": 3}}}"#;
        let delta = adapter().extract_stream_delta(event).unwrap();
        assert_eq!(delta.usage.unwrap().prompt_token_count, Some(9));
    }

    #[test]
    fn status_424_is_retriable_provider_internal() {
        let err = adapter().classify_error(424, r#"{"message": "model error"}"#);
        assert_eq!(err.kind, ErrorKind::ProviderInternal);
        assert!(err.retry_after.is_some());
    }

    #[test]
    fn standardize_roundtrips_text_messages() {
        let a = adapter();
        let messages = vec![Message::system("sys"), Message::user("hello")];
        let body = a
            .build_request(
                &messages,
                &BuildOptions {
                    model: "claude-3-5-sonnet-20241022".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let back = a.standardize_messages(&a.raw_prompt(&body)).unwrap();
        assert_eq!(back, messages);
    }
}
