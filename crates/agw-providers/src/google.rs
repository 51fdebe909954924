// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Google Gemini adapter.
//!
//! Gemini speaks `generateContent`: role `model` instead of `assistant`, a
//! `systemInstruction` field, inline base64 file parts, and function calls
//! without ids (the adapter synthesizes stable ones from name and position).

use serde::Deserialize;
use serde_json::{json, Map, Value};

use agw_core::error::{ErrorKind, GatewayError};
use agw_core::file::File;
use agw_core::message::{Message, MessageContent, Role, ToolCallRequest, ToolCallResult};
use agw_core::run::{FinishReason, LlmUsage};
use agw_models::Provider;
use agw_stream::ToolCallDelta;

use crate::adapter::{BuildOptions, ParsedCompletion, ProviderAdapter, ProviderConfig, StreamDelta};
use crate::error_map::classify_status;
use crate::names::{internal_tool_name_to_native, native_tool_name_to_internal};

const DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Adapter for the Gemini API.
#[derive(Debug, Clone)]
pub struct GoogleAdapter {
    config: ProviderConfig,
}

impl GoogleAdapter {
    /// Build an adapter from connection settings.
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

fn parts_for(message: &Message) -> Result<Vec<Value>, GatewayError> {
    let mut parts = Vec::new();
    for block in &message.content {
        match block {
            MessageContent::Text { text } => {
                if !text.is_empty() {
                    parts.push(json!({"text": text}));
                }
            }
            MessageContent::File { file } => {
                let data = file.data.clone().ok_or_else(|| {
                    GatewayError::internal("file data should be inlined before reaching Gemini")
                })?;
                parts.push(json!({
                    "inlineData": {
                        "mimeType": file.content_type.clone().unwrap_or_else(|| "application/octet-stream".into()),
                        "data": data,
                    },
                }));
            }
            MessageContent::ToolCallRequest(request) => {
                parts.push(json!({
                    "functionCall": {
                        "name": internal_tool_name_to_native(&request.tool_name),
                        "args": request.tool_input,
                    },
                }));
            }
            MessageContent::ToolCallResult(result) => {
                let response = match (&result.result, &result.error) {
                    (_, Some(error)) => json!({"error": error}),
                    (Some(value), None) => json!({"result": value}),
                    (None, None) => json!({}),
                };
                parts.push(json!({
                    "functionResponse": {
                        "name": result
                            .tool_name
                            .as_deref()
                            .map(internal_tool_name_to_native)
                            .unwrap_or_default(),
                        "response": response,
                    },
                }));
            }
            MessageContent::Reasoning { .. } => {}
        }
    }
    Ok(parts)
}

impl ProviderAdapter for GoogleAdapter {
    fn name(&self) -> Provider {
        Provider::Google
    }

    fn default_model(&self) -> &'static str {
        "gemini-2.0-flash"
    }

    fn request_url(&self, model: &str, stream: bool) -> String {
        let base = self.config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE.to_string());
        if stream {
            format!("{base}/models/{model}:streamGenerateContent?alt=sse")
        } else {
            format!("{base}/models/{model}:generateContent")
        }
    }

    fn request_headers(&self, _model: &str) -> Vec<(String, String)> {
        vec![("x-goog-api-key".to_string(), self.config.api_key.clone())]
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

        let mut contents = Vec::new();
        for message in rest {
            let role = match message.role {
                Role::Assistant => "model",
                _ => "user",
            };
            let parts = parts_for(message)?;
            if parts.is_empty() {
                continue;
            }
            contents.push(json!({"role": role, "parts": parts}));
        }

        let mut generation = Map::new();
        if let Some(t) = options.temperature {
            generation.insert("temperature".into(), json!(t));
        }
        if let Some(p) = options.top_p {
            generation.insert("topP".into(), json!(p));
        }
        if let Some(max) = options.max_tokens {
            generation.insert("maxOutputTokens".into(), json!(max));
        }
        if let Some(schema) = &options.output_schema {
            generation.insert("responseMimeType".into(), json!("application/json"));
            generation.insert("responseSchema".into(), schema.clone());
        } else if options.json_mode {
            generation.insert("responseMimeType".into(), json!("application/json"));
        }

        let mut body = Map::new();
        body.insert("contents".into(), json!(contents));
        if let Some(system) = system {
            body.insert("systemInstruction".into(), json!({"parts": [{"text": system}]}));
        }
        if !generation.is_empty() {
            body.insert("generationConfig".into(), Value::Object(generation));
        }
        if !options.tools.is_empty() {
            let declarations: Vec<Value> = options
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": internal_tool_name_to_native(&t.name),
                        "description": t.description,
                        "parameters": t.input_schema,
                    })
                })
                .collect();
            body.insert("tools".into(), json!([{"functionDeclarations": declarations}]));
        }
        Ok(Value::Object(body))
    }

    fn raw_prompt(&self, request: &Value) -> Vec<Value> {
        let mut out = Vec::new();
        if let Some(text) = request.pointer("/systemInstruction/parts/0/text") {
            out.push(json!({"role": "system", "content": text}));
        }
        if let Some(contents) = request.get("contents").and_then(Value::as_array) {
            out.extend(contents.iter().cloned());
        }
        out
    }

    fn parse_response(&self, body: &Value) -> Result<ParsedCompletion, GatewayError> {
        let response: WireResponse = serde_json::from_value(body.clone())
            .map_err(|e| GatewayError::internal(format!("malformed Gemini payload: {e}")))?;
        let Some(candidate) = response.candidates.into_iter().next() else {
            return Err(GatewayError::new(
                ErrorKind::ProviderInternal,
                "no candidates in Gemini response",
            ));
        };

        match candidate.finish_reason.as_deref() {
            Some("MAX_TOKENS") => {
                return Err(GatewayError::new(
                    ErrorKind::MaxTokensExceeded,
                    "the model hit the max token limit before finishing",
                ))
            }
            Some("SAFETY" | "PROHIBITED_CONTENT") => {
                return Err(GatewayError::new(
                    ErrorKind::ContentModeration,
                    "the provider filtered the generation",
                ))
            }
            _ => {}
        }

        let mut parsed = ParsedCompletion {
            usage: response.usage_metadata.map(|u| u.to_usage()).unwrap_or_default(),
            finish_reason: candidate.finish_reason.as_deref().and_then(map_finish_reason),
            ..Default::default()
        };
        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        for (idx, part) in parts.into_iter().enumerate() {
            if let Some(text) = part.text {
                parsed.content.push_str(&text);
            }
            if let Some(call) = part.function_call {
                parsed.tool_calls.push(ToolCallRequest {
                    // Gemini function calls carry no id.
                    id: format!("{}_{idx}", call.name),
                    tool_name: native_tool_name_to_internal(&call.name),
                    tool_input: call.args,
                });
            }
        }
        Ok(parsed)
    }

    fn extract_stream_delta(&self, event: &[u8]) -> Result<StreamDelta, GatewayError> {
        let Ok(response) = serde_json::from_slice::<WireResponse>(event) else {
            tracing::warn!(event = %String::from_utf8_lossy(event), "failed to parse Gemini stream event");
            return Ok(StreamDelta::default());
        };

        let mut delta = StreamDelta {
            usage: response.usage_metadata.map(|u| u.to_usage()),
            ..Default::default()
        };
        for candidate in response.candidates {
            match candidate.finish_reason.as_deref() {
                Some("MAX_TOKENS") => {
                    return Err(GatewayError::new(
                        ErrorKind::MaxTokensExceeded,
                        "the model hit the max token limit before finishing",
                    ))
                }
                Some(reason) => delta.finish_reason = map_finish_reason(reason),
                None => {}
            }
            let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
            for (idx, part) in parts.into_iter().enumerate() {
                if let Some(text) = part.text {
                    delta.content.push_str(&text);
                }
                if let Some(call) = part.function_call {
                    // Function calls arrive whole in Gemini streams.
                    delta.tool_calls.push(ToolCallDelta {
                        index: idx as u32,
                        id: Some(format!("{}_{idx}", call.name)),
                        name: Some(native_tool_name_to_internal(&call.name)),
                        arguments_delta: call.args.to_string(),
                    });
                }
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
            let role = if role_str == "model" { Role::Assistant } else { Role::User };
            let mut content = Vec::new();
            for part in value.get("parts").and_then(Value::as_array).cloned().unwrap_or_default() {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    content.push(MessageContent::Text { text: text.to_string() });
                } else if let Some(inline) = part.get("inlineData") {
                    content.push(MessageContent::File {
                        file: File {
                            data: inline.get("data").and_then(Value::as_str).map(str::to_string),
                            content_type: inline
                                .get("mimeType")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            ..Default::default()
                        },
                    });
                } else if let Some(call) = part.get("functionCall") {
                    let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                    content.push(MessageContent::ToolCallRequest(ToolCallRequest {
                        id: format!("{name}_0"),
                        tool_name: native_tool_name_to_internal(name),
                        tool_input: call.get("args").cloned().unwrap_or(json!({})),
                    }));
                } else if let Some(resp) = part.get("functionResponse") {
                    let name = resp.get("name").and_then(Value::as_str).unwrap_or_default();
                    content.push(MessageContent::ToolCallResult(ToolCallResult {
                        id: format!("{name}_0"),
                        tool_name: Some(native_tool_name_to_internal(name)),
                        result: resp.pointer("/response/result").cloned(),
                        error: resp
                            .pointer("/response/error")
                            .and_then(Value::as_str)
                            .map(str::to_string),
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
        struct GoogleError {
            error: GoogleErrorPayload,
        }
        #[derive(Deserialize)]
        struct GoogleErrorPayload {
            #[serde(default)]
            message: String,
        }
        let message = serde_json::from_str::<GoogleError>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.chars().take(500).collect());
        classify_status(Provider::Google, status, &message)
    }

    fn requires_downloading_file(&self, file: &File, _model: &str) -> bool {
        // Gemini accepts only inline data, not URLs.
        file.data.is_none()
    }
}

fn map_finish_reason(reason: &str) -> Option<FinishReason> {
    match reason {
        "STOP" => Some(FinishReason::Stop),
        "MAX_TOKENS" => Some(FinishReason::MaxTokens),
        "SAFETY" | "PROHIBITED_CONTENT" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<WireUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "functionCall")]
    function_call: Option<WireFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsageMetadata {
    #[serde(default, rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(default, rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
    #[serde(default, rename = "cachedContentTokenCount")]
    cached_content_token_count: Option<u64>,
}

impl WireUsageMetadata {
    fn to_usage(&self) -> LlmUsage {
        LlmUsage {
            prompt_token_count: self.prompt_token_count,
            cached_token_count: self.cached_content_token_count,
            audio_token_count: None,
            completion_token_count: self.candidates_token_count,
            reasoning_token_count: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> GoogleAdapter {
        GoogleAdapter::new(ProviderConfig::new("g-key"))
    }

    #[test]
    fn urls_differ_for_streaming() {
        let a = adapter();
        assert!(a
            .request_url("gemini-2.0-flash", false)
            .ends_with("models/gemini-2.0-flash:generateContent"));
        assert!(a
            .request_url("gemini-2.0-flash", true)
            .ends_with("models/gemini-2.0-flash:streamGenerateContent?alt=sse"));
    }

    #[test]
    fn assistant_role_becomes_model() {
        let body = adapter()
            .build_request(
                &[Message::user("q"), Message::assistant("a")],
                &BuildOptions {
                    model: "gemini-2.0-flash".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(body["contents"][1]["role"], "model");
    }

    #[test]
    fn safety_finish_is_content_moderation() {
        let body = json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "SAFETY"}],
        });
        let err = adapter().parse_response(&body).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContentModeration);
    }

    #[test]
    fn function_calls_get_synthetic_ids() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {"name": "_at_search__google", "args": {"q": "x"}}}]},
                "finishReason": "STOP",
            }],
        });
        let parsed = adapter().parse_response(&body).unwrap();
        assert_eq!(parsed.tool_calls[0].id, "_at_search__google_0");
        assert_eq!(parsed.tool_calls[0].tool_name, "@search-google");
    }

    #[test]
    fn stream_function_calls_arrive_whole() {
        let event = br#"{"candidates": [{"content": {"parts": [{"functionCall": {"name": "f", "args": {}}}]}}]}"#;
        let delta = adapter().extract_stream_delta(event).unwrap();
        assert_eq!(delta.tool_calls.len(), 1);
        assert_eq!(delta.tool_calls[0].arguments_delta, "{}");
    }

    #[test]
    fn usage_metadata_maps() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "hi"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2},
        });
        let parsed = adapter().parse_response(&body).unwrap();
        assert_eq!(parsed.usage.prompt_token_count, Some(4));
        assert_eq!(parsed.usage.completion_token_count, Some(2));
    }

    #[test]
    fn url_only_files_require_download() {
        let a = adapter();
        let file = File {
            url: Some("https://a.png".into()),
            ..Default::default()
        };
        assert!(a.requires_downloading_file(&file, "gemini-2.0-flash"));
        let inline = File {
            data: Some("aGk=".into()),
            ..Default::default()
        };
        assert!(!a.requires_downloading_file(&inline, "gemini-2.0-flash"));
    }
}
