// SPDX-License-Identifier: MIT OR Apache-2.0
//! Wire types shared by OpenAI-compatible providers.
//!
//! OpenAI, Mistral, xAI, and Cerebras all speak dialects of the Chat
//! Completions API. The request/response types live here once; each adapter
//! configures the differences through [`CompatQuirks`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use agw_core::error::{ErrorKind, GatewayError};
use agw_core::message::{
    Message, MessageContent, ReasoningStep, Role, ToolCallRequest, ToolCallResult,
};
use agw_core::run::{FinishReason, LlmUsage};
use agw_core::version::{ToolChoice, ToolChoiceMode};
use agw_stream::ToolCallDelta;

use crate::adapter::{BuildOptions, ParsedCompletion, StreamDelta};
use crate::names::{internal_tool_name_to_native, native_tool_name_to_internal};

// ---------------------------------------------------------------------------
// Quirks
// ---------------------------------------------------------------------------

/// Differences between Chat Completions dialects.
#[derive(Debug, Clone, Copy)]
pub struct CompatQuirks {
    /// Whether the token ceiling field is `max_completion_tokens` (OpenAI)
    /// or legacy `max_tokens`.
    pub uses_max_completion_tokens: bool,
    /// Whether `reasoning_effort` is accepted.
    pub supports_reasoning_effort: bool,
    /// Whether image parts are accepted.
    pub supports_images: bool,
    /// Whether audio parts are accepted.
    pub supports_audio: bool,
    /// Whether `response_format: json_schema` is accepted.
    pub supports_json_schema: bool,
}

// ---------------------------------------------------------------------------
// Request wire types
// ---------------------------------------------------------------------------

/// A content part in a multi-part message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text payload.
        text: String,
    },
    /// An image by URL (possibly a data URL).
    ImageUrl {
        /// URL wrapper.
        image_url: ImageUrl,
    },
    /// Inline audio data.
    InputAudio {
        /// Audio wrapper.
        input_audio: InputAudio,
    },
}

/// URL wrapper for image parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    /// The image location.
    pub url: String,
}

/// Inline audio data for audio parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputAudio {
    /// Base64 data.
    pub data: String,
    /// Short format name (`mp3`, `wav`).
    pub format: String,
}

/// Message content: a plain string or a list of parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum WireContent {
    /// Plain string content.
    Text(String),
    /// Multi-part content.
    Parts(Vec<ContentPart>),
}

/// A function call inside a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireFunctionCall {
    /// Provider-safe function name.
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

/// A tool call on an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireToolCall {
    /// Call id.
    pub id: String,
    /// Always `"function"`.
    pub r#type: String,
    /// The function payload.
    pub function: WireFunctionCall,
}

/// One message on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireMessage {
    /// Role string (`system`, `user`, `assistant`, `tool`).
    pub role: String,
    /// Content, absent on pure tool-call messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<WireContent>,
    /// Tool calls requested by the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    /// Id of the call a `tool` message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// A tool definition on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireTool {
    /// Always `"function"`.
    pub r#type: String,
    /// The function declaration.
    pub function: WireFunctionDef,
}

/// Function declaration inside a tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunctionDef {
    /// Provider-safe name.
    pub name: String,
    /// Human description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Argument schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Strict schema enforcement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

/// Convert canonical messages to the wire shape.
///
/// Tool results become `tool` role messages; assistant tool requests become
/// `tool_calls`; files become image or audio parts.
///
/// # Errors
///
/// `model_does_not_support_mode` when a file kind the dialect cannot accept
/// is present.
pub fn build_messages(
    messages: &[Message],
    quirks: &CompatQuirks,
) -> Result<Vec<WireMessage>, GatewayError> {
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        // Tool results split into their own `tool` messages.
        for result in message.tool_call_results() {
            out.push(WireMessage {
                role: "tool".to_string(),
                content: Some(WireContent::Text(stringify_result(result))),
                tool_calls: None,
                tool_call_id: Some(result.id.clone()),
            });
        }

        let mut parts: Vec<ContentPart> = Vec::new();
        let mut tool_calls: Vec<WireToolCall> = Vec::new();
        for block in &message.content {
            match block {
                MessageContent::Text { text } => {
                    parts.push(ContentPart::Text { text: text.clone() });
                }
                MessageContent::File { file } => {
                    if file.is_audio() {
                        if !quirks.supports_audio {
                            return Err(GatewayError::new(
                                ErrorKind::ModelDoesNotSupportMode,
                                "audio input is not supported by this provider",
                            ));
                        }
                        let data = file.data.clone().ok_or_else(|| {
                            GatewayError::internal("audio file data should be inlined upstream")
                        })?;
                        let format = match file.content_type.as_deref() {
                            Some("audio/wav" | "audio/wave" | "audio/x-wav") => "wav",
                            _ => "mp3",
                        };
                        parts.push(ContentPart::InputAudio {
                            input_audio: InputAudio {
                                data,
                                format: format.to_string(),
                            },
                        });
                    } else if file.is_image() || file.is_pdf() {
                        if !quirks.supports_images {
                            return Err(GatewayError::new(
                                ErrorKind::ModelDoesNotSupportMode,
                                "image input is not supported by this provider",
                            ));
                        }
                        parts.push(ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: file.to_url("image/*")?,
                            },
                        });
                    } else {
                        return Err(GatewayError::new(
                            ErrorKind::ModelDoesNotSupportMode,
                            "only image and audio files are supported in messages",
                        ));
                    }
                }
                MessageContent::ToolCallRequest(request) => {
                    tool_calls.push(WireToolCall {
                        id: request.id.clone(),
                        r#type: "function".to_string(),
                        function: WireFunctionCall {
                            name: internal_tool_name_to_native(&request.tool_name),
                            arguments: request.tool_input.to_string(),
                        },
                    });
                }
                MessageContent::ToolCallResult(_) => {
                    // Already emitted above.
                }
                MessageContent::Reasoning { .. } => {
                    // Reasoning is never replayed to the provider.
                }
            }
        }

        if parts.is_empty() && tool_calls.is_empty() {
            continue;
        }

        // Collapse a lone text part to plain string content.
        let content = match parts.as_slice() {
            [] => None,
            [ContentPart::Text { text }] => Some(WireContent::Text(text.clone())),
            _ => Some(WireContent::Parts(parts)),
        };
        out.push(WireMessage {
            role: role.to_string(),
            content,
            tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
            tool_call_id: None,
        });
    }
    Ok(out)
}

fn stringify_result(result: &ToolCallResult) -> String {
    if let Some(error) = &result.error {
        return format!("Error: {error}");
    }
    match &result.result {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Build the full request body.
///
/// # Errors
///
/// Propagates [`build_messages`] failures.
pub fn build_request(
    messages: &[Message],
    options: &BuildOptions,
    quirks: &CompatQuirks,
) -> Result<Value, GatewayError> {
    let wire_messages = build_messages(messages, quirks)?;

    let mut body = serde_json::Map::new();
    body.insert("model".into(), json!(options.model));
    body.insert("messages".into(), serde_json::to_value(&wire_messages).map_err(|e| {
        GatewayError::internal(format!("failed to serialize messages: {e}"))
    })?);
    body.insert("stream".into(), json!(options.stream));
    if options.stream {
        body.insert("stream_options".into(), json!({"include_usage": true}));
    }
    if let Some(t) = options.temperature {
        body.insert("temperature".into(), json!(t));
    }
    if let Some(p) = options.top_p {
        body.insert("top_p".into(), json!(p));
    }
    if let Some(p) = options.presence_penalty {
        body.insert("presence_penalty".into(), json!(p));
    }
    if let Some(p) = options.frequency_penalty {
        body.insert("frequency_penalty".into(), json!(p));
    }
    if let Some(max) = options.max_tokens {
        let field = if quirks.uses_max_completion_tokens {
            "max_completion_tokens"
        } else {
            "max_tokens"
        };
        body.insert(field.into(), json!(max));
    }
    if quirks.supports_reasoning_effort {
        if let Some(effort) = &options.reasoning_effort {
            body.insert("reasoning_effort".into(), json!(effort));
        }
    }

    if let Some(schema) = &options.output_schema {
        if quirks.supports_json_schema {
            body.insert(
                "response_format".into(),
                json!({
                    "type": "json_schema",
                    "json_schema": {"name": "output", "strict": true, "schema": schema},
                }),
            );
        } else {
            body.insert("response_format".into(), json!({"type": "json_object"}));
        }
    } else if options.json_mode {
        body.insert("response_format".into(), json!({"type": "json_object"}));
    }

    if !options.tools.is_empty() {
        let tools: Vec<WireTool> = options
            .tools
            .iter()
            .map(|t| WireTool {
                r#type: "function".to_string(),
                function: WireFunctionDef {
                    name: internal_tool_name_to_native(&t.name),
                    description: t.description.clone(),
                    parameters: Some(t.input_schema.clone()),
                    strict: if t.strict { Some(true) } else { None },
                },
            })
            .collect();
        body.insert("tools".into(), serde_json::to_value(tools).map_err(|e| {
            GatewayError::internal(format!("failed to serialize tools: {e}"))
        })?);
        if let Some(choice) = &options.tool_choice {
            body.insert("tool_choice".into(), tool_choice_value(choice));
        }
    }

    Ok(Value::Object(body))
}

fn tool_choice_value(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Mode(ToolChoiceMode::Auto) => json!("auto"),
        ToolChoice::Mode(ToolChoiceMode::None) => json!("none"),
        ToolChoice::Mode(ToolChoiceMode::Required) => json!("required"),
        ToolChoice::Function { name } => json!({
            "type": "function",
            "function": {"name": internal_tool_name_to_native(name)},
        }),
    }
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

/// Usage block on responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireUsage {
    /// Prompt tokens.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Completion tokens.
    #[serde(default)]
    pub completion_tokens: u64,
    /// Prompt token details.
    #[serde(default)]
    pub prompt_tokens_details: Option<WirePromptTokensDetails>,
    /// Completion token details.
    #[serde(default)]
    pub completion_tokens_details: Option<WireCompletionTokensDetails>,
}

/// Cached/audio breakdown of prompt tokens.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WirePromptTokensDetails {
    /// Cached prompt tokens.
    #[serde(default)]
    pub cached_tokens: u64,
    /// Audio prompt tokens.
    #[serde(default)]
    pub audio_tokens: u64,
}

/// Reasoning breakdown of completion tokens.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireCompletionTokensDetails {
    /// Reasoning tokens.
    #[serde(default)]
    pub reasoning_tokens: u64,
}

impl WireUsage {
    /// Convert to the canonical usage record.
    #[must_use]
    pub fn to_usage(&self) -> LlmUsage {
        LlmUsage {
            prompt_token_count: Some(self.prompt_tokens),
            cached_token_count: self.prompt_tokens_details.as_ref().map(|d| d.cached_tokens),
            audio_token_count: self.prompt_tokens_details.as_ref().map(|d| d.audio_tokens),
            completion_token_count: Some(self.completion_tokens),
            reasoning_token_count: self
                .completion_tokens_details
                .as_ref()
                .map(|d| d.reasoning_tokens),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
    /// xAI exposes reasoning on a dedicated field.
    #[serde(default)]
    reasoning_content: Option<String>,
}

/// Map a Chat Completions finish reason to the canonical form.
#[must_use]
pub fn map_finish_reason(reason: &str) -> Option<FinishReason> {
    match reason {
        "stop" => Some(FinishReason::Stop),
        "length" => Some(FinishReason::MaxTokens),
        "tool_calls" => Some(FinishReason::ToolCalls),
        "content_filter" => Some(FinishReason::ContentFilter),
        _ => None,
    }
}

/// Parse a buffered response.
///
/// # Errors
///
/// `max_tokens_exceeded` on a `length` finish, `content_moderation` on a
/// `content_filter` finish, `provider_internal` on an empty payload.
pub fn parse_completion(body: &Value) -> Result<ParsedCompletion, GatewayError> {
    let response: WireResponse = serde_json::from_value(body.clone())
        .map_err(|e| GatewayError::internal(format!("malformed completion payload: {e}")))?;
    let Some(choice) = response.choices.into_iter().next() else {
        return Err(GatewayError::new(
            ErrorKind::ProviderInternal,
            "no choices in completion response",
        ));
    };

    let content = content_text(choice.message.content.as_ref());
    match choice.finish_reason.as_deref() {
        Some("length") => {
            return Err(GatewayError::new(
                ErrorKind::MaxTokensExceeded,
                "the model hit the max token limit before finishing",
            )
            .with_detail("raw_completion", content))
        }
        Some("content_filter") => {
            return Err(GatewayError::new(
                ErrorKind::ContentModeration,
                "the provider filtered the generation",
            ))
        }
        _ => {}
    }

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(wire_tool_call_to_request)
        .collect::<Result<Vec<_>, _>>()?;

    let reasoning_steps = choice
        .message
        .reasoning_content
        .filter(|s| !s.is_empty())
        .map(|explanation| ReasoningStep {
            title: None,
            explanation,
        })
        .into_iter()
        .collect();

    Ok(ParsedCompletion {
        content,
        reasoning_steps,
        tool_calls,
        usage: response.usage.unwrap_or_default().to_usage(),
        finish_reason: choice.finish_reason.as_deref().and_then(map_finish_reason),
    })
}

fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    }
}

fn wire_tool_call_to_request(call: WireToolCall) -> Result<ToolCallRequest, GatewayError> {
    let tool_input = if call.function.arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&call.function.arguments).map_err(|_| {
            GatewayError::new(
                ErrorKind::FailedGeneration,
                format!(
                    "failed to parse tool call arguments: {}",
                    call.function.arguments
                ),
            )
        })?
    };
    Ok(ToolCallRequest {
        id: call.id,
        tool_name: native_tool_name_to_internal(&call.function.name),
        tool_input,
    })
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireStreamResponse {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    #[serde(default)]
    delta: WireStreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireStreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireStreamToolCall>>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireStreamToolCall {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireStreamFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct WireStreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Parse one SSE payload into a delta.
///
/// # Errors
///
/// `max_tokens_exceeded` when the stream finishes on `length`. Unparseable
/// events return an empty delta.
pub fn extract_stream_delta(event: &[u8]) -> Result<StreamDelta, GatewayError> {
    let Ok(parsed) = serde_json::from_slice::<WireStreamResponse>(event) else {
        tracing::warn!(event = %String::from_utf8_lossy(event), "failed to parse SSE event");
        return Ok(StreamDelta::default());
    };

    let mut delta = StreamDelta {
        usage: parsed.usage.map(|u| u.to_usage()),
        ..Default::default()
    };

    for choice in parsed.choices {
        if let Some(content) = choice.delta.content {
            delta.content.push_str(&content);
        }
        if let Some(reasoning) = choice.delta.reasoning_content {
            delta.reasoning.push_str(&reasoning);
        }
        for call in choice.delta.tool_calls.unwrap_or_default() {
            let function = call.function.unwrap_or_default();
            delta.tool_calls.push(ToolCallDelta {
                index: call.index,
                id: call.id,
                name: function.name.map(|n| native_tool_name_to_internal(&n)),
                arguments_delta: function.arguments.unwrap_or_default(),
            });
        }
        if let Some(reason) = choice.finish_reason.as_deref() {
            if reason == "length" {
                return Err(GatewayError::new(
                    ErrorKind::MaxTokensExceeded,
                    "the model hit the max token limit before finishing",
                ));
            }
            delta.finish_reason = map_finish_reason(reason);
        }
    }
    Ok(delta)
}

// ---------------------------------------------------------------------------
// Standardization
// ---------------------------------------------------------------------------

/// Re-parse stored wire messages into canonical form.
///
/// # Errors
///
/// `internal` when a stored message no longer matches the wire schema.
pub fn standardize_messages(raw: &[Value]) -> Result<Vec<Message>, GatewayError> {
    let mut out: Vec<Message> = Vec::with_capacity(raw.len());
    for value in raw {
        let wire: WireMessage = serde_json::from_value(value.clone())
            .map_err(|e| GatewayError::internal(format!("stored message is malformed: {e}")))?;

        if wire.role == "tool" {
            let result = MessageContent::ToolCallResult(ToolCallResult {
                id: wire.tool_call_id.unwrap_or_default(),
                tool_name: None,
                result: Some(match wire.content {
                    Some(WireContent::Text(s)) => {
                        serde_json::from_str(&s).unwrap_or(Value::String(s))
                    }
                    _ => Value::Null,
                }),
                error: None,
            });
            // Tool results standardize as user turns.
            out.push(Message {
                role: Role::User,
                content: vec![result],
            });
            continue;
        }

        let role = match wire.role.as_str() {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            _ => Role::User,
        };
        let mut content: Vec<MessageContent> = Vec::new();
        match wire.content {
            Some(WireContent::Text(text)) => {
                if !text.is_empty() {
                    content.push(MessageContent::Text { text });
                }
            }
            Some(WireContent::Parts(parts)) => {
                for part in parts {
                    match part {
                        ContentPart::Text { text } => content.push(MessageContent::Text { text }),
                        ContentPart::ImageUrl { image_url } => {
                            let file = agw_core::file::File::from_data_url(&image_url.url)
                                .unwrap_or(agw_core::file::File {
                                    url: Some(image_url.url),
                                    ..Default::default()
                                });
                            content.push(MessageContent::File { file });
                        }
                        ContentPart::InputAudio { input_audio } => {
                            content.push(MessageContent::File {
                                file: agw_core::file::File {
                                    data: Some(input_audio.data),
                                    content_type: Some(format!("audio/{}", input_audio.format)),
                                    format: Some(agw_core::file::FileKind::Audio),
                                    ..Default::default()
                                },
                            });
                        }
                    }
                }
            }
            None => {}
        }
        for call in wire.tool_calls.unwrap_or_default() {
            content.push(MessageContent::ToolCallRequest(wire_tool_call_to_request(call)?));
        }
        if !content.is_empty() {
            out.push(Message { role, content });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIRKS: CompatQuirks = CompatQuirks {
        uses_max_completion_tokens: true,
        supports_reasoning_effort: true,
        supports_images: true,
        supports_audio: true,
        supports_json_schema: true,
    };

    fn options() -> BuildOptions {
        BuildOptions {
            model: "gpt-4o".into(),
            temperature: Some(0.5),
            stream: false,
            ..Default::default()
        }
    }

    #[test]
    fn plain_text_message_collapses_to_string_content() {
        let body = build_request(&[Message::user("Hello, world!")], &options(), &QUIRKS).unwrap();
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Hello, world!");
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["temperature"], 0.5);
    }

    #[test]
    fn max_tokens_field_name_follows_the_quirk() {
        let mut opts = options();
        opts.max_tokens = Some(100);
        let body = build_request(&[Message::user("hi")], &opts, &QUIRKS).unwrap();
        assert_eq!(body["max_completion_tokens"], 100);
        let legacy = CompatQuirks {
            uses_max_completion_tokens: false,
            ..QUIRKS
        };
        let body = build_request(&[Message::user("hi")], &opts, &legacy).unwrap();
        assert_eq!(body["max_tokens"], 100);
    }

    #[test]
    fn tools_are_renamed_to_provider_safe_form() {
        let mut opts = options();
        opts.tools = vec![crate::adapter::ToolDefinition {
            name: "@search-google".into(),
            description: Some("Search".into()),
            input_schema: json!({"type": "object"}),
            strict: false,
        }];
        let body = build_request(&[Message::user("hi")], &opts, &QUIRKS).unwrap();
        assert_eq!(body["tools"][0]["function"]["name"], "_at_search__google");
    }

    #[test]
    fn output_schema_becomes_json_schema_response_format() {
        let mut opts = options();
        opts.output_schema = Some(json!({"type": "object", "properties": {}}));
        let body = build_request(&[Message::user("hi")], &opts, &QUIRKS).unwrap();
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        let no_schema = CompatQuirks {
            supports_json_schema: false,
            ..QUIRKS
        };
        let body = build_request(&[Message::user("hi")], &opts, &no_schema).unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn tool_results_become_tool_messages() {
        let message = Message {
            role: Role::User,
            content: vec![MessageContent::ToolCallResult(ToolCallResult {
                id: "call_1".into(),
                tool_name: Some("@search-google".into()),
                result: Some(json!({"hits": 3})),
                error: None,
            })],
        };
        let wire = build_messages(&[message], &QUIRKS).unwrap();
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0].role, "tool");
        assert_eq!(wire[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn parse_completion_extracts_content_and_usage() {
        let body = json!({
            "choices": [{"message": {"content": "Hello James!"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3},
        });
        let parsed = parse_completion(&body).unwrap();
        assert_eq!(parsed.content, "Hello James!");
        assert_eq!(parsed.usage.prompt_token_count, Some(10));
        assert_eq!(parsed.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn length_finish_is_max_tokens_exceeded() {
        let body = json!({
            "choices": [{"message": {"content": "truncat"}, "finish_reason": "length"}],
        });
        let err = parse_completion(&body).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MaxTokensExceeded);
    }

    #[test]
    fn native_tool_calls_are_parsed_and_renamed() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "_at_search__google", "arguments": "{\"query\": \"rust\"}"},
                    }],
                },
                "finish_reason": "tool_calls",
            }],
        });
        let parsed = parse_completion(&body).unwrap();
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].tool_name, "@search-google");
        assert_eq!(parsed.tool_calls[0].tool_input, json!({"query": "rust"}));
    }

    #[test]
    fn stream_delta_extracts_content_fragments() {
        let delta = extract_stream_delta(br#"{"choices": [{"delta": {"content": "Hel"}}]}"#).unwrap();
        assert_eq!(delta.content, "Hel");
        assert!(delta.tool_calls.is_empty());
    }

    #[test]
    fn stream_delta_extracts_tool_fragments() {
        let event = br#"{"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "c1", "function": {"name": "_at_search__google", "arguments": "{\"q"}}]}}]}"#;
        let delta = extract_stream_delta(event).unwrap();
        assert_eq!(delta.tool_calls.len(), 1);
        assert_eq!(delta.tool_calls[0].name.as_deref(), Some("@search-google"));
        assert_eq!(delta.tool_calls[0].arguments_delta, "{\"q");
    }

    #[test]
    fn stream_usage_arrives_on_the_final_event() {
        let event = br#"{"choices": [], "usage": {"prompt_tokens": 7, "completion_tokens": 2}}"#;
        let delta = extract_stream_delta(event).unwrap();
        assert_eq!(delta.usage.unwrap().prompt_token_count, Some(7));
    }

    #[test]
    fn stream_length_finish_errors() {
        let event = br#"{"choices": [{"delta": {}, "finish_reason": "length"}]}"#;
        assert_eq!(
            extract_stream_delta(event).unwrap_err().kind,
            ErrorKind::MaxTokensExceeded
        );
    }

    #[test]
    fn garbage_events_yield_empty_deltas() {
        let delta = extract_stream_delta(b"not json").unwrap();
        assert!(delta.content.is_empty());
    }

    #[test]
    fn standardize_roundtrips_built_messages() {
        let original = vec![
            Message::system("be nice"),
            Message::user("Hello, world!"),
            Message::assistant("Hello James!"),
        ];
        let wire = build_messages(&original, &QUIRKS).unwrap();
        let raw: Vec<Value> = wire.iter().map(|m| serde_json::to_value(m).unwrap()).collect();
        let back = standardize_messages(&raw).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn standardize_recovers_tool_requests() {
        let message = Message {
            role: Role::Assistant,
            content: vec![MessageContent::ToolCallRequest(ToolCallRequest {
                id: "call_1".into(),
                tool_name: "@search-google".into(),
                tool_input: json!({"query": "rust"}),
            })],
        };
        let wire = build_messages(&[message.clone()], &QUIRKS).unwrap();
        let raw: Vec<Value> = wire.iter().map(|m| serde_json::to_value(m).unwrap()).collect();
        let back = standardize_messages(&raw).unwrap();
        assert_eq!(back, vec![message]);
    }
}
