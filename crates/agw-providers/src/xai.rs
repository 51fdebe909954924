// SPDX-License-Identifier: MIT OR Apache-2.0
//! The xAI adapter. Chat Completions dialect whose reasoning models expose
//! thinking on a dedicated `reasoning_content` field — routed to reasoning
//! steps, never to content.

use serde_json::Value;

use agw_core::error::GatewayError;
use agw_core::file::File;
use agw_core::message::Message;
use agw_models::Provider;

use crate::adapter::{BuildOptions, ParsedCompletion, ProviderAdapter, ProviderConfig, StreamDelta};
use crate::error_map::classify_openai_style;
use crate::openai_compat::{self, CompatQuirks};

const DEFAULT_URL: &str = "https://api.x.ai/v1/chat/completions";

const QUIRKS: CompatQuirks = CompatQuirks {
    uses_max_completion_tokens: true,
    supports_reasoning_effort: true,
    supports_images: false,
    supports_audio: false,
    supports_json_schema: true,
};

/// Adapter for the xAI API.
#[derive(Debug, Clone)]
pub struct XAiAdapter {
    config: ProviderConfig,
}

impl XAiAdapter {
    /// Build an adapter from connection settings.
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

impl ProviderAdapter for XAiAdapter {
    fn name(&self) -> Provider {
        Provider::XAi
    }

    fn default_model(&self) -> &'static str {
        "grok-3"
    }

    fn request_url(&self, _model: &str, _stream: bool) -> String {
        self.config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_URL.to_string())
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
        openai_compat::build_request(messages, options, &QUIRKS)
    }

    fn raw_prompt(&self, request: &Value) -> Vec<Value> {
        request
            .get("messages")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    fn parse_response(&self, body: &Value) -> Result<ParsedCompletion, GatewayError> {
        openai_compat::parse_completion(body)
    }

    fn extract_stream_delta(&self, event: &[u8]) -> Result<StreamDelta, GatewayError> {
        openai_compat::extract_stream_delta(event)
    }

    fn standardize_messages(&self, raw: &[Value]) -> Result<Vec<Message>, GatewayError> {
        openai_compat::standardize_messages(raw)
    }

    fn classify_error(&self, status: u16, body: &str) -> GatewayError {
        classify_openai_style(Provider::XAi, status, body)
    }

    fn requires_downloading_file(&self, _file: &File, _model: &str) -> bool {
        false
    }

    fn supports_structured_generation(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_content_routes_to_reasoning_steps() {
        let a = XAiAdapter::new(ProviderConfig::new("k"));
        let body = serde_json::json!({
            "choices": [{
                "message": {"content": "42", "reasoning_content": "thinking about it"},
                "finish_reason": "stop",
            }],
        });
        let parsed = a.parse_response(&body).unwrap();
        assert_eq!(parsed.content, "42");
        assert_eq!(parsed.reasoning_steps.len(), 1);
        assert_eq!(parsed.reasoning_steps[0].explanation, "thinking about it");
    }

    #[test]
    fn stream_reasoning_is_separate_from_content() {
        let a = XAiAdapter::new(ProviderConfig::new("k"));
        let event = br#"{"choices": [{"delta": {"reasoning_content": "hmm"}}]}"#;
        let delta = a.extract_stream_delta(event).unwrap();
        assert_eq!(delta.reasoning, "hmm");
        assert!(delta.content.is_empty());
    }
}
