// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Mistral adapter. Speaks the Chat Completions dialect with the legacy
//! `max_tokens` field and no media input.

use serde_json::Value;

use agw_core::error::GatewayError;
use agw_core::file::File;
use agw_core::message::Message;
use agw_models::Provider;

use crate::adapter::{BuildOptions, ParsedCompletion, ProviderAdapter, ProviderConfig, StreamDelta};
use crate::error_map::classify_openai_style;
use crate::openai_compat::{self, CompatQuirks};

const DEFAULT_URL: &str = "https://api.mistral.ai/v1/chat/completions";

const QUIRKS: CompatQuirks = CompatQuirks {
    uses_max_completion_tokens: false,
    supports_reasoning_effort: false,
    supports_images: false,
    supports_audio: false,
    supports_json_schema: true,
};

/// Adapter for the Mistral API.
#[derive(Debug, Clone)]
pub struct MistralAdapter {
    config: ProviderConfig,
}

impl MistralAdapter {
    /// Build an adapter from connection settings.
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

impl ProviderAdapter for MistralAdapter {
    fn name(&self) -> Provider {
        Provider::Mistral
    }

    fn default_model(&self) -> &'static str {
        "mistral-large-latest"
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
        classify_openai_style(Provider::Mistral, status, body)
    }

    fn requires_downloading_file(&self, _file: &File, _model: &str) -> bool {
        false
    }

    fn rate_limit_headers(&self) -> &'static [(&'static str, &'static str)] {
        &[("tokens", "ratelimitbysize-remaining")]
    }

    fn supports_structured_generation(&self) -> bool {
        true
    }
}
