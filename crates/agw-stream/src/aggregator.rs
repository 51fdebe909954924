// SPDX-License-Identifier: MIT OR Apache-2.0
//! The streaming aggregator.
//!
//! Adapters turn provider SSE events into deltas; the aggregator owns the
//! state between them: the raw completion text, the best-effort structured
//! output, reasoning steps, and per-index tool-call buffers. Buffers are
//! bounded; past the high-water mark the oldest raw prefix is dropped with a
//! warning and only the final parse suffers.

use std::collections::BTreeMap;

use agw_core::error::{ErrorKind, GatewayError};
use agw_core::message::{ReasoningStep, ToolCallRequest};
use agw_core::run::{FinishReason, LlmUsage};

use crate::partial_json::{extract_json_str, parse_partial_json};

/// Upper bound on the accumulated completion text.
const MAX_RAW_BYTES: usize = 4 * 1024 * 1024;
/// Upper bound on one tool call's accumulated arguments.
const MAX_TOOL_INPUT_BYTES: usize = 1024 * 1024;

// ---------------------------------------------------------------------------
// Deltas
// ---------------------------------------------------------------------------

/// A tool-call fragment produced by an adapter.
///
/// The first fragment for an index usually carries `id` and `name`;
/// subsequent fragments append to the JSON arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallDelta {
    /// Provider stream index of the tool call.
    pub index: u32,
    /// Call id, when this fragment carries it.
    pub id: Option<String>,
    /// Tool name (canonical form), when this fragment carries it.
    pub name: Option<String>,
    /// Fragment of the JSON arguments.
    pub arguments_delta: String,
}

/// Accumulation state for one streamed tool call.
#[derive(Debug, Clone, Default)]
pub struct ToolCallRequestBuffer {
    /// Call id, once seen.
    pub id: Option<String>,
    /// Tool name, once seen.
    pub tool_name: Option<String>,
    /// Accumulated JSON arguments.
    pub tool_input: String,
    truncated: bool,
}

impl ToolCallRequestBuffer {
    fn feed(&mut self, delta: &ToolCallDelta) {
        if let Some(id) = &delta.id {
            self.id = Some(id.clone());
        }
        if let Some(name) = &delta.name {
            self.tool_name = Some(name.clone());
        }
        if self.tool_input.len() + delta.arguments_delta.len() > MAX_TOOL_INPUT_BYTES {
            if !self.truncated {
                tracing::warn!(
                    tool = self.tool_name.as_deref().unwrap_or("?"),
                    "tool call input exceeded the buffer bound; truncating"
                );
                self.truncated = true;
            }
            return;
        }
        self.tool_input.push_str(&delta.arguments_delta);
    }

    /// The completed request, when the id and name are known and the
    /// accumulated input parses as JSON.
    fn as_request(&self) -> Option<ToolCallRequest> {
        let id = self.id.clone()?;
        let tool_name = self.tool_name.clone()?;
        let tool_input = if self.tool_input.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(&self.tool_input).ok()?
        };
        Some(ToolCallRequest {
            id,
            tool_name,
            tool_input,
        })
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Aggregates adapter deltas into the state of one streaming completion.
#[derive(Debug, Default)]
pub struct StreamingAggregator {
    raw: String,
    dropped_bytes: usize,
    reasoning_steps: Vec<ReasoningStep>,
    tool_buffers: BTreeMap<u32, ToolCallRequestBuffer>,
    usage: LlmUsage,
    finish_reason: Option<FinishReason>,
}

impl StreamingAggregator {
    /// A fresh aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append streamed completion text. Returns `true` when the aggregate
    /// output may have changed.
    pub fn push_content(&mut self, delta: &str) -> bool {
        if delta.is_empty() {
            return false;
        }
        if self.raw.len() + delta.len() > MAX_RAW_BYTES {
            let overflow = self.raw.len() + delta.len() - MAX_RAW_BYTES;
            let cut = self
                .raw
                .char_indices()
                .map(|(i, _)| i)
                .find(|&i| i >= overflow)
                .unwrap_or(self.raw.len());
            if self.dropped_bytes == 0 {
                tracing::warn!(limit = MAX_RAW_BYTES, "completion exceeded the raw buffer bound; dropping prefix");
            }
            self.dropped_bytes += cut;
            self.raw.drain(..cut);
        }
        self.raw.push_str(delta);
        true
    }

    /// Append streamed reasoning text to the current step.
    pub fn push_reasoning(&mut self, delta: &str) -> bool {
        if delta.is_empty() {
            return false;
        }
        if self.reasoning_steps.is_empty() {
            self.reasoning_steps.push(ReasoningStep::default());
        }
        if let Some(step) = self.reasoning_steps.last_mut() {
            step.append(delta);
        }
        true
    }

    /// Feed a tool-call fragment. Returns `true` when the set of completed
    /// requests may have changed.
    pub fn push_tool_delta(&mut self, delta: &ToolCallDelta) -> bool {
        let buffer = self.tool_buffers.entry(delta.index).or_default();
        buffer.feed(delta);
        buffer.as_request().is_some()
    }

    /// Merge a usage report from the provider.
    pub fn push_usage(&mut self, usage: &LlmUsage) {
        self.usage.merge(usage);
    }

    /// Record the provider's finish reason.
    pub fn set_finish_reason(&mut self, reason: FinishReason) {
        self.finish_reason = Some(reason);
    }

    /// The raw completion text accumulated so far.
    #[must_use]
    pub fn raw_text(&self) -> &str {
        &self.raw
    }

    /// Usage merged so far.
    #[must_use]
    pub fn usage(&self) -> &LlmUsage {
        &self.usage
    }

    /// Finish reason, when the provider reported one.
    #[must_use]
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// Reasoning steps accumulated so far.
    #[must_use]
    pub fn reasoning_steps(&self) -> &[ReasoningStep] {
        &self.reasoning_steps
    }

    /// Best-effort structured output from the current text.
    #[must_use]
    pub fn partial_output(&self) -> Option<serde_json::Value> {
        parse_partial_json(&self.raw)
    }

    /// Tool-call requests whose buffers are complete, in stream order.
    #[must_use]
    pub fn tool_requests(&self) -> Vec<ToolCallRequest> {
        self.tool_buffers
            .values()
            .filter_map(ToolCallRequestBuffer::as_request)
            .collect()
    }

    /// Validate the final output at end of stream.
    ///
    /// Structured runs must yield parseable JSON; raw runs wrap the text as
    /// a JSON string. An unparseable structured output with no tool calls is
    /// a retriable-once `failed_generation`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::FailedGeneration`] as described above.
    pub fn finalize(&self, structured: bool) -> Result<serde_json::Value, GatewayError> {
        if !structured {
            return Ok(serde_json::Value::String(self.raw.clone()));
        }
        if let Some(json_str) = extract_json_str(&self.raw) {
            if let Ok(value) = serde_json::from_str(json_str) {
                return Ok(value);
            }
        }
        if !self.tool_requests().is_empty() {
            // A prose preamble before tool calls is fine; Claude models do
            // this often.
            return Ok(serde_json::json!({}));
        }
        Err(GatewayError::new(
            ErrorKind::FailedGeneration,
            "generation does not contain a valid JSON",
        )
        .with_detail("raw_completion", self.raw.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_accumulates_and_parses_partially() {
        let mut agg = StreamingAggregator::new();
        agg.push_content("{\"greeting\": \"Hel");
        assert_eq!(agg.partial_output(), Some(json!({"greeting": "Hel"})));
        agg.push_content("lo\"}");
        assert_eq!(agg.partial_output(), Some(json!({"greeting": "Hello"})));
    }

    #[test]
    fn tool_fragments_complete_when_parseable() {
        let mut agg = StreamingAggregator::new();
        let changed = agg.push_tool_delta(&ToolCallDelta {
            index: 0,
            id: Some("call_1".into()),
            name: Some("@search-google".into()),
            arguments_delta: "{\"query\":".into(),
        });
        assert!(!changed);
        assert!(agg.tool_requests().is_empty());
        let changed = agg.push_tool_delta(&ToolCallDelta {
            index: 0,
            id: None,
            name: None,
            arguments_delta: " \"rust\"}".into(),
        });
        assert!(changed);
        let requests = agg.tool_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tool_name, "@search-google");
        assert_eq!(requests[0].tool_input, json!({"query": "rust"}));
    }

    #[test]
    fn empty_arguments_default_to_empty_object() {
        let mut agg = StreamingAggregator::new();
        agg.push_tool_delta(&ToolCallDelta {
            index: 0,
            id: Some("call_1".into()),
            name: Some("@browser-text".into()),
            arguments_delta: String::new(),
        });
        assert_eq!(agg.tool_requests()[0].tool_input, json!({}));
    }

    #[test]
    fn interleaved_indices_keep_separate_buffers() {
        let mut agg = StreamingAggregator::new();
        agg.push_tool_delta(&ToolCallDelta {
            index: 0,
            id: Some("a".into()),
            name: Some("@search-google".into()),
            arguments_delta: "{\"q\": \"x\"}".into(),
        });
        agg.push_tool_delta(&ToolCallDelta {
            index: 1,
            id: Some("b".into()),
            name: Some("@browser-text".into()),
            arguments_delta: "{\"url\": \"y\"}".into(),
        });
        let requests = agg.tool_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].id, "a");
        assert_eq!(requests[1].id, "b");
    }

    #[test]
    fn reasoning_appends_to_one_step() {
        let mut agg = StreamingAggregator::new();
        agg.push_reasoning("think");
        agg.push_reasoning("ing…");
        assert_eq!(agg.reasoning_steps().len(), 1);
        assert_eq!(agg.reasoning_steps()[0].explanation, "thinking…");
    }

    #[test]
    fn finalize_raw_wraps_the_text() {
        let mut agg = StreamingAggregator::new();
        agg.push_content("Hello world");
        assert_eq!(agg.finalize(false).unwrap(), json!("Hello world"));
    }

    #[test]
    fn finalize_structured_requires_json() {
        let mut agg = StreamingAggregator::new();
        agg.push_content("not json at all");
        let err = agg.finalize(true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FailedGeneration);
        assert_eq!(err.retriability(), agw_core::error::Retriability::Once);
    }

    #[test]
    fn finalize_structured_tolerates_prose_with_tool_calls() {
        let mut agg = StreamingAggregator::new();
        agg.push_content("Let me search for that");
        agg.push_tool_delta(&ToolCallDelta {
            index: 0,
            id: Some("c".into()),
            name: Some("@search-google".into()),
            arguments_delta: "{}".into(),
        });
        assert_eq!(agg.finalize(true).unwrap(), json!({}));
    }

    #[test]
    fn finalize_extracts_fenced_json() {
        let mut agg = StreamingAggregator::new();
        agg.push_content("```json\n{\"a\": 1}\n```");
        assert_eq!(agg.finalize(true).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn raw_buffer_is_bounded() {
        let mut agg = StreamingAggregator::new();
        let chunk = "x".repeat(1024 * 1024);
        for _ in 0..6 {
            agg.push_content(&chunk);
        }
        assert!(agg.raw_text().len() <= MAX_RAW_BYTES);
    }

    #[test]
    fn usage_merges_progressively() {
        let mut agg = StreamingAggregator::new();
        agg.push_usage(&LlmUsage {
            prompt_token_count: Some(10),
            ..Default::default()
        });
        agg.push_usage(&LlmUsage {
            completion_token_count: Some(4),
            ..Default::default()
        });
        assert_eq!(agg.usage().prompt_token_count, Some(10));
        assert_eq!(agg.usage().completion_token_count, Some(4));
    }
}
