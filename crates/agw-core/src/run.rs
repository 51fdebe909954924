// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runs, completions, and usage accounting.
//!
//! A run is created when execution starts and becomes visible to readers
//! only after it reaches a terminal state. Each provider round-trip inside a
//! run is recorded as an [`LlmCompletion`], failed fallback attempts
//! included.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::ErrorBody;
use crate::message::{ReasoningStep, ToolCall, ToolCallRequest};

// ---------------------------------------------------------------------------
// Request knobs
// ---------------------------------------------------------------------------

/// Cache lookup policy for a run request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheUsage {
    /// Serve from cache only when the resolved version matches exactly.
    #[default]
    Auto,
    /// Always serve a cached run when one exists, never calling a provider.
    Always,
    /// Skip the cache entirely.
    Never,
}

/// Fallback policy for a run request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UseFallback {
    /// `"auto"` or `"never"`.
    Mode(FallbackMode),
    /// Explicit ordered list of fallback model ids, used verbatim.
    Models(Vec<String>),
}

/// The two string forms of [`UseFallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// Try alternate providers, then same-or-better models (default).
    Auto,
    /// Stop after the first failure.
    Never,
}

impl Default for UseFallback {
    fn default() -> Self {
        Self::Mode(FallbackMode::Auto)
    }
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

/// Token usage for one provider round-trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    /// Tokens in the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_token_count: Option<u64>,
    /// Prompt tokens served from the provider's cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_token_count: Option<u64>,
    /// Audio tokens in the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_token_count: Option<u64>,
    /// Tokens in the completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_token_count: Option<u64>,
    /// Reasoning tokens in the completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_token_count: Option<u64>,
}

impl LlmUsage {
    /// Merge a later usage report into this one, preferring present fields.
    pub fn merge(&mut self, other: &LlmUsage) {
        if other.prompt_token_count.is_some() {
            self.prompt_token_count = other.prompt_token_count;
        }
        if other.cached_token_count.is_some() {
            self.cached_token_count = other.cached_token_count;
        }
        if other.audio_token_count.is_some() {
            self.audio_token_count = other.audio_token_count;
        }
        if other.completion_token_count.is_some() {
            self.completion_token_count = other.completion_token_count;
        }
        if other.reasoning_token_count.is_some() {
            self.reasoning_token_count = other.reasoning_token_count;
        }
    }
}

// ---------------------------------------------------------------------------
// Completions
// ---------------------------------------------------------------------------

/// Why a provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop.
    Stop,
    /// Token limit reached.
    MaxTokens,
    /// The model requested tool calls.
    ToolCalls,
    /// Content filter intervened.
    ContentFilter,
}

/// One round-trip to a provider inside a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCompletion {
    /// Provider that served (or failed) the attempt.
    pub provider: String,
    /// Model requested.
    pub model: String,
    /// The exact messages sent, in the provider's raw shape.
    pub messages: Vec<serde_json::Value>,
    /// Raw response text; only the successful attempt has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Usage reported by the provider.
    #[serde(default)]
    pub usage: LlmUsage,
    /// Finish reason when the provider reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Wall-clock duration of the attempt in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Cost computed from the pricing table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// The run produced a validated output.
    Success,
    /// The run failed; `error` holds the reason.
    Failure,
}

/// One execution of an agent on an input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Time-ordered UUIDv7 id.
    pub id: Uuid,
    /// Owning agent.
    pub agent_id: String,
    /// Owning schema.
    pub schema_id: u32,
    /// Version hash the run executed with.
    pub version_id: String,
    /// Version properties at execution time.
    pub version_properties: crate::version::VersionProperties,
    /// Validated input.
    pub task_input: serde_json::Value,
    /// Digest of the canonical input.
    pub task_input_hash: String,
    /// Final output; empty object when the run failed before producing one.
    pub task_output: serde_json::Value,
    /// Digest of the canonical output.
    pub task_output_hash: String,
    /// Short human-readable input preview.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_input_preview: Option<String>,
    /// Short human-readable output preview.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_output_preview: Option<String>,
    /// Terminal status.
    pub status: RunStatus,
    /// Total cost across completions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Wall-clock duration in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// One entry per provider attempt, failed fallbacks included.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub llm_completions: Vec<LlmCompletion>,
    /// Hosted tools executed during the run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// External tool calls returned to the caller.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_requests: Vec<ToolCallRequest>,
    /// Reasoning steps surfaced by thinking models.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning_steps: Vec<ReasoningStep>,
    /// Failure payload when `status == Failure`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Caller-provided metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Conversation linkage, when part of a reply chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Whether the run was served from the cache rather than executed.
    #[serde(default)]
    pub from_cache: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Run {
    /// Sum of completion costs, or `None` when no attempt was priced.
    #[must_use]
    pub fn total_completion_cost(&self) -> Option<f64> {
        let priced: Vec<f64> = self
            .llm_completions
            .iter()
            .filter_map(|c| c.cost_usd)
            .collect();
        if priced.is_empty() {
            None
        } else {
            Some(priced.iter().sum())
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming output
// ---------------------------------------------------------------------------

/// A partial or final output chunk emitted while a run streams.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    /// The aggregate output so far (or the validated final output).
    pub task_output: serde_json::Value,
    /// Hosted tool calls with their current status.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// External tool calls for the client to execute.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_call_requests: Vec<ToolCallRequest>,
    /// Reasoning steps so far.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning_steps: Vec<ReasoningStep>,
    /// Set on the last chunk of a stream.
    #[serde(default)]
    pub is_final: bool,
}

impl RunOutput {
    /// A chunk carrying only aggregate output.
    #[must_use]
    pub fn partial(task_output: serde_json::Value) -> Self {
        Self {
            task_output,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_merge_prefers_present_fields() {
        let mut base = LlmUsage {
            prompt_token_count: Some(10),
            ..Default::default()
        };
        base.merge(&LlmUsage {
            completion_token_count: Some(5),
            ..Default::default()
        });
        assert_eq!(base.prompt_token_count, Some(10));
        assert_eq!(base.completion_token_count, Some(5));
        base.merge(&LlmUsage {
            prompt_token_count: Some(12),
            ..Default::default()
        });
        assert_eq!(base.prompt_token_count, Some(12));
    }

    #[test]
    fn cache_usage_default_is_auto() {
        assert_eq!(CacheUsage::default(), CacheUsage::Auto);
        let parsed: CacheUsage = serde_json::from_str("\"always\"").unwrap();
        assert_eq!(parsed, CacheUsage::Always);
    }

    #[test]
    fn use_fallback_accepts_modes_and_lists() {
        let auto: UseFallback = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(auto, UseFallback::Mode(FallbackMode::Auto));
        let list: UseFallback = serde_json::from_str("[\"gpt-4o\",\"gpt-4o-mini\"]").unwrap();
        assert_eq!(list, UseFallback::Models(vec!["gpt-4o".into(), "gpt-4o-mini".into()]));
    }

    #[test]
    fn total_cost_sums_priced_attempts() {
        let completion = |cost: Option<f64>| LlmCompletion {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            messages: vec![],
            response: None,
            usage: LlmUsage::default(),
            finish_reason: None,
            duration_seconds: None,
            cost_usd: cost,
        };
        let mut run = sample_run();
        run.llm_completions = vec![completion(Some(0.1)), completion(None), completion(Some(0.2))];
        let total = run.total_completion_cost().unwrap();
        assert!((total - 0.3).abs() < 1e-9);
        run.llm_completions = vec![completion(None)];
        assert!(run.total_completion_cost().is_none());
    }

    fn sample_run() -> Run {
        Run {
            id: crate::ids::new_run_id(),
            agent_id: "greeter".into(),
            schema_id: 1,
            version_id: "0".repeat(32),
            version_properties: Default::default(),
            task_input: serde_json::json!({}),
            task_input_hash: String::new(),
            task_output: serde_json::json!({}),
            task_output_hash: String::new(),
            task_input_preview: None,
            task_output_preview: None,
            status: RunStatus::Success,
            cost_usd: None,
            duration_seconds: None,
            llm_completions: vec![],
            tool_calls: vec![],
            tool_call_requests: vec![],
            reasoning_steps: vec![],
            error: None,
            metadata: BTreeMap::new(),
            conversation_id: None,
            from_cache: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn run_serde_roundtrip() {
        let run = sample_run();
        let json = serde_json::to_string(&run).unwrap();
        let back: Run = serde_json::from_str(&json).unwrap();
        assert_eq!(back, run);
    }
}
