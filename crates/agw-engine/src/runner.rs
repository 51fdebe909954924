// SPDX-License-Identifier: MIT OR Apache-2.0
//! The runner and fallback orchestrator.
//!
//! Plans the ordered `(provider, model)` attempts, executes them with
//! transient retries, drives the tool loop, and aggregates streamed deltas.
//! One [`LlmCompletion`] is recorded per provider call; only the successful
//! one carries a response. Failed attempts stay on the run for cost and
//! debugging.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use futures::StreamExt;
use rand::Rng;
use serde_json::Value;
use tokio::sync::mpsc;

use agw_core::error::{ErrorKind, GatewayError, Retriability};
use agw_core::message::{Message, MessageContent, ReasoningStep, ToolCall, ToolCallRequest};
use agw_core::run::{FallbackMode, LlmCompletion, RunOutput, UseFallback};
use agw_core::version::{ToolSpec, VersionProperties};
use agw_models::{ModelCatalog, Provider};
use agw_providers::adapter::{BuildOptions, ProviderAdapter, ToolDefinition};
use agw_providers::http;
use agw_providers::{prepare_output_schema, ProviderRegistry};
use agw_schema::validate_instance;
use agw_stream::{SseEvent, SseParser, StreamingAggregator};
use agw_tools::{split_tool_requests, ToolRegistry};

use crate::input::PreparedInput;
use crate::EngineConfig;

/// The outcome of a successful run (tool-call handoffs included).
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// The validated final output.
    pub output: Value,
    /// Hosted tools executed along the way.
    pub tool_calls: Vec<ToolCall>,
    /// External tool calls handed back to the caller.
    pub tool_call_requests: Vec<ToolCallRequest>,
    /// Reasoning steps surfaced by the model.
    pub reasoning_steps: Vec<ReasoningStep>,
}

/// Shared handles the runner needs.
pub struct RunnerDeps<'a> {
    /// Configured provider adapters.
    pub registry: &'a ProviderRegistry,
    /// Hosted tools.
    pub tools: &'a ToolRegistry,
    /// The model catalog.
    pub catalog: &'a ModelCatalog,
    /// Shared HTTP client.
    pub http: &'a reqwest::Client,
    /// Engine tunables.
    pub config: &'a EngineConfig,
    /// Tenant credential overrides, keyed by provider name.
    pub provider_overrides: &'a std::collections::BTreeMap<String, agw_core::tenant::ProviderSettings>,
}

/// Plan the ordered `(provider, model)` attempts for a run.
///
/// # Errors
///
/// `invalid_run_options` when the model is unknown or no configured
/// provider can serve it.
pub fn plan_attempts(
    deps: &RunnerDeps<'_>,
    properties: &VersionProperties,
    use_fallback: &UseFallback,
) -> Result<Vec<(Provider, String)>, GatewayError> {
    let model = properties
        .model
        .as_deref()
        .ok_or_else(|| GatewayError::invalid_run_options("Model is required"))?;
    let (data, _) = deps.catalog.resolve(model)?;
    let pinned = properties
        .provider
        .as_deref()
        .and_then(|p| p.parse::<Provider>().ok());

    let mut attempts: Vec<(Provider, String)> = deps
        .catalog
        .providers_for(data, pinned)
        .into_iter()
        .map(|p| (p, data.id.clone()))
        .collect();

    match use_fallback {
        UseFallback::Mode(FallbackMode::Never) => {
            attempts.truncate(1);
        }
        UseFallback::Mode(FallbackMode::Auto) => {
            for candidate in deps.catalog.fallback_models(data) {
                for provider in &candidate.providers {
                    attempts.push((*provider, candidate.id.clone()));
                }
            }
        }
        UseFallback::Models(models) => {
            for model in models {
                let (candidate, _) = deps.catalog.resolve(model)?;
                for provider in &candidate.providers {
                    attempts.push((*provider, candidate.id.clone()));
                }
            }
        }
    }

    // Keep only providers we can actually call.
    attempts.retain(|(provider, _)| {
        deps.provider_overrides.contains_key(provider.as_str())
            || deps.registry.adapter(*provider, None).is_some()
    });
    if attempts.is_empty() {
        return Err(GatewayError::invalid_run_options(format!(
            "no configured provider can serve model {model}"
        )));
    }
    Ok(attempts)
}

/// Execute the planned attempts until one succeeds.
///
/// Transient errors retry within the attempt with backoff and jitter;
/// retriable failures fall through to the next attempt; anything else
/// aborts. `completions` accumulates one record per provider call across
/// all attempts.
pub async fn execute_with_fallback(
    deps: &RunnerDeps<'_>,
    properties: &VersionProperties,
    prepared: &PreparedInput,
    attempts: &[(Provider, String)],
    completions: &mut Vec<LlmCompletion>,
    chunk_tx: Option<&mpsc::Sender<RunOutput>>,
) -> Result<RunOutcome, GatewayError> {
    let mut last_error: Option<GatewayError> = None;

    for (provider, model) in attempts {
        let override_settings = deps.provider_overrides.get(provider.as_str());
        let Some(adapter) = deps.registry.adapter(*provider, override_settings) else {
            continue;
        };

        match attempt_with_retries(deps, adapter.as_ref(), model, properties, prepared, completions, chunk_tx)
            .await
        {
            Ok(outcome) => return Ok(outcome),
            Err(err) => match err.retriability() {
                Retriability::Yes => {
                    tracing::warn!(
                        provider = %provider,
                        model,
                        error = %err,
                        "attempt failed; falling back"
                    );
                    last_error = Some(err);
                }
                _ => return Err(err),
            },
        }
    }

    Err(last_error.unwrap_or_else(|| GatewayError::internal("no provider attempt was made")))
}

/// One `(provider, model)` attempt, retrying transient failures in place.
/// Exactly one completion record is appended per provider call the attempt
/// makes; inner retries replace the previous record rather than adding one.
async fn attempt_with_retries(
    deps: &RunnerDeps<'_>,
    adapter: &dyn ProviderAdapter,
    model: &str,
    properties: &VersionProperties,
    prepared: &PreparedInput,
    completions: &mut Vec<LlmCompletion>,
    chunk_tx: Option<&mpsc::Sender<RunOutput>>,
) -> Result<RunOutcome, GatewayError> {
    let mut once_retried = false;
    let mut transient_retries = 0;
    let baseline = completions.len();

    loop {
        // Inner retries replace this attempt's records.
        completions.truncate(baseline);
        let result =
            run_attempt(deps, adapter, model, properties, prepared, completions, chunk_tx).await;

        let err = match result {
            Ok(outcome) => return Ok(outcome),
            Err(err) => err,
        };
        match err.retriability() {
            Retriability::Once if !once_retried => {
                once_retried = true;
                tracing::warn!(model, error = %err, "retrying once after generation failure");
            }
            Retriability::Yes if transient_retries < deps.config.max_attempt_retries => {
                let delay = backoff_delay(transient_retries, err.retry_after);
                transient_retries += 1;
                tracing::warn!(model, error = %err, ?delay, "retrying after transient failure");
                tokio::time::sleep(delay).await;
            }
            _ => return Err(err),
        }
    }
}

/// Exponential backoff with jitter, honoring an advisory retry-after.
fn backoff_delay(retry: usize, retry_after: Option<Duration>) -> Duration {
    let base = retry_after
        .unwrap_or_else(|| Duration::from_millis(500 * (1 << retry.min(4))));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..250));
    base.min(Duration::from_secs(10)) + jitter
}

/// One provider conversation: build, call, loop on hosted tools, finalize.
async fn run_attempt(
    deps: &RunnerDeps<'_>,
    adapter: &dyn ProviderAdapter,
    model: &str,
    properties: &VersionProperties,
    prepared: &PreparedInput,
    completions: &mut Vec<LlmCompletion>,
    chunk_tx: Option<&mpsc::Sender<RunOutput>>,
) -> Result<RunOutcome, GatewayError> {
    let mut messages = prepared.messages.clone();
    inline_required_files(deps, adapter, model, &mut messages).await?;
    let mut executed: Vec<ToolCall> = Vec::new();
    let mut seen_tool_identities: BTreeSet<String> = BTreeSet::new();

    for _ in 0..deps.config.max_tool_iterations {
        let options = build_options(deps, adapter, model, properties, prepared, chunk_tx.is_some());
        let request = adapter.build_request(&messages, &options)?;

        let started = Instant::now();
        let mut completion = LlmCompletion {
            provider: adapter.name().as_str().to_string(),
            model: model.to_string(),
            messages: adapter.raw_prompt(&request),
            response: None,
            usage: Default::default(),
            finish_reason: None,
            duration_seconds: None,
            cost_usd: None,
        };

        let round = if chunk_tx.is_some() {
            stream_round(deps, adapter, model, &request, prepared, &executed, chunk_tx).await
        } else {
            buffered_round(deps, adapter, model, &request).await
        };
        completion.duration_seconds = Some(started.elapsed().as_secs_f64());

        let round = match round {
            Ok(round) => round,
            Err(err) => {
                completions.push(completion);
                return Err(err);
            }
        };
        completion.usage = round.usage.clone();
        completion.finish_reason = round.finish_reason;
        completion.response = Some(round.raw_text.clone());
        completions.push(completion);

        let (hosted, external) = split_tool_requests(&round.tool_requests);

        if !external.is_empty() {
            // External tools terminate the loop; the caller executes them.
            return Ok(RunOutcome {
                output: Value::Object(Default::default()),
                tool_calls: executed,
                tool_call_requests: round.tool_requests,
                reasoning_steps: round.reasoning_steps,
            });
        }

        if hosted.is_empty() {
            let output = finalize_output(prepared, &round)?;
            return Ok(RunOutcome {
                output,
                tool_calls: executed,
                tool_call_requests: Vec::new(),
                reasoning_steps: round.reasoning_steps,
            });
        }

        // Refuse to re-run a hosted tool on byte-identical arguments.
        for request in &hosted {
            if !seen_tool_identities.insert(request.identity()) {
                return Err(GatewayError::new(
                    ErrorKind::FailedGeneration,
                    format!(
                        "tool {} was already called with identical arguments",
                        request.tool_name
                    ),
                ));
            }
        }

        // Execute this round's tools concurrently, each under its own
        // timeout, then feed the results back and go around again.
        let calls =
            futures::future::join_all(hosted.iter().map(|r| deps.tools.invoke(r))).await;
        messages.push(Message {
            role: agw_core::message::Role::Assistant,
            content: hosted
                .iter()
                .cloned()
                .map(MessageContent::ToolCallRequest)
                .collect(),
        });
        messages.push(Message {
            role: agw_core::message::Role::User,
            content: calls
                .iter()
                .map(|call| {
                    MessageContent::ToolCallResult(agw_core::message::ToolCallResult {
                        id: call.id.clone(),
                        tool_name: Some(call.tool_name.clone()),
                        result: call.result.clone(),
                        error: call.error.clone(),
                    })
                })
                .collect(),
        });
        executed.extend(calls);

        if let Some(tx) = chunk_tx {
            let empty_output = if prepared.structured_output {
                Value::Object(Default::default())
            } else {
                Value::String(String::new())
            };
            let update = RunOutput {
                task_output: empty_output,
                tool_calls: executed.clone(),
                ..Default::default()
            };
            if tx.send(update).await.is_err() {
                return Err(GatewayError::new(
                    ErrorKind::ClientDisconnect,
                    "client went away mid-stream",
                ));
            }
        }
    }

    Err(GatewayError::new(
        ErrorKind::FailedGeneration,
        format!(
            "tool call loop exceeded {} iterations",
            deps.config.max_tool_iterations
        ),
    ))
}

/// Download and inline URL-only files the adapter cannot pass through.
async fn inline_required_files(
    deps: &RunnerDeps<'_>,
    adapter: &dyn ProviderAdapter,
    model: &str,
    messages: &mut [Message],
) -> Result<(), GatewayError> {
    for message in messages.iter_mut() {
        for block in message.content.iter_mut() {
            if let MessageContent::File { file } = block {
                if file.data.is_none() && adapter.requires_downloading_file(file, model) {
                    http::download_file(deps.http, file).await?;
                }
            }
        }
    }
    Ok(())
}

/// What one provider round produced, buffered or streamed.
struct RoundResult {
    raw_text: String,
    tool_requests: Vec<ToolCallRequest>,
    reasoning_steps: Vec<ReasoningStep>,
    usage: agw_core::run::LlmUsage,
    finish_reason: Option<agw_core::run::FinishReason>,
}

async fn buffered_round(
    deps: &RunnerDeps<'_>,
    adapter: &dyn ProviderAdapter,
    model: &str,
    request: &Value,
) -> Result<RoundResult, GatewayError> {
    let parsed =
        http::execute(deps.http, adapter, request, model, deps.config.attempt_timeout).await?;
    Ok(RoundResult {
        raw_text: parsed.content,
        tool_requests: parsed.tool_calls,
        reasoning_steps: parsed.reasoning_steps,
        usage: parsed.usage,
        finish_reason: parsed.finish_reason,
    })
}

async fn stream_round(
    deps: &RunnerDeps<'_>,
    adapter: &dyn ProviderAdapter,
    model: &str,
    request: &Value,
    prepared: &PreparedInput,
    executed: &[ToolCall],
    chunk_tx: Option<&mpsc::Sender<RunOutput>>,
) -> Result<RoundResult, GatewayError> {
    let mut byte_stream =
        http::execute_stream(deps.http, adapter, request, model, deps.config.attempt_timeout)
            .await?;
    let mut parser = SseParser::new();
    let mut aggregator = StreamingAggregator::new();

    while let Some(chunk) = byte_stream.next().await {
        let bytes = chunk?;
        for event in parser.feed(&bytes) {
            let payload = match event {
                SseEvent::Data(payload) => payload,
                SseEvent::Done => break,
            };
            let delta = adapter.extract_stream_delta(&payload)?;

            let mut updated = aggregator.push_content(&delta.content);
            updated |= aggregator.push_reasoning(&delta.reasoning);
            for tool_delta in &delta.tool_calls {
                updated |= aggregator.push_tool_delta(tool_delta);
            }
            if let Some(usage) = &delta.usage {
                aggregator.push_usage(usage);
            }
            if let Some(reason) = delta.finish_reason {
                aggregator.set_finish_reason(reason);
            }

            if updated {
                if let Some(tx) = chunk_tx {
                    let partial = partial_output(prepared, &aggregator);
                    let update = RunOutput {
                        task_output: partial,
                        tool_calls: executed.to_vec(),
                        tool_call_requests: aggregator.tool_requests(),
                        reasoning_steps: aggregator.reasoning_steps().to_vec(),
                        is_final: false,
                    };
                    if tx.send(update).await.is_err() {
                        return Err(GatewayError::new(
                            ErrorKind::ClientDisconnect,
                            "client went away mid-stream",
                        ));
                    }
                }
            }
        }
        if parser.is_done() {
            break;
        }
    }

    Ok(RoundResult {
        raw_text: aggregator.raw_text().to_string(),
        tool_requests: aggregator.tool_requests(),
        reasoning_steps: aggregator.reasoning_steps().to_vec(),
        usage: aggregator.usage().clone(),
        finish_reason: aggregator.finish_reason(),
    })
}

/// The partial structured output (or raw text) mid-stream.
fn partial_output(prepared: &PreparedInput, aggregator: &StreamingAggregator) -> Value {
    if prepared.structured_output {
        aggregator
            .partial_output()
            .unwrap_or_else(|| Value::Object(Default::default()))
    } else {
        Value::String(aggregator.raw_text().to_string())
    }
}

/// Validate the final output of a round with no tool handoff.
fn finalize_output(prepared: &PreparedInput, round: &RoundResult) -> Result<Value, GatewayError> {
    if !prepared.structured_output {
        return Ok(Value::String(round.raw_text.clone()));
    }
    let json_str = agw_stream::extract_json_str(&round.raw_text).ok_or_else(|| {
        GatewayError::new(
            ErrorKind::FailedGeneration,
            "generation does not contain a valid JSON",
        )
        .with_detail("raw_completion", round.raw_text.clone())
    })?;
    let output: Value = serde_json::from_str(json_str).map_err(|_| {
        GatewayError::new(
            ErrorKind::FailedGeneration,
            "generation does not contain a valid JSON",
        )
        .with_detail("raw_completion", round.raw_text.clone())
    })?;
    if let Err(err) = validate_instance(&prepared.output_schema, &output) {
        return Err(GatewayError::new(
            ErrorKind::FailedGeneration,
            format!("generation does not match the output schema: {}", err.message),
        )
        .with_detail("raw_completion", round.raw_text.clone()));
    }
    Ok(output)
}

/// Assemble the adapter build options for one round.
fn build_options(
    deps: &RunnerDeps<'_>,
    adapter: &dyn ProviderAdapter,
    model: &str,
    properties: &VersionProperties,
    prepared: &PreparedInput,
    stream: bool,
) -> BuildOptions {
    let model_data = deps.catalog.resolve(model).ok().map(|(d, _)| d);

    let mut tools = Vec::new();
    for spec in properties.enabled_tools.as_deref().unwrap_or_default() {
        match spec {
            ToolSpec::Hosted(name) => {
                if let Some(tool) = deps.tools.get(name) {
                    tools.push(ToolDefinition {
                        name: tool.name().to_string(),
                        description: Some(tool.description().to_string()),
                        input_schema: tool.input_schema(),
                        strict: false,
                    });
                } else {
                    tracing::warn!(tool = %name, "enabled hosted tool is not registered");
                }
            }
            ToolSpec::External(tool) => {
                tools.push(ToolDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: tool
                        .input_schema
                        .clone()
                        .unwrap_or_else(|| serde_json::json!({"type": "object"})),
                    strict: tool.strict.unwrap_or(false),
                });
            }
        }
    }

    // Schema-guided decoding only when the provider, the model, and the
    // schema all allow it; otherwise degrade to a JSON object format.
    let wants_structured = prepared.structured_output
        && properties.structured_generation != Some(false);
    let supports = adapter.supports_structured_generation()
        && model_data.is_some_and(|d| d.supports_structured_generation);
    let output_schema = if wants_structured && supports {
        prepare_output_schema(&prepared.output_schema)
    } else {
        None
    };
    let json_mode = wants_structured && output_schema.is_none();

    BuildOptions {
        model: model.to_string(),
        temperature: properties.temperature,
        top_p: properties.top_p,
        presence_penalty: properties.presence_penalty,
        frequency_penalty: properties.frequency_penalty,
        max_tokens: properties.max_tokens,
        model_max_output_tokens: model_data.map(|d| d.max_output_tokens),
        tool_choice: properties.tool_choice.clone(),
        tools,
        output_schema,
        json_mode,
        reasoning_effort: properties.reasoning_effort.clone(),
        stream,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agw_providers::adapter::ProviderConfig;
    use agw_schema::SchemaPair;
    use serde_json::json;
    use std::collections::BTreeMap;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn raw_prepared() -> PreparedInput {
        let schema = SchemaPair::raw_string_output();
        crate::input::prepare_raw_input(
            &schema,
            &VersionProperties::default(),
            vec![Message::user("Hello, world!")],
            Default::default(),
        )
        .unwrap()
    }

    fn properties(model: &str) -> VersionProperties {
        VersionProperties {
            model: Some(model.into()),
            ..Default::default()
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            max_attempt_retries: 0,
            ..Default::default()
        }
    }

    fn registry_with(servers: &[(Provider, &MockServer)]) -> ProviderRegistry {
        let configs: BTreeMap<Provider, ProviderConfig> = servers
            .iter()
            .map(|(provider, server)| {
                let base = match provider {
                    Provider::OpenAi | Provider::Mistral | Provider::XAi | Provider::Cerebras => {
                        format!("{}/v1/chat/completions", server.uri())
                    }
                    Provider::Anthropic => format!("{}/v1/messages", server.uri()),
                    _ => server.uri(),
                };
                (
                    *provider,
                    ProviderConfig {
                        api_key: "test-key".into(),
                        base_url: Some(base),
                    },
                )
            })
            .collect();
        ProviderRegistry::new(configs)
    }

    fn openai_success(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": content}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3},
        }))
    }

    #[test]
    fn plan_respects_never_fallback() {
        let registry = registry_empty();
        let overrides = BTreeMap::new();
        let catalog = ModelCatalog::default();
        let http = reqwest::Client::new();
        let cfg = config();
        let deps = RunnerDeps {
            registry: &registry,
            tools: &ToolRegistry::default(),
            catalog: &catalog,
            http: &http,
            config: &cfg,
            provider_overrides: &overrides,
        };
        let attempts = plan_attempts(
            &deps,
            &properties("claude-3-5-sonnet-20241022"),
            &UseFallback::Mode(FallbackMode::Never),
        )
        .unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].0, Provider::Anthropic);
    }

    fn registry_empty() -> ProviderRegistry {
        let configs: BTreeMap<Provider, ProviderConfig> = Provider::ALL
            .iter()
            .map(|p| (*p, ProviderConfig::new("k")))
            .collect();
        ProviderRegistry::new(configs)
    }

    #[test]
    fn plan_auto_appends_other_providers_then_models() {
        let registry = registry_empty();
        let overrides = BTreeMap::new();
        let catalog = ModelCatalog::default();
        let http = reqwest::Client::new();
        let cfg = config();
        let deps = RunnerDeps {
            registry: &registry,
            tools: &ToolRegistry::default(),
            catalog: &catalog,
            http: &http,
            config: &cfg,
            provider_overrides: &overrides,
        };
        let attempts = plan_attempts(
            &deps,
            &properties("claude-3-5-sonnet-20241022"),
            &UseFallback::Mode(FallbackMode::Auto),
        )
        .unwrap();
        // Both providers of the model come before any fallback model.
        assert_eq!(attempts[0], (Provider::Anthropic, "claude-3-5-sonnet-20241022".into()));
        assert_eq!(attempts[1], (Provider::Bedrock, "claude-3-5-sonnet-20241022".into()));
        assert!(attempts.len() > 2);
        assert!(attempts[2..].iter().all(|(_, m)| m != "claude-3-5-sonnet-20241022"));
    }

    #[test]
    fn plan_explicit_model_list_is_used_verbatim() {
        let registry = registry_empty();
        let overrides = BTreeMap::new();
        let catalog = ModelCatalog::default();
        let http = reqwest::Client::new();
        let cfg = config();
        let deps = RunnerDeps {
            registry: &registry,
            tools: &ToolRegistry::default(),
            catalog: &catalog,
            http: &http,
            config: &cfg,
            provider_overrides: &overrides,
        };
        let attempts = plan_attempts(
            &deps,
            &properties("gpt-4o"),
            &UseFallback::Models(vec!["gpt-4o-mini".into()]),
        )
        .unwrap();
        assert_eq!(attempts[0], (Provider::OpenAi, "gpt-4o".into()));
        assert_eq!(attempts[1], (Provider::OpenAi, "gpt-4o-mini".into()));
    }

    #[tokio::test]
    async fn buffered_run_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(openai_success("Hello James!"))
            .mount(&server)
            .await;
        let registry = registry_with(&[(Provider::OpenAi, &server)]);
        let overrides = BTreeMap::new();
        let catalog = ModelCatalog::default();
        let http = reqwest::Client::new();
        let cfg = config();
        let deps = RunnerDeps {
            registry: &registry,
            tools: &ToolRegistry::default(),
            catalog: &catalog,
            http: &http,
            config: &cfg,
            provider_overrides: &overrides,
        };
        let prepared = raw_prepared();
        let props = properties("gpt-4o");
        let attempts = plan_attempts(&deps, &props, &UseFallback::default()).unwrap();
        let mut completions = Vec::new();
        let outcome = execute_with_fallback(&deps, &props, &prepared, &attempts, &mut completions, None)
            .await
            .unwrap();
        assert_eq!(outcome.output, json!("Hello James!"));
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].response.as_deref(), Some("Hello James!"));
        assert_eq!(completions[0].usage.prompt_token_count, Some(10));
    }

    #[tokio::test]
    async fn rate_limited_provider_falls_back_in_order() {
        let anthropic = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string(
                r#"{"type": "error", "error": {"type": "rate_limit_error", "message": "slow"}}"#,
            ))
            .mount(&anthropic)
            .await;
        let bedrock = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string(r#"{"message": "throttled"}"#))
            .mount(&bedrock)
            .await;
        let openai = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(openai_success("rescued"))
            .mount(&openai)
            .await;

        let registry = registry_with(&[
            (Provider::Anthropic, &anthropic),
            (Provider::Bedrock, &bedrock),
            (Provider::OpenAi, &openai),
        ]);
        let overrides = BTreeMap::new();
        let catalog = ModelCatalog::default();
        let http = reqwest::Client::new();
        let cfg = config();
        let deps = RunnerDeps {
            registry: &registry,
            tools: &ToolRegistry::default(),
            catalog: &catalog,
            http: &http,
            config: &cfg,
            provider_overrides: &overrides,
        };
        let prepared = raw_prepared();
        let props = properties("claude-3-5-sonnet-20241022");
        let attempts = plan_attempts(&deps, &props, &UseFallback::default()).unwrap();
        let mut completions = Vec::new();
        let outcome = execute_with_fallback(&deps, &props, &prepared, &attempts, &mut completions, None)
            .await
            .unwrap();

        assert_eq!(outcome.output, json!("rescued"));
        assert_eq!(completions.len(), 3);
        assert_eq!(completions[0].provider, "anthropic");
        assert_eq!(completions[1].provider, "bedrock");
        assert_eq!(completions[2].provider, "openai");
        assert!(completions[0].response.is_none());
        assert!(completions[1].response.is_none());
        assert!(completions[2].response.is_some());
    }

    #[tokio::test]
    async fn never_fallback_surfaces_the_rate_limit() {
        let anthropic = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string(
                r#"{"type": "error", "error": {"type": "rate_limit_error", "message": "slow"}}"#,
            ))
            .mount(&anthropic)
            .await;
        let registry = registry_with(&[(Provider::Anthropic, &anthropic)]);
        let overrides = BTreeMap::new();
        let catalog = ModelCatalog::default();
        let http = reqwest::Client::new();
        let cfg = config();
        let deps = RunnerDeps {
            registry: &registry,
            tools: &ToolRegistry::default(),
            catalog: &catalog,
            http: &http,
            config: &cfg,
            provider_overrides: &overrides,
        };
        let prepared = raw_prepared();
        let props = properties("claude-3-5-sonnet-20241022");
        let attempts =
            plan_attempts(&deps, &props, &UseFallback::Mode(FallbackMode::Never)).unwrap();
        let mut completions = Vec::new();
        let err = execute_with_fallback(&deps, &props, &prepared, &attempts, &mut completions, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimit);
        assert_eq!(completions.len(), 1);
    }

    #[tokio::test]
    async fn streaming_emits_cumulative_chunks() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\": [{\"delta\": {\"content\": \"Hello\"}}]}\n\n",
            "data: {\"choices\": [{\"delta\": {\"content\": \" world\"}}]}\n\n",
            "data: {\"choices\": [{\"delta\": {}, \"finish_reason\": \"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let registry = registry_with(&[(Provider::OpenAi, &server)]);
        let overrides = BTreeMap::new();
        let catalog = ModelCatalog::default();
        let http = reqwest::Client::new();
        let cfg = config();
        let deps = RunnerDeps {
            registry: &registry,
            tools: &ToolRegistry::default(),
            catalog: &catalog,
            http: &http,
            config: &cfg,
            provider_overrides: &overrides,
        };
        let prepared = raw_prepared();
        let props = properties("gpt-4o");
        let attempts = plan_attempts(&deps, &props, &UseFallback::default()).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let mut completions = Vec::new();
        let outcome =
            execute_with_fallback(&deps, &props, &prepared, &attempts, &mut completions, Some(&tx))
                .await
                .unwrap();
        drop(tx);

        assert_eq!(outcome.output, json!("Hello world"));
        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk.task_output);
        }
        assert_eq!(chunks, vec![json!("Hello"), json!("Hello world")]);
    }

    #[tokio::test]
    async fn structured_output_is_validated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(openai_success("{\"greeting\": 42}"))
            .mount(&server)
            .await;
        let registry = registry_with(&[(Provider::OpenAi, &server)]);
        let overrides = BTreeMap::new();
        let catalog = ModelCatalog::default();
        let http = reqwest::Client::new();
        let cfg = config();
        let deps = RunnerDeps {
            registry: &registry,
            tools: &ToolRegistry::default(),
            catalog: &catalog,
            http: &http,
            config: &cfg,
            provider_overrides: &overrides,
        };
        let schema = SchemaPair {
            input_schema: json!({"type": "object", "properties": {}}),
            output_schema: json!({
                "type": "object",
                "properties": {"greeting": {"type": "string"}},
            }),
        };
        let prepared = crate::input::prepare_structured_input(
            &schema,
            &VersionProperties::default(),
            json!({}),
        )
        .unwrap();
        let props = properties("gpt-4o");
        let attempts = plan_attempts(&deps, &props, &UseFallback::Mode(FallbackMode::Never)).unwrap();
        let mut completions = Vec::new();
        let err = execute_with_fallback(&deps, &props, &prepared, &attempts, &mut completions, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::FailedGeneration);
    }
}
