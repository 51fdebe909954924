// SPDX-License-Identifier: MIT OR Apache-2.0
//! The OpenAI-compatible surface.
//!
//! `POST /v1/chat/completions` accepts the standard body plus gateway
//! extensions (`input` variables, `use_cache`, `use_fallback`, `provider`,
//! `agent_id`, `conversation_id`, `metadata`). The model string selects the
//! agent, schema, and model or deployment; unknown agents are provisioned
//! on first use with schemas derived from the request.

use std::collections::{BTreeMap, BTreeSet};

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_stream::wrappers::ReceiverStream;

use agw_core::error::{ErrorKind, GatewayError};
use agw_core::ids::new_run_id;
use agw_core::message::Message;
use agw_core::run::{CacheUsage, Run, UseFallback};
use agw_core::version::{
    ExternalTool, ToolChoice, ToolSpec, VersionEnvironment, VersionProperties, VersionReference,
};
use agw_engine::{RunContext, RunStreamItem};
use agw_providers::openai_compat;
use agw_schema::{streamline_schema, SchemaPair};
use agw_tools::check_external_tools;

use crate::auth::{check_enough_credits, AuthedTenant};
use crate::error::ApiResult;
use crate::state::AppState;

/// Agent used when the model string names none.
const DEFAULT_AGENT: &str = "default";

// ---------------------------------------------------------------------------
// Request body
// ---------------------------------------------------------------------------

/// Streaming options, extended with the JSON-preserving chunk mode.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamOptions {
    /// Emit usage on the final chunk.
    #[serde(default)]
    pub include_usage: bool,
    /// Emit only deltas that keep the accumulated content parseable JSON.
    #[serde(default)]
    pub valid_json_chunks: bool,
}

/// Opaque bundle referring to a saved variant and its messages.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowaiInternal {
    /// Prompt template messages in canonical form.
    #[serde(default)]
    pub version_messages: Option<Vec<Message>>,
}

/// The `POST /v1/chat/completions` body.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    /// Model string; see [`ParsedModel`].
    pub model: String,
    /// Messages in the OpenAI wire shape.
    #[serde(default)]
    pub messages: Vec<Value>,
    /// Whether to stream.
    #[serde(default)]
    pub stream: bool,
    /// `text`, `json_object`, or `json_schema` response format.
    #[serde(default)]
    pub response_format: Option<Value>,
    /// External tools in the OpenAI shape.
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    /// Tool choice constraint.
    #[serde(default)]
    pub tool_choice: Option<ToolChoice>,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Nucleus sampling.
    #[serde(default)]
    pub top_p: Option<f64>,
    /// Presence penalty.
    #[serde(default)]
    pub presence_penalty: Option<f64>,
    /// Frequency penalty.
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    /// Completion token ceiling (legacy name).
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Completion token ceiling.
    #[serde(default)]
    pub max_completion_tokens: Option<u32>,
    /// Reasoning effort for thinking models.
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    /// Streaming options.
    #[serde(default)]
    pub stream_options: Option<StreamOptions>,
    /// Choice count; only 1 is permitted.
    #[serde(default)]
    pub n: Option<u32>,
    /// Variables for templated messages.
    #[serde(default)]
    pub input: Option<Map<String, Value>>,
    /// Cache policy.
    #[serde(default)]
    pub use_cache: Option<CacheUsage>,
    /// Fallback policy.
    #[serde(default)]
    pub use_fallback: Option<UseFallback>,
    /// Force a provider.
    #[serde(default)]
    pub provider: Option<String>,
    /// Agent to run when the model string names none.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Saved-variant bundle.
    #[serde(default)]
    pub workflowai_internal: Option<WorkflowaiInternal>,
    /// Conversation linkage.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Caller metadata.
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, Value>>,
    /// Paths stripped before persistence.
    #[serde(default)]
    pub private_fields: Option<BTreeSet<String>>,
}

// ---------------------------------------------------------------------------
// Model string parsing
// ---------------------------------------------------------------------------

/// The pieces of a parsed model string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedModel {
    /// Agent named by the string.
    pub agent_id: Option<String>,
    /// Schema id, from a `#<schema_id>` segment.
    pub schema_id: Option<u32>,
    /// Plain model id.
    pub model: Option<String>,
    /// Deployment environment.
    pub environment: Option<VersionEnvironment>,
}

/// Parse `<model>`, `<agent>/<model>`, `<agent>/#<schema>/<environment>`,
/// or `#<schema>/<environment>`.
///
/// # Errors
///
/// `bad_request` on malformed strings.
pub fn parse_model_string(s: &str) -> Result<ParsedModel, GatewayError> {
    let segments: Vec<&str> = s.split('/').collect();
    let parse_schema = |seg: &str| -> Result<u32, GatewayError> {
        seg.trim_start_matches('#')
            .parse()
            .map_err(|_| GatewayError::bad_request(format!("invalid schema id in model: {s}")))
    };
    let parse_env = |seg: &str| -> Result<VersionEnvironment, GatewayError> {
        seg.parse()
            .map_err(|()| GatewayError::bad_request(format!("invalid environment in model: {s}")))
    };
    match segments.as_slice() {
        [model] if !model.starts_with('#') => Ok(ParsedModel {
            model: Some((*model).to_string()),
            ..Default::default()
        }),
        [schema, environment] if schema.starts_with('#') => Ok(ParsedModel {
            schema_id: Some(parse_schema(schema)?),
            environment: Some(parse_env(environment)?),
            ..Default::default()
        }),
        [agent, model] => Ok(ParsedModel {
            agent_id: Some((*agent).to_string()),
            model: Some((*model).to_string()),
            ..Default::default()
        }),
        [agent, schema, environment] if schema.starts_with('#') => Ok(ParsedModel {
            agent_id: Some((*agent).to_string()),
            schema_id: Some(parse_schema(schema)?),
            environment: Some(parse_env(environment)?),
            ..Default::default()
        }),
        _ => Err(GatewayError::bad_request(format!("invalid model string: {s}"))),
    }
}

/// Derive the schema pair a new agent gets from this request.
fn derive_schema_pair(response_format: Option<&Value>) -> Result<SchemaPair, GatewayError> {
    let Some(format) = response_format else {
        return Ok(SchemaPair::raw_string_output());
    };
    match format.get("type").and_then(Value::as_str) {
        None | Some("text") => Ok(SchemaPair::raw_string_output()),
        Some("json_object") => Ok(SchemaPair::raw_messages()),
        Some("json_schema") => {
            let schema = format
                .pointer("/json_schema/schema")
                .ok_or_else(|| GatewayError::bad_request("json_schema response format requires a schema"))?;
            Ok(SchemaPair {
                input_schema: json!({"format": "messages"}),
                output_schema: streamline_schema(schema),
            })
        }
        Some(other) => Err(GatewayError::bad_request(format!(
            "unknown response_format type: {other}"
        ))),
    }
}

/// Convert OpenAI-shaped tool definitions into external tool specs.
fn parse_external_tools(tools: &[Value]) -> Result<Vec<ToolSpec>, GatewayError> {
    let mut out = Vec::with_capacity(tools.len());
    for tool in tools {
        let function = tool
            .get("function")
            .ok_or_else(|| GatewayError::bad_request("tools must be function tools"))?;
        let name = function
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::bad_request("tool function requires a name"))?;
        out.push(ToolSpec::External(ExternalTool {
            name: name.to_string(),
            description: function
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            input_schema: function.get("parameters").cloned(),
            strict: function.get("strict").and_then(Value::as_bool),
        }));
    }
    check_external_tools(&out)?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// The handler
// ---------------------------------------------------------------------------

/// `POST /v1/chat/completions`.
///
/// # Errors
///
/// Taxonomy errors rendered per §status mapping.
pub async fn chat_completions(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Json(body): Json<ChatCompletionRequest>,
) -> ApiResult<Response> {
    check_enough_credits(&tenant)?;
    if body.n.unwrap_or(1) != 1 {
        return Err(GatewayError::bad_request("only n=1 is supported").into());
    }

    let parsed = parse_model_string(&body.model)?;
    let agent_id = parsed
        .agent_id
        .clone()
        .or_else(|| body.agent_id.clone())
        .unwrap_or_else(|| DEFAULT_AGENT.to_string());

    let request_messages = openai_compat::standardize_messages(&body.messages)
        .map_err(|e| GatewayError::bad_request(format!("invalid messages: {e}")))?;
    let variables = body.input.clone().unwrap_or_default();

    // Agents are provisioned lazily with schemas derived from the request.
    let pair = derive_schema_pair(body.response_format.as_ref())?;
    let (agent, derived_schema_id) = state
        .engine
        .storage()
        .agents
        .get_or_create_agent(tenant.tenant_uid, &agent_id, pair.clone())
        .await?;
    let schema_id = parsed.schema_id.unwrap_or(derived_schema_id);
    let schema_pair = agent
        .schema(schema_id)
        .map(|record| record.pair.clone())
        .ok_or_else(|| {
            GatewayError::new(
                ErrorKind::AgentNotFound,
                format!("agent {agent_id} has no schema {schema_id}"),
            )
        })?;

    // Deployment references resolve through the environment; everything
    // else builds inline properties from the body.
    let (reference, request_messages, variables) = if let Some(environment) = parsed.environment {
        (
            VersionReference::Environment(environment),
            request_messages,
            variables,
        )
    } else {
        let mut properties = VersionProperties {
            model: parsed.model.clone(),
            provider: body.provider.clone(),
            temperature: body.temperature,
            top_p: body.top_p,
            presence_penalty: body.presence_penalty,
            frequency_penalty: body.frequency_penalty,
            max_tokens: body.max_completion_tokens.or(body.max_tokens),
            tool_choice: body.tool_choice.clone(),
            reasoning_effort: body.reasoning_effort.clone(),
            output_schema: body
                .response_format
                .as_ref()
                .and_then(|f| f.get("type"))
                .and_then(Value::as_str)
                .filter(|t| *t == "json_schema")
                .map(|_| schema_pair.output_schema.clone()),
            structured_generation: body
                .response_format
                .as_ref()
                .and_then(|f| f.get("type"))
                .and_then(Value::as_str)
                .map(|t| t == "json_schema"),
            ..Default::default()
        };
        if let Some(tools) = &body.tools {
            let specs = parse_external_tools(tools)?;
            if !specs.is_empty() {
                properties.enabled_tools = Some(specs);
            }
        }
        if let Some(internal) = &body.workflowai_internal {
            properties.messages = internal.version_messages.clone();
        }
        // Templated requests carry the prompt in `messages` and data in
        // `input`; the messages become the version's template.
        if !variables.is_empty() && properties.messages.is_none() && !request_messages.is_empty() {
            properties.messages = Some(request_messages);
            (
                VersionReference::Properties(Box::new(properties)),
                Vec::new(),
                variables,
            )
        } else {
            (
                VersionReference::Properties(Box::new(properties)),
                request_messages,
                variables,
            )
        }
    };

    let resolved = state
        .engine
        .resolve_version(tenant.tenant_uid, agent.agent_uid, schema_id, reference)
        .await?;
    let prepared = agw_engine::input::prepare_raw_input(
        &schema_pair,
        &resolved.properties,
        request_messages,
        variables,
    )?;

    let ctx = RunContext {
        tenant,
        agent,
        schema_id,
        resolved,
        prepared,
        run_id: new_run_id(),
        cache: body.use_cache.unwrap_or_default(),
        use_fallback: body.use_fallback.clone().unwrap_or_default(),
        metadata: body.metadata.clone().unwrap_or_default(),
        private_fields: body.private_fields.clone().unwrap_or_default(),
        conversation_id: body.conversation_id.clone(),
    };

    let tenant_uid = ctx.tenant.tenant_uid;
    if body.stream {
        let options = body.stream_options.unwrap_or_default();
        Ok(stream_response(&state, ctx, options, tenant_uid))
    } else {
        let run = state.engine.execute(ctx).await?;
        let response = render_completion(&state, &run, tenant_uid);
        Ok(Json(response).into_response())
    }
}

// ---------------------------------------------------------------------------
// Buffered rendering
// ---------------------------------------------------------------------------

/// The `chat.completion` response shape, with gateway extension fields on
/// the choice.
#[derive(Debug, Serialize)]
struct ChatCompletion {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    usage: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ChatChoice {
    index: u32,
    message: Value,
    finish_reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_seconds: Option<f64>,
    feedback_token: String,
    url: String,
}

/// The output as message content text.
fn output_text(run: &Run) -> String {
    match &run.task_output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn usage_value(run: &Run) -> Option<Value> {
    let usage = &run.llm_completions.iter().rev().find(|c| c.response.is_some())?.usage;
    let prompt = usage.prompt_token_count.unwrap_or(0);
    let completion = usage.completion_token_count.unwrap_or(0);
    Some(json!({
        "prompt_tokens": prompt,
        "completion_tokens": completion,
        "total_tokens": prompt + completion,
    }))
}

fn render_completion(state: &AppState, run: &Run, tenant_uid: u64) -> ChatCompletion {
    let mut message = json!({"role": "assistant", "content": output_text(run)});
    if !run.tool_call_requests.is_empty() {
        let calls: Vec<Value> = run
            .tool_call_requests
            .iter()
            .map(|r| {
                json!({
                    "id": r.id,
                    "type": "function",
                    "function": {"name": r.tool_name, "arguments": r.tool_input.to_string()},
                })
            })
            .collect();
        message["tool_calls"] = json!(calls);
        message["content"] = Value::Null;
    }
    let finish_reason = if run.tool_call_requests.is_empty() {
        "stop"
    } else {
        "tool_calls"
    };
    ChatCompletion {
        id: format!("{}/{}", run.agent_id, run.id),
        object: "chat.completion",
        created: run.created_at.timestamp(),
        model: run
            .version_properties
            .model
            .clone()
            .unwrap_or_default(),
        choices: vec![ChatChoice {
            index: 0,
            message,
            finish_reason,
            cost_usd: run.cost_usd,
            duration_seconds: run.duration_seconds,
            feedback_token: state.feedback.sign(run.id, tenant_uid),
            url: state.run_url(&run.agent_id, run.id),
        }],
        usage: usage_value(run),
    }
}

// ---------------------------------------------------------------------------
// Streaming rendering
// ---------------------------------------------------------------------------

fn sse_frame(value: &impl Serialize) -> String {
    match serde_json::to_string(value) {
        Ok(json) => format!("data: {json}\n\n"),
        Err(_) => String::new(),
    }
}

/// Build the SSE response for a streamed run.
fn stream_response(
    state: &AppState,
    ctx: RunContext,
    options: StreamOptions,
    tenant_uid: u64,
) -> Response {
    let structured = ctx.prepared.structured_output;
    let model = ctx
        .resolved
        .properties
        .model
        .clone()
        .unwrap_or_default();
    let chunk_id = format!("{}/{}", ctx.agent.agent_id, ctx.run_id);
    let created = chrono::Utc::now().timestamp();
    let state_clone = state.clone();

    let mut items = state.engine.clone().execute_stream(ctx);
    let (frame_tx, frame_rx) = tokio::sync::mpsc::channel::<Result<String, std::convert::Infallible>>(32);

    tokio::spawn(async move {
        let chunk_envelope = |delta: Value, finish: Option<&str>, usage: Option<Value>| {
            json!({
                "id": chunk_id,
                "object": "chat.completion.chunk",
                "created": created,
                "model": model,
                "choices": [{"index": 0, "delta": delta, "finish_reason": finish}],
                "usage": usage,
            })
        };

        let mut sent_text = String::new();
        let mut sent_role = false;
        while let Some(item) = items.recv().await {
            match item {
                RunStreamItem::Chunk(chunk) => {
                    let text = match &chunk.task_output {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    if options.valid_json_chunks
                        && structured
                        && serde_json::from_str::<Value>(&text).is_err()
                    {
                        continue;
                    }
                    let delta = match text.strip_prefix(sent_text.as_str()) {
                        Some(suffix) if !suffix.is_empty() => suffix.to_string(),
                        Some(_) => continue,
                        None => {
                            // The aggregate was rewritten; resend in full.
                            sent_text.clear();
                            text.clone()
                        }
                    };
                    sent_text.push_str(&delta);
                    let mut payload = json!({"content": delta});
                    if !sent_role {
                        payload["role"] = json!("assistant");
                        sent_role = true;
                    }
                    let frame = sse_frame(&chunk_envelope(payload, None, None));
                    if frame_tx.send(Ok(frame)).await.is_err() {
                        return;
                    }
                }
                RunStreamItem::Final(run) => {
                    let final_text = output_text(&run);
                    // Emit whatever the chunks did not cover; a diverged
                    // aggregate resends the final text whole.
                    let remainder = final_text
                        .strip_prefix(sent_text.as_str())
                        .unwrap_or(&final_text);
                    if !remainder.is_empty() {
                        let frame =
                            sse_frame(&chunk_envelope(json!({"content": remainder}), None, None));
                        let _ = frame_tx.send(Ok(frame)).await;
                    }
                    let finish = if run.tool_call_requests.is_empty() {
                        "stop"
                    } else {
                        "tool_calls"
                    };
                    let usage = if options.include_usage {
                        usage_value(&run)
                    } else {
                        None
                    };
                    let mut envelope = chunk_envelope(json!({}), Some(finish), usage);
                    envelope["choices"][0]["cost_usd"] = json!(run.cost_usd);
                    envelope["choices"][0]["duration_seconds"] = json!(run.duration_seconds);
                    envelope["choices"][0]["feedback_token"] =
                        json!(state_clone.feedback.sign(run.id, tenant_uid));
                    envelope["choices"][0]["url"] =
                        json!(state_clone.run_url(&run.agent_id, run.id));
                    let _ = frame_tx.send(Ok(sse_frame(&envelope))).await;
                    let _ = frame_tx.send(Ok("data: [DONE]\n\n".to_string())).await;
                    return;
                }
                RunStreamItem::Error(error) => {
                    let _ = frame_tx.send(Ok(sse_frame(&error))).await;
                    let _ = frame_tx.send(Ok("data: [DONE]\n\n".to_string())).await;
                    return;
                }
            }
        }
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(ReceiverStream::new(frame_rx)))
        .unwrap_or_else(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
