// SPDX-License-Identifier: MIT OR Apache-2.0
//! Agent and run endpoints.
//!
//! Agent upsert (streamlined schemas, stable ids), the native run endpoint,
//! replies, run fetch, and run search. The `{tenant}` path segment is
//! display-only; authorization comes from the bearer token.

use std::collections::{BTreeMap, BTreeSet};

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use agw_core::error::GatewayError;
use agw_core::ids::{is_uuid7, new_run_id};
use agw_core::message::{Message, ToolCallResult};
use agw_core::preview::compute_preview;
use agw_core::run::{CacheUsage, FallbackMode, Run, RunStatus, UseFallback};
use agw_core::version::{VersionProperties, VersionReference};
use agw_engine::{RunContext, RunStreamItem};
use agw_schema::{streamline_schema, SchemaPair};
use agw_store::RunSearchQuery;

use crate::auth::{check_enough_credits, AuthedTenant};
use crate::error::ApiResult;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Agent upsert
// ---------------------------------------------------------------------------

/// Body for `POST /v1/{tenant}/agents`.
#[derive(Debug, Deserialize)]
pub struct UpsertAgentRequest {
    /// URL-safe agent id.
    pub id: String,
    /// Input JSON schema.
    pub input_schema: Value,
    /// Output JSON schema.
    pub output_schema: Value,
}

/// Response for agent upsert.
#[derive(Debug, Serialize)]
pub struct UpsertAgentResponse {
    /// Agent id.
    pub agent_id: String,
    /// Numeric uid.
    pub agent_uid: u64,
    /// Id of the schema matching the posted pair.
    pub schema_id: u32,
}

/// `POST /v1/{tenant}/agents` — create or update an agent schema.
///
/// # Errors
///
/// Taxonomy errors from streamlining or storage.
pub async fn upsert_agent(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Path(_tenant_slug): Path<String>,
    Json(body): Json<UpsertAgentRequest>,
) -> ApiResult<Json<UpsertAgentResponse>> {
    let pair = SchemaPair {
        input_schema: streamline_schema(&body.input_schema),
        output_schema: streamline_schema(&body.output_schema),
    };
    let (agent, schema_id) = state
        .engine
        .storage()
        .agents
        .get_or_create_agent(tenant.tenant_uid, &body.id, pair)
        .await?;
    Ok(Json(UpsertAgentResponse {
        agent_id: agent.agent_id,
        agent_uid: agent.agent_uid,
        schema_id,
    }))
}

// ---------------------------------------------------------------------------
// Native run
// ---------------------------------------------------------------------------

/// Body for the native run endpoint.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    /// The input; object for structured schemas, `{"messages": [...]}` for
    /// raw schemas.
    pub task_input: Value,
    /// Version reference: inline properties, semver, environment, or hash.
    pub version: Value,
    /// Optional run id; must be a UUIDv7.
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Whether to stream.
    #[serde(default)]
    pub stream: bool,
    /// Cache policy.
    #[serde(default)]
    pub use_cache: CacheUsage,
    /// Caller metadata.
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, Value>>,
    /// Paths stripped before persistence.
    #[serde(default)]
    pub private_fields: Option<BTreeSet<String>>,
    /// Fallback policy.
    #[serde(default)]
    pub use_fallback: Option<UseFallback>,
    /// Conversation linkage.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Parse the `version` field of a run request.
fn version_reference(value: &Value) -> Result<VersionReference, GatewayError> {
    match value {
        Value::Object(_) => {
            // Unknown property keys are rejected, not dropped.
            let properties: VersionProperties = serde_json::from_value(value.clone())
                .map_err(|e| {
                    GatewayError::invalid_run_options(format!("invalid version properties: {e}"))
                })?;
            Ok(VersionReference::Properties(Box::new(properties)))
        }
        Value::String(s) => VersionReference::parse_str(s)
            .ok_or_else(|| GatewayError::bad_request(format!("invalid version reference: {s}"))),
        Value::Number(n) => n
            .as_u64()
            .map(|n| VersionReference::Iteration(n as u32))
            .ok_or_else(|| GatewayError::bad_request("invalid version iteration")),
        _ => Err(GatewayError::bad_request("invalid version reference")),
    }
}

/// Serialized run for API responses.
#[derive(Debug, Serialize)]
pub struct RunResponse {
    /// Run id.
    pub id: String,
    /// The final output.
    pub task_output: Value,
    /// Version the run executed with.
    pub version: RunResponseVersion,
    /// Wall-clock duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Total cost.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Caller metadata.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    /// Hosted tools executed during the run, as previews.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallPreview>,
    /// External tool calls for the client to execute.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_call_requests: Vec<Value>,
    /// Reasoning steps.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasoning_steps: Vec<Value>,
    /// Signed feedback token.
    pub feedback_token: String,
}

/// Version block on a run response.
#[derive(Debug, Serialize)]
pub struct RunResponseVersion {
    /// Version hash id.
    pub id: String,
    /// The properties.
    pub properties: VersionProperties,
}

/// Preview of one executed hosted tool.
#[derive(Debug, Serialize)]
pub struct ToolCallPreview {
    /// Call id.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Preview of the input.
    pub input_preview: String,
    /// Preview of the output, when the tool succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_preview: Option<String>,
    /// The error, when the tool failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResponse {
    fn from_run(run: &Run, feedback_token: String) -> Self {
        Self {
            id: run.id.to_string(),
            task_output: run.task_output.clone(),
            version: RunResponseVersion {
                id: run.version_id.clone(),
                properties: run.version_properties.clone(),
            },
            duration_seconds: run.duration_seconds,
            cost_usd: run.cost_usd,
            metadata: run.metadata.clone(),
            tool_calls: run
                .tool_calls
                .iter()
                .map(|call| ToolCallPreview {
                    id: call.id.clone(),
                    name: call.tool_name.clone(),
                    input_preview: compute_preview(&call.tool_input),
                    output_preview: call.result.as_ref().map(compute_preview),
                    error: call.error.clone(),
                })
                .collect(),
            tool_call_requests: run
                .tool_call_requests
                .iter()
                .filter_map(|r| serde_json::to_value(r).ok())
                .collect(),
            reasoning_steps: run
                .reasoning_steps
                .iter()
                .filter_map(|s| serde_json::to_value(s).ok())
                .collect(),
            feedback_token,
        }
    }
}

/// Assemble a [`RunContext`] for the native run endpoint.
async fn build_context(
    state: &AppState,
    tenant: agw_core::tenant::TenantContext,
    agent_id: &str,
    schema_id: u32,
    reference: VersionReference,
    task_input: Value,
    run_id: Uuid,
    cache: CacheUsage,
    use_fallback: UseFallback,
    metadata: BTreeMap<String, Value>,
    private_fields: BTreeSet<String>,
    conversation_id: Option<String>,
) -> Result<RunContext, GatewayError> {
    let agent = state
        .engine
        .storage()
        .agents
        .get_agent(tenant.tenant_uid, agent_id)
        .await?;
    let schema = agent
        .schema(schema_id)
        .ok_or_else(|| {
            GatewayError::new(
                agw_core::error::ErrorKind::AgentNotFound,
                format!("agent {agent_id} has no schema {schema_id}"),
            )
        })?
        .pair
        .clone();

    let resolved = state
        .engine
        .resolve_version(tenant.tenant_uid, agent.agent_uid, schema_id, reference)
        .await?;

    let prepared = if schema.has_raw_input() {
        let messages: Vec<Message> = task_input
            .get("messages")
            .map(|m| serde_json::from_value(m.clone()))
            .transpose()
            .map_err(|e| GatewayError::bad_request(format!("invalid messages: {e}")))?
            .unwrap_or_default();
        let variables: Map<String, Value> = task_input
            .as_object()
            .map(|o| {
                o.iter()
                    .filter(|(k, _)| k.as_str() != "messages")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        agw_engine::input::prepare_raw_input(&schema, &resolved.properties, messages, variables)?
    } else {
        agw_engine::input::prepare_structured_input(&schema, &resolved.properties, task_input)?
    };

    Ok(RunContext {
        tenant,
        agent,
        schema_id,
        resolved,
        prepared,
        run_id,
        cache,
        use_fallback,
        metadata,
        private_fields,
        conversation_id,
    })
}

/// `POST /v1/{tenant}/agents/{agent_id}/schemas/{schema_id}/run`.
///
/// # Errors
///
/// Taxonomy errors rendered per the status mapping.
pub async fn run_agent(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Path((_tenant_slug, agent_id, schema_id)): Path<(String, String, u32)>,
    Json(body): Json<RunRequest>,
) -> ApiResult<Response> {
    check_enough_credits(&tenant)?;
    let run_id = match body.id {
        Some(id) if is_uuid7(&id) => id,
        Some(_) => return Err(GatewayError::bad_request("run id must be a UUIDv7").into()),
        None => new_run_id(),
    };
    let tenant_uid = tenant.tenant_uid;
    let reference = version_reference(&body.version)?;
    let ctx = build_context(
        &state,
        tenant,
        &agent_id,
        schema_id,
        reference,
        body.task_input,
        run_id,
        body.use_cache,
        body.use_fallback.unwrap_or(UseFallback::Mode(FallbackMode::Auto)),
        body.metadata.unwrap_or_default(),
        body.private_fields.unwrap_or_default(),
        body.conversation_id,
    )
    .await?;

    if body.stream {
        Ok(run_event_stream(&state, ctx, tenant_uid))
    } else {
        let run = state.engine.execute(ctx).await?;
        let token = state.feedback.sign(run.id, tenant_uid);
        Ok(Json(RunResponse::from_run(&run, token)).into_response())
    }
}

/// SSE body for the native run endpoints: partial `RunOutput` chunks, then
/// the full run, then a terminal error when one happened.
fn run_event_stream(state: &AppState, ctx: RunContext, tenant_uid: u64) -> Response {
    let mut items = state.engine.clone().execute_stream(ctx);
    let state = state.clone();
    let (frame_tx, frame_rx) =
        tokio::sync::mpsc::channel::<Result<String, std::convert::Infallible>>(32);

    tokio::spawn(async move {
        while let Some(item) = items.recv().await {
            let frame = match item {
                RunStreamItem::Chunk(chunk) => serde_json::to_string(&chunk).ok(),
                RunStreamItem::Final(run) => {
                    let token = state.feedback.sign(run.id, tenant_uid);
                    serde_json::to_string(&RunResponse::from_run(&run, token)).ok()
                }
                RunStreamItem::Error(error) => serde_json::to_string(&error).ok(),
            };
            if let Some(json) = frame {
                if frame_tx.send(Ok(format!("data: {json}\n\n"))).await.is_err() {
                    return;
                }
            }
        }
    });

    Response::builder()
        .header(axum::http::header::CONTENT_TYPE, "text/event-stream")
        .body(axum::body::Body::from_stream(
            tokio_stream::wrappers::ReceiverStream::new(frame_rx),
        ))
        .unwrap_or_else(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// ---------------------------------------------------------------------------
// Reply
// ---------------------------------------------------------------------------

/// Body for `POST /v1/{tenant}/agents/{agent_id}/runs/{run_id}/reply`.
#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    /// Version override; the previous run's version when absent.
    #[serde(default)]
    pub version: Option<Value>,
    /// Message appended after the previous conversation.
    #[serde(default)]
    pub user_message: Option<String>,
    /// Results for the previous run's tool call requests.
    #[serde(default)]
    pub tool_results: Option<Vec<ToolResultBody>>,
    /// Caller metadata.
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, Value>>,
    /// Whether to stream.
    #[serde(default)]
    pub stream: bool,
}

/// One tool result in a reply.
#[derive(Debug, Deserialize)]
pub struct ToolResultBody {
    /// Id of the tool call request being answered.
    pub id: String,
    /// Successful output.
    #[serde(default)]
    pub output: Option<Value>,
    /// Error string.
    #[serde(default)]
    pub error: Option<String>,
}

/// `POST /v1/{tenant}/agents/{agent_id}/runs/{run_id}/reply`.
///
/// # Errors
///
/// `bad_request` when the reply carries neither a message nor tool results
/// or the previous run is unusable.
pub async fn reply_to_run(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Path((_tenant_slug, agent_id, run_id)): Path<(String, String, Uuid)>,
    Json(body): Json<ReplyRequest>,
) -> ApiResult<Response> {
    check_enough_credits(&tenant)?;
    if body.user_message.is_none() && body.tool_results.as_ref().is_none_or(Vec::is_empty) {
        return Err(
            GatewayError::bad_request("no user message or tool results found in reply").into(),
        );
    }

    let tenant_uid = tenant.tenant_uid;
    let previous = state
        .engine
        .get_run(tenant_uid, &agent_id, run_id)
        .await?;

    let reference = match &body.version {
        Some(value) => version_reference(value)?,
        None => VersionReference::Hash(previous.version_id.clone()),
    };

    let mut ctx = build_context(
        &state,
        tenant,
        &agent_id,
        previous.schema_id,
        reference,
        previous.task_input.clone(),
        new_run_id(),
        CacheUsage::Never,
        UseFallback::Mode(FallbackMode::Auto),
        body.metadata.clone().unwrap_or_default(),
        BTreeSet::new(),
        previous.conversation_id.clone(),
    )
    .await?;

    let tool_results: Vec<ToolCallResult> = body
        .tool_results
        .unwrap_or_default()
        .into_iter()
        .map(|r| ToolCallResult {
            id: r.id,
            tool_name: None,
            result: r.output,
            error: r.error,
        })
        .collect();
    ctx.prepared = state
        .engine
        .prepare_reply(&previous, &ctx.prepared, body.user_message, tool_results)?;

    if body.stream {
        Ok(run_event_stream(&state, ctx, tenant_uid))
    } else {
        let run = state.engine.execute(ctx).await?;
        let token = state.feedback.sign(run.id, tenant_uid);
        Ok(Json(RunResponse::from_run(&run, token)).into_response())
    }
}

// ---------------------------------------------------------------------------
// Run fetch and search
// ---------------------------------------------------------------------------

/// `GET /v1/{tenant}/agents/{agent_id}/runs/{run_id}`.
///
/// # Errors
///
/// `run_not_found` when absent.
pub async fn get_run(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Path((_tenant_slug, agent_id, run_id)): Path<(String, String, Uuid)>,
) -> ApiResult<Json<Run>> {
    let run = state
        .engine
        .get_run(tenant.tenant_uid, &agent_id, run_id)
        .await?;
    Ok(Json(run))
}

/// Body for run search.
#[derive(Debug, Default, Deserialize)]
pub struct SearchRunsRequest {
    /// Filter by terminal status.
    #[serde(default)]
    pub status: Option<RunStatus>,
    /// Filter by model.
    #[serde(default)]
    pub model: Option<String>,
    /// Filter by version id.
    #[serde(default)]
    pub version_id: Option<String>,
    /// Paging cursor: return runs before this id.
    #[serde(default)]
    pub before_id: Option<Uuid>,
    /// Page size.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One row in a search response.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    /// Run id.
    pub id: String,
    /// Terminal status.
    pub status: RunStatus,
    /// Model used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Input preview.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_input_preview: Option<String>,
    /// Output preview.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_output_preview: Option<String>,
    /// Cost.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

/// Search response envelope.
#[derive(Debug, Serialize)]
pub struct SearchRunsResponse {
    /// Matching runs, newest first.
    pub items: Vec<RunSummary>,
}

/// `POST /v1/{tenant}/agents/{agent_id}/runs/search`.
///
/// # Errors
///
/// Propagates storage failures.
pub async fn search_runs(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Path((_tenant_slug, agent_id)): Path<(String, String)>,
    Json(body): Json<SearchRunsRequest>,
) -> ApiResult<Json<SearchRunsResponse>> {
    let query = RunSearchQuery {
        status: body.status,
        model: body.model,
        version_id: body.version_id,
        before_id: body.before_id,
        limit: body.limit,
    };
    let runs = state
        .engine
        .search_runs(tenant.tenant_uid, &agent_id, &query)
        .await?;
    let items = runs
        .iter()
        .map(|run| RunSummary {
            id: run.id.to_string(),
            status: run.status,
            model: run.version_properties.model.clone(),
            task_input_preview: run.task_input_preview.clone(),
            task_output_preview: run.task_output_preview.clone(),
            cost_usd: run.cost_usd,
            duration_seconds: run.duration_seconds,
        })
        .collect();
    Ok(Json(SearchRunsResponse { items }))
}
