// SPDX-License-Identifier: MIT OR Apache-2.0
//! The run service.
//!
//! Ties the stages together: cache lookup, attempt planning, execution,
//! failure persistence, and finalization. The service is on the critical
//! path of every request; anything it persists is terminal before readers
//! can see it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use agw_core::error::{ErrorKind, ErrorResponse, GatewayError};
use agw_core::events::RunEventSender;
use agw_core::hash::canonical_digest;
use agw_core::message::{Message, MessageContent, ToolCallResult};
use agw_core::run::{CacheUsage, Run, RunOutput, RunStatus, UseFallback};
use agw_core::tenant::TenantContext;
use agw_core::version::VersionReference;
use agw_models::ModelCatalog;
use agw_providers::ProviderRegistry;
use agw_store::{AgentRecord, CacheKey, RunSearchQuery, Storage};
use agw_tools::ToolRegistry;

use crate::finalize;
use crate::input::PreparedInput;
use crate::resolver::{self, PropertyDetectors, ResolvedVersion};
use crate::runner::{self, RunnerDeps, RunOutcome};
use crate::EngineConfig;

/// Everything one run execution needs.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// The authenticated tenant.
    pub tenant: TenantContext,
    /// The owning agent.
    pub agent: AgentRecord,
    /// The schema being run.
    pub schema_id: u32,
    /// The resolved, sanitized version.
    pub resolved: ResolvedVersion,
    /// The prepared input.
    pub prepared: PreparedInput,
    /// Run id (UUIDv7), assigned by the caller.
    pub run_id: Uuid,
    /// Cache policy.
    pub cache: CacheUsage,
    /// Fallback policy.
    pub use_fallback: UseFallback,
    /// Caller metadata.
    pub metadata: BTreeMap<String, Value>,
    /// Paths stripped before persistence.
    pub private_fields: BTreeSet<String>,
    /// Conversation linkage.
    pub conversation_id: Option<String>,
}

/// One item on a streamed run.
#[derive(Debug)]
pub enum RunStreamItem {
    /// A partial output chunk.
    Chunk(RunOutput),
    /// The final, persisted run.
    Final(Box<Run>),
    /// A terminal error; the shape also goes on the wire.
    Error(Box<ErrorResponse>),
}

/// The run engine.
pub struct RunEngine {
    storage: Storage,
    providers: ProviderRegistry,
    tools: ToolRegistry,
    catalog: ModelCatalog,
    events: RunEventSender,
    detectors: Arc<dyn PropertyDetectors>,
    http: reqwest::Client,
    config: EngineConfig,
}

impl RunEngine {
    /// Assemble an engine from its collaborators.
    #[must_use]
    pub fn new(
        storage: Storage,
        providers: ProviderRegistry,
        tools: ToolRegistry,
        catalog: ModelCatalog,
        events: RunEventSender,
        detectors: Arc<dyn PropertyDetectors>,
        http: reqwest::Client,
        config: EngineConfig,
    ) -> Self {
        Self {
            storage,
            providers,
            tools,
            catalog,
            events,
            detectors,
            http,
            config,
        }
    }

    /// The storage bundle.
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// The model catalog.
    #[must_use]
    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// The hosted tool registry.
    #[must_use]
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Resolve and sanitize a version reference for an agent schema.
    ///
    /// # Errors
    ///
    /// See [`resolver::resolve_version`].
    pub async fn resolve_version(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
        schema_id: u32,
        reference: VersionReference,
    ) -> Result<ResolvedVersion, GatewayError> {
        resolver::resolve_version(
            &self.storage,
            &self.catalog,
            &self.tools,
            self.detectors.as_ref(),
            tenant_uid,
            agent_uid,
            schema_id,
            reference,
        )
        .await
    }

    /// Execute a run to completion, buffered.
    ///
    /// # Errors
    ///
    /// Terminal taxonomy errors; when a failed run was persisted the error
    /// carries its id.
    pub async fn execute(&self, ctx: RunContext) -> Result<Run, GatewayError> {
        if let Some(cached) = self.cached_run(&ctx).await? {
            return Ok(cached);
        }
        self.run_internal(ctx, None).await
    }

    /// Execute a run, streaming partial chunks.
    ///
    /// The returned receiver yields zero or more chunks followed by exactly
    /// one `Final` or `Error` item.
    #[must_use]
    pub fn execute_stream(self: Arc<Self>, ctx: RunContext) -> mpsc::Receiver<RunStreamItem> {
        let (item_tx, item_rx) = mpsc::channel(32);
        let engine = self;
        tokio::spawn(async move {
            match engine.cached_run(&ctx).await {
                Ok(Some(cached)) => {
                    let _ = item_tx.send(RunStreamItem::Final(Box::new(cached))).await;
                    return;
                }
                Ok(None) => {}
                Err(err) => {
                    let _ = item_tx
                        .send(RunStreamItem::Error(Box::new(err.to_response())))
                        .await;
                    return;
                }
            }

            let (chunk_tx, mut chunk_rx) = mpsc::channel::<RunOutput>(32);
            let forward_tx = item_tx.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(chunk) = chunk_rx.recv().await {
                    if forward_tx.send(RunStreamItem::Chunk(chunk)).await.is_err() {
                        break;
                    }
                }
            });

            let result = engine.run_internal(ctx, Some(chunk_tx)).await;
            let _ = forwarder.await;
            match result {
                Ok(run) => {
                    let _ = item_tx.send(RunStreamItem::Final(Box::new(run))).await;
                }
                Err(err) => {
                    let _ = item_tx
                        .send(RunStreamItem::Error(Box::new(err.to_response())))
                        .await;
                }
            }
        });
        item_rx
    }

    /// Serve from the cache when the policy allows.
    async fn cached_run(&self, ctx: &RunContext) -> Result<Option<Run>, GatewayError> {
        if ctx.cache == CacheUsage::Never {
            return Ok(None);
        }
        let key = CacheKey {
            agent_uid: ctx.agent.agent_uid,
            schema_id: ctx.schema_id,
            version_id: ctx.resolved.version_id.clone(),
            task_input_hash: ctx.prepared.input_hash.clone(),
        };
        let Some(run_id) = self.storage.cache.get(ctx.tenant.tenant_uid, &key).await? else {
            return Ok(None);
        };
        match self
            .storage
            .runs
            .get_run(ctx.tenant.tenant_uid, &ctx.agent.agent_id, run_id)
            .await
        {
            Ok(mut run) => {
                run.from_cache = true;
                Ok(Some(run))
            }
            Err(_) => Ok(None),
        }
    }

    /// The shared buffered/streamed execution path.
    async fn run_internal(
        &self,
        ctx: RunContext,
        chunk_tx: Option<mpsc::Sender<RunOutput>>,
    ) -> Result<Run, GatewayError> {
        let started = Instant::now();
        let deps = RunnerDeps {
            registry: &self.providers,
            tools: &self.tools,
            catalog: &self.catalog,
            http: &self.http,
            config: &self.config,
            provider_overrides: &ctx.tenant.provider_settings,
        };
        let attempts = runner::plan_attempts(&deps, &ctx.resolved.properties, &ctx.use_fallback)?;

        let mut completions = Vec::new();
        let result = tokio::time::timeout(
            self.config.run_timeout,
            runner::execute_with_fallback(
                &deps,
                &ctx.resolved.properties,
                &ctx.prepared,
                &attempts,
                &mut completions,
                chunk_tx.as_ref(),
            ),
        )
        .await
        .unwrap_or_else(|_| {
            Err(GatewayError::new(
                ErrorKind::ReadTimeout,
                "the run exceeded its time ceiling",
            ))
        });

        match result {
            Ok(outcome) => {
                let run = self
                    .build_and_persist(&ctx, started, completions, Some(outcome), None)
                    .await?;
                Ok(run)
            }
            Err(mut err) => {
                // The failed run is persisted with whatever partial output
                // the stream accumulated, then the error is surfaced.
                let persisted = self
                    .build_and_persist(&ctx, started, completions, None, Some(&err))
                    .await;
                match persisted {
                    Ok(run) => err.run_id = Some(run.id.to_string()),
                    Err(persist_err) => {
                        tracing::error!(error = %persist_err, "failed to persist a failed run");
                    }
                }
                Err(err)
            }
        }
    }

    async fn build_and_persist(
        &self,
        ctx: &RunContext,
        started: Instant,
        mut completions: Vec<agw_core::run::LlmCompletion>,
        outcome: Option<RunOutcome>,
        error: Option<&GatewayError>,
    ) -> Result<Run, GatewayError> {
        let cost_usd = finalize::price_completions(&self.catalog, &mut completions);
        let raw_output = !ctx.prepared.structured_output;

        let (status, output, tool_calls, tool_call_requests, reasoning_steps, error_body) =
            match (outcome, error) {
                (Some(outcome), _) => (
                    RunStatus::Success,
                    outcome.output,
                    outcome.tool_calls,
                    outcome.tool_call_requests,
                    outcome.reasoning_steps,
                    None,
                ),
                (None, Some(err)) => (
                    RunStatus::Failure,
                    err.partial_output.clone().unwrap_or(Value::Object(Default::default())),
                    Vec::new(),
                    Vec::new(),
                    Vec::new(),
                    Some(err.to_response().error),
                ),
                (None, None) => {
                    return Err(GatewayError::internal("run finished with neither outcome nor error"))
                }
            };

        let mut task_input = ctx.prepared.canonical_input.clone();
        let mut task_output = output;
        finalize::offload_files(&self.storage.objects, ctx.tenant.tenant_uid, &mut task_input)
            .await?;
        finalize::offload_files(&self.storage.objects, ctx.tenant.tenant_uid, &mut task_output)
            .await?;

        let mut run = Run {
            id: ctx.run_id,
            agent_id: ctx.agent.agent_id.clone(),
            schema_id: ctx.schema_id,
            version_id: ctx.resolved.version_id.clone(),
            version_properties: ctx.resolved.properties.clone(),
            task_input_hash: ctx.prepared.input_hash.clone(),
            task_output_hash: canonical_digest(&task_output),
            task_input_preview: Some(finalize::input_preview(&task_input)),
            task_output_preview: Some(finalize::output_preview(&task_output, raw_output)),
            task_input,
            task_output,
            status,
            cost_usd,
            duration_seconds: Some(started.elapsed().as_secs_f64()),
            llm_completions: completions,
            tool_calls,
            tool_call_requests,
            reasoning_steps,
            error: error_body,
            metadata: ctx.metadata.clone(),
            conversation_id: ctx.conversation_id.clone(),
            from_cache: false,
            created_at: chrono::Utc::now(),
        };
        finalize::strip_private_fields(&mut run, &ctx.private_fields);

        finalize::persist_run(
            &self.storage,
            &self.events,
            ctx.tenant.tenant_uid,
            ctx.agent.agent_uid,
            ctx.cache,
            &run,
        )
        .await?;
        Ok(run)
    }

    /// Fetch one of an agent's runs.
    ///
    /// # Errors
    ///
    /// `run_not_found` when absent.
    pub async fn get_run(
        &self,
        tenant_uid: u64,
        agent_id: &str,
        run_id: Uuid,
    ) -> Result<Run, GatewayError> {
        self.storage.runs.get_run(tenant_uid, agent_id, run_id).await
    }

    /// Search an agent's runs.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn search_runs(
        &self,
        tenant_uid: u64,
        agent_id: &str,
        query: &RunSearchQuery,
    ) -> Result<Vec<Run>, GatewayError> {
        self.storage.runs.search_runs(tenant_uid, agent_id, query).await
    }

    /// Build the input for a reply: the previous run's conversation plus
    /// the new user message and tool results.
    ///
    /// # Errors
    ///
    /// `bad_request` when the previous run did not succeed or tool results
    /// answer a run that requested none.
    pub fn prepare_reply(
        &self,
        previous: &Run,
        prepared_base: &PreparedInput,
        user_message: Option<String>,
        tool_results: Vec<ToolCallResult>,
    ) -> Result<PreparedInput, GatewayError> {
        if previous.status != RunStatus::Success {
            return Err(GatewayError::bad_request("cannot reply to a non-successful run"));
        }
        let last_completion = previous.llm_completions.last().ok_or_else(|| {
            GatewayError::internal("no LLM completions found in previous run")
        })?;
        let provider = last_completion
            .provider
            .parse::<agw_models::Provider>()
            .map_err(|()| GatewayError::internal("previous run has an unknown provider"))?;
        let adapter = self
            .providers
            .adapter(provider, None)
            .ok_or_else(|| GatewayError::internal("previous run's provider is not configured"))?;

        let mut messages = adapter.standardize_messages(&last_completion.messages)?;
        if let Some(response) = &last_completion.response {
            let mut content: Vec<MessageContent> = Vec::new();
            if !response.is_empty() {
                content.push(MessageContent::Text {
                    text: response.clone(),
                });
            }
            for request in &previous.tool_call_requests {
                content.push(MessageContent::ToolCallRequest(request.clone()));
            }
            if !content.is_empty() {
                messages.push(Message {
                    role: agw_core::message::Role::Assistant,
                    content,
                });
            }
        }

        if !tool_results.is_empty() {
            if previous.tool_call_requests.is_empty() {
                return Err(GatewayError::bad_request(
                    "cannot reply with tool results to a run without tool call requests",
                ));
            }
            messages.push(Message {
                role: agw_core::message::Role::User,
                content: tool_results
                    .into_iter()
                    .map(MessageContent::ToolCallResult)
                    .collect(),
            });
        }
        if let Some(text) = user_message {
            messages.push(Message::user(text));
        }

        let serialized = serde_json::to_value(&messages)
            .map_err(|e| GatewayError::internal(format!("failed to serialize messages: {e}")))?;
        Ok(PreparedInput {
            input_hash: canonical_digest(&serialized),
            messages,
            canonical_input: previous.task_input.clone(),
            files: Vec::new(),
            used_variables: BTreeSet::new(),
            ..prepared_base.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::NoopDetectors;
    use agw_providers::adapter::ProviderConfig;
    use agw_schema::SchemaPair;
    use agw_store::MemoryTenantStore;
    use agw_core::version::VersionProperties;
    use agw_models::Provider;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn engine_with(server: &MockServer) -> Arc<RunEngine> {
        let storage = Storage::in_memory();
        let tenants = MemoryTenantStore::default();
        let mut tenant = TenantContext::new("acme", 1);
        tenant.current_credits_usd = 10.0;
        tenants.add_tenant("tok", tenant).await;
        let storage = Storage {
            tenants: Arc::new(tenants),
            ..storage
        };
        let registry = ProviderRegistry::new(
            [(
                Provider::OpenAi,
                ProviderConfig {
                    api_key: "sk".into(),
                    base_url: Some(format!("{}/v1/chat/completions", server.uri())),
                },
            )]
            .into_iter()
            .collect(),
        );
        Arc::new(RunEngine::new(
            storage,
            registry,
            ToolRegistry::default(),
            ModelCatalog::default(),
            RunEventSender::discard(),
            Arc::new(NoopDetectors),
            reqwest::Client::new(),
            EngineConfig {
                max_attempt_retries: 0,
                ..Default::default()
            },
        ))
    }

    async fn context_for(engine: &RunEngine, cache: CacheUsage) -> RunContext {
        let tenant = engine.storage().tenants.get_tenant(1).await.unwrap();
        let (agent, schema_id) = engine
            .storage()
            .agents
            .get_or_create_agent(1, "greeter", SchemaPair::raw_string_output())
            .await
            .unwrap();
        let resolved = engine
            .resolve_version(
                1,
                agent.agent_uid,
                schema_id,
                VersionReference::Properties(Box::new(VersionProperties {
                    model: Some("gpt-4o".into()),
                    ..Default::default()
                })),
            )
            .await
            .unwrap();
        let prepared = crate::input::prepare_raw_input(
            &SchemaPair::raw_string_output(),
            &resolved.properties,
            vec![Message::user("Hello, world!")],
            Default::default(),
        )
        .unwrap();
        RunContext {
            tenant,
            agent,
            schema_id,
            resolved,
            prepared,
            run_id: agw_core::ids::new_run_id(),
            cache,
            use_fallback: UseFallback::default(),
            metadata: BTreeMap::new(),
            private_fields: BTreeSet::new(),
            conversation_id: None,
        }
    }

    fn success_mock(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": content}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 100, "completion_tokens": 10},
        }))
    }

    #[tokio::test]
    async fn buffered_run_persists_exactly_one_terminal_run() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(success_mock("Hello James!"))
            .mount(&server)
            .await;
        let engine = engine_with(&server).await;
        let ctx = context_for(&engine, CacheUsage::Auto).await;
        let run_id = ctx.run_id;

        let run = engine.execute(ctx).await.unwrap();
        assert_eq!(run.id, run_id);
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.task_output, json!("Hello James!"));
        assert!(run.cost_usd.unwrap() > 0.0);
        assert_eq!(run.task_input_preview.as_deref(), Some("User: Hello, world!"));
        assert_eq!(run.task_output_preview.as_deref(), Some("Assistant: Hello James!"));

        let stored = engine.get_run(1, "greeter", run_id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn second_identical_run_is_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(success_mock("cached answer"))
            .expect(1)
            .mount(&server)
            .await;
        let engine = engine_with(&server).await;

        let first = engine
            .execute(context_for(&engine, CacheUsage::Auto).await)
            .await
            .unwrap();
        let second = engine
            .execute(context_for(&engine, CacheUsage::Always).await)
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert!(second.from_cache);
    }

    #[tokio::test]
    async fn never_cache_always_calls_the_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(success_mock("again"))
            .expect(2)
            .mount(&server)
            .await;
        let engine = engine_with(&server).await;
        engine
            .execute(context_for(&engine, CacheUsage::Never).await)
            .await
            .unwrap();
        engine
            .execute(context_for(&engine, CacheUsage::Never).await)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failed_runs_are_persisted_with_the_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                r#"{"error": {"message": "maximum context length exceeded"}}"#,
            ))
            .mount(&server)
            .await;
        let engine = engine_with(&server).await;
        let ctx = context_for(&engine, CacheUsage::Auto).await;
        let run_id = ctx.run_id;

        let err = engine.execute(ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::MaxTokensExceeded);
        assert_eq!(err.run_id.as_deref(), Some(run_id.to_string().as_str()));

        let stored = engine.get_run(1, "greeter", run_id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Failure);
        assert_eq!(stored.error.as_ref().unwrap().code, "max_tokens_exceeded");
    }

    #[tokio::test]
    async fn streaming_yields_chunks_then_final() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\": [{\"delta\": {\"content\": \"Hi\"}}]}\n\n",
            "data: {\"choices\": [{\"delta\": {\"content\": \"!\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        let engine = engine_with(&server).await;
        let ctx = context_for(&engine, CacheUsage::Never).await;

        let mut rx = engine.clone().execute_stream(ctx);
        let mut chunks = Vec::new();
        let mut final_run = None;
        while let Some(item) = rx.recv().await {
            match item {
                RunStreamItem::Chunk(chunk) => chunks.push(chunk.task_output),
                RunStreamItem::Final(run) => final_run = Some(run),
                RunStreamItem::Error(err) => panic!("unexpected error: {err:?}"),
            }
        }
        assert_eq!(chunks, vec![json!("Hi"), json!("Hi!")]);
        let run = final_run.unwrap();
        assert_eq!(run.task_output, json!("Hi!"));
        assert_eq!(run.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn streaming_and_buffered_agree_on_output_and_cost() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\": [{\"delta\": {\"content\": \"same\"}}]}\n\n",
            "data: {\"choices\": [], \"usage\": {\"prompt_tokens\": 100, \"completion_tokens\": 10}}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        let engine = engine_with(&server).await;

        let ctx = context_for(&engine, CacheUsage::Never).await;
        let mut rx = engine.clone().execute_stream(ctx);
        let mut streamed = None;
        while let Some(item) = rx.recv().await {
            if let RunStreamItem::Final(run) = item {
                streamed = Some(run);
            }
        }
        let streamed = streamed.unwrap();

        let server2 = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(success_mock("same"))
            .mount(&server2)
            .await;
        let engine2 = engine_with(&server2).await;
        let buffered = engine2
            .execute(context_for(&engine2, CacheUsage::Never).await)
            .await
            .unwrap();

        assert_eq!(streamed.task_output, buffered.task_output);
        let diff = (streamed.cost_usd.unwrap() - buffered.cost_usd.unwrap()).abs();
        assert!(diff < 1e-9);
    }

    #[tokio::test]
    async fn reply_extends_the_previous_conversation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(success_mock("Hello James!"))
            .mount(&server)
            .await;
        let engine = engine_with(&server).await;
        let ctx = context_for(&engine, CacheUsage::Never).await;
        let prepared_base = ctx.prepared.clone();
        let run = engine.execute(ctx).await.unwrap();

        let reply = engine
            .prepare_reply(&run, &prepared_base, Some("And again?".into()), vec![])
            .unwrap();
        // previous user turn + assistant turn + new user turn
        assert_eq!(reply.messages.len(), 3);
        assert_eq!(reply.messages[1].text(), "Hello James!");
        assert_eq!(reply.messages[2].text(), "And again?");
    }

    #[tokio::test]
    async fn reply_to_failed_run_is_rejected() {
        let server = MockServer::start().await;
        let engine = engine_with(&server).await;
        let ctx = context_for(&engine, CacheUsage::Never).await;
        let prepared = ctx.prepared.clone();
        let mut run = Run {
            id: agw_core::ids::new_run_id(),
            agent_id: "greeter".into(),
            schema_id: 1,
            version_id: "0".repeat(32),
            version_properties: Default::default(),
            task_input: json!({}),
            task_input_hash: String::new(),
            task_output: json!({}),
            task_output_hash: String::new(),
            task_input_preview: None,
            task_output_preview: None,
            status: RunStatus::Failure,
            cost_usd: None,
            duration_seconds: None,
            llm_completions: vec![],
            tool_calls: vec![],
            tool_call_requests: vec![],
            reasoning_steps: vec![],
            error: None,
            metadata: Default::default(),
            conversation_id: None,
            from_cache: false,
            created_at: chrono::Utc::now(),
        };
        run.status = RunStatus::Failure;
        let err = engine
            .prepare_reply(&run, &prepared, Some("hi".into()), vec![])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRequest);
    }
}
