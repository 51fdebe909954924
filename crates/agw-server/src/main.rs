// SPDX-License-Identifier: MIT OR Apache-2.0
//! The gateway server binary.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use agw_core::events::RunEventSender;
use agw_engine::{EngineConfig, NoopDetectors, RunEngine};
use agw_models::ModelCatalog;
use agw_providers::ProviderRegistry;
use agw_server::{router, AppState, FeedbackSigner};
use agw_store::Storage;
use agw_tools::{ToolConfig, ToolRegistry};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let http = reqwest::Client::new();
    let providers = ProviderRegistry::from_env();
    tracing::info!(providers = ?providers.enabled(), "configured providers");

    let tools = ToolRegistry::new(
        http.clone(),
        &ToolConfig {
            serper_api_key: std::env::var("SERPER_API_KEY").ok(),
            perplexity_api_key: std::env::var("PERPLEXITY_API_KEY").ok(),
        },
    );

    let (events, mut event_rx) = RunEventSender::channel();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            tracing::info!(
                run_id = %event.run_id,
                agent = %event.agent_id,
                status = ?event.status,
                cost_usd = ?event.cost_usd,
                from_cache = event.from_cache,
                "run completed"
            );
        }
    });

    let engine = Arc::new(RunEngine::new(
        Storage::in_memory(),
        providers,
        tools,
        ModelCatalog::default(),
        events,
        Arc::new(NoopDetectors),
        http,
        EngineConfig::default(),
    ));

    let secret = std::env::var("FEEDBACK_TOKEN_SECRET").unwrap_or_else(|_| "dev-secret".into());
    let base_url =
        std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".into());
    let state = AppState::new(engine, FeedbackSigner::new(secret.into_bytes()), base_url);

    let addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());
    tracing::info!(%addr, "starting agent gateway");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, %addr, "failed to bind");
            return;
        }
    };
    if let Err(err) = axum::serve(listener, router(state)).await {
        tracing::error!(error = %err, "server exited");
    }
}
