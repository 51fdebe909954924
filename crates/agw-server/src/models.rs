// SPDX-License-Identifier: MIT OR Apache-2.0
//! The model listing.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// One model row in the listing.
#[derive(Debug, Serialize)]
pub struct ModelRow {
    /// Model id, usable in the `model` field.
    pub id: String,
    /// Always `"model"`.
    pub object: &'static str,
    /// Human-readable name.
    pub display_name: String,
    /// Providers able to serve the model.
    pub providers: Vec<String>,
    /// Whether the model accepts image input.
    pub supports_images: bool,
    /// Prompt price per million tokens for the preferred provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_usd_per_million: Option<f64>,
    /// Completion price per million tokens for the preferred provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_usd_per_million: Option<f64>,
}

/// Response envelope matching the OpenAI list shape.
#[derive(Debug, Serialize)]
pub struct ListModelsResponse {
    /// Always `"list"`.
    pub object: &'static str,
    /// The models.
    pub data: Vec<ModelRow>,
}

/// `GET /v1/models`.
pub async fn list_models(State(state): State<AppState>) -> Json<ListModelsResponse> {
    let data = state
        .engine
        .catalog()
        .all()
        .map(|model| {
            let preferred = model.providers.first().and_then(|p| model.pricing.get(p));
            ModelRow {
                id: model.id.clone(),
                object: "model",
                display_name: model.display_name.clone(),
                providers: model.providers.iter().map(|p| p.as_str().to_string()).collect(),
                supports_images: model.supports_images,
                prompt_usd_per_million: preferred.map(|p| p.prompt_usd_per_million),
                completion_usd_per_million: preferred.map(|p| p.completion_usd_per_million),
            }
        })
        .collect();
    Json(ListModelsResponse {
        object: "list",
        data,
    })
}
