// SPDX-License-Identifier: MIT OR Apache-2.0
//! Version listing, saving, and deployment.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use agw_core::error::GatewayError;
use agw_core::version::{SavedVersion, VersionEnvironment, VersionProperties};

use crate::auth::AuthedTenant;
use crate::error::ApiResult;
use crate::state::AppState;

/// One minor version row.
#[derive(Debug, Serialize)]
pub struct MinorVersion {
    /// Version hash id.
    pub id: String,
    /// Minor number.
    pub minor: u32,
    /// Model of the version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// The full properties.
    pub properties: VersionProperties,
    /// Environments this version is deployed to.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deployments: Vec<VersionEnvironment>,
}

/// Versions grouped under one major.
#[derive(Debug, Serialize)]
pub struct MajorVersionGroup {
    /// Major number.
    pub major: u32,
    /// Minors under this major, ascending.
    pub minors: Vec<MinorVersion>,
}

/// Response for the version listing.
#[derive(Debug, Serialize)]
pub struct ListVersionsResponse {
    /// Saved versions grouped by major, ascending.
    pub items: Vec<MajorVersionGroup>,
}

/// `GET /v1/{tenant}/agents/{agent_id}/versions` — saved versions grouped
/// by major.
///
/// # Errors
///
/// `agent_not_found` for unknown agents.
pub async fn list_versions(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Path((_tenant_slug, agent_id)): Path<(String, String)>,
) -> ApiResult<Json<ListVersionsResponse>> {
    let agent = state
        .engine
        .storage()
        .agents
        .get_agent(tenant.tenant_uid, &agent_id)
        .await?;
    let versions = state
        .engine
        .storage()
        .versions
        .list_versions(tenant.tenant_uid, agent.agent_uid)
        .await?;

    let mut grouped: BTreeMap<u32, Vec<MinorVersion>> = BTreeMap::new();
    for version in versions {
        let Some(semver) = version.semver else {
            continue;
        };
        let deployments = state
            .engine
            .storage()
            .deployments
            .deployments_for_version(tenant.tenant_uid, agent.agent_uid, &version.id)
            .await?;
        grouped.entry(semver.major).or_default().push(MinorVersion {
            id: version.id.clone(),
            minor: semver.minor,
            model: version.properties.model.clone(),
            properties: version.properties,
            deployments,
        });
    }

    let items = grouped
        .into_iter()
        .map(|(major, mut minors)| {
            minors.sort_by_key(|m| m.minor);
            MajorVersionGroup { major, minors }
        })
        .collect();
    Ok(Json(ListVersionsResponse { items }))
}

/// Body for saving a version.
#[derive(Debug, Deserialize)]
pub struct SaveVersionRequest {
    /// Hash id of the version to save.
    pub version_id: String,
}

/// `POST /v1/{tenant}/agents/{agent_id}/versions` — assign a semver.
///
/// # Errors
///
/// `version_not_found` for unknown ids.
pub async fn save_version(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Path((_tenant_slug, agent_id)): Path<(String, String)>,
    Json(body): Json<SaveVersionRequest>,
) -> ApiResult<Json<SavedVersion>> {
    let agent = state
        .engine
        .storage()
        .agents
        .get_agent(tenant.tenant_uid, &agent_id)
        .await?;
    let saved = state
        .engine
        .storage()
        .versions
        .save_version(tenant.tenant_uid, agent.agent_uid, &body.version_id)
        .await?;
    Ok(Json(saved))
}

/// Body for a deploy call.
#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    /// Target environment.
    pub environment: VersionEnvironment,
}

/// Response for a deploy call.
#[derive(Debug, Serialize)]
pub struct DeployResponse {
    /// Deployed version id.
    pub version_id: String,
    /// Target environment.
    pub environment: VersionEnvironment,
    /// Schema the deployment applies to.
    pub schema_id: u32,
}

/// `POST /v1/{tenant}/agents/{agent_id}/versions/{version_id}/deploy`.
///
/// # Errors
///
/// `version_not_found` when the version does not exist.
pub async fn deploy_version(
    State(state): State<AppState>,
    AuthedTenant(tenant): AuthedTenant,
    Path((_tenant_slug, agent_id, version_id)): Path<(String, String, String)>,
    Json(body): Json<DeployRequest>,
) -> ApiResult<Json<DeployResponse>> {
    let agent = state
        .engine
        .storage()
        .agents
        .get_agent(tenant.tenant_uid, &agent_id)
        .await?;
    // Deploying an unknown version is a 404, not a silent pointer.
    let version = state
        .engine
        .storage()
        .versions
        .get_version(tenant.tenant_uid, agent.agent_uid, &version_id)
        .await?;
    state
        .engine
        .storage()
        .deployments
        .deploy(
            tenant.tenant_uid,
            agent.agent_uid,
            version.schema_id,
            body.environment,
            version.id.clone(),
        )
        .await?;
    Ok(Json(DeployResponse {
        version_id: version.id,
        environment: body.environment,
        schema_id: version.schema_id,
    }))
}
