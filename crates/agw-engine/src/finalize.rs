// SPDX-License-Identifier: MIT OR Apache-2.0
//! Run finalization.
//!
//! After a run reaches a terminal state: hoist inline file data to object
//! storage, price every completion, compute previews, strip private fields,
//! persist, record the cache entry, decrement tenant credits, and emit the
//! run-created event. Only then does the run become visible to readers.

use base64::Engine as _;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use agw_core::error::GatewayError;
use agw_core::events::{RunCreatedEvent, RunEventSender};
use agw_core::preview::{compute_preview, message_preview};
use agw_core::run::{CacheUsage, LlmCompletion, Run, RunStatus};
use agw_models::{compute_cost, ModelCatalog, Provider};
use agw_store::{CacheKey, ObjectStore, Storage};

use crate::keypath::remove_dotted_path;

/// Hoist every inline file payload in `value` to object storage, replacing
/// `data` with a `storage_url`.
pub async fn offload_files(
    objects: &Arc<dyn ObjectStore>,
    tenant_uid: u64,
    value: &mut Value,
) -> Result<(), GatewayError> {
    let mut sites = Vec::new();
    collect_file_sites(value, &mut Vec::new(), &mut sites);

    for (path, data, content_type) in sites {
        let bytes = match base64::engine::general_purpose::STANDARD.decode(&data) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(error = %err, "file data is not valid base64; leaving inline");
                continue;
            }
        };
        let url = objects
            .store(tenant_uid, &bytes, content_type.as_deref())
            .await?;
        if let Some(Value::Object(map)) = node_at_path_mut(value, &path) {
            map.remove("data");
            map.insert("storage_url".to_string(), Value::String(url));
        }
    }
    Ok(())
}

/// Collect the key paths of inline file payloads: objects carrying a
/// string `data` next to a `content_type`, `url`, or `format` key.
fn collect_file_sites(
    value: &Value,
    path: &mut Vec<Value>,
    out: &mut Vec<(Vec<Value>, String, Option<String>)>,
) {
    match value {
        Value::Object(map) => {
            let is_file = map.get("data").is_some_and(Value::is_string)
                && (map.contains_key("content_type")
                    || map.contains_key("url")
                    || map.contains_key("format"));
            if is_file {
                let data = map
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let content_type = map
                    .get("content_type")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                out.push((path.clone(), data, content_type));
                return;
            }
            for (key, child) in map {
                path.push(Value::String(key.clone()));
                collect_file_sites(child, path, out);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                path.push(Value::from(idx));
                collect_file_sites(item, path, out);
                path.pop();
            }
        }
        _ => {}
    }
}

/// The mutable node at a key path.
fn node_at_path_mut<'a>(value: &'a mut Value, path: &[Value]) -> Option<&'a mut Value> {
    let mut current = value;
    for segment in path {
        current = match (segment, current) {
            (Value::String(key), Value::Object(map)) => map.get_mut(key)?,
            (Value::Number(idx), Value::Array(items)) => {
                items.get_mut(idx.as_u64()? as usize)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Price every completion from the catalog and return the run total.
/// Completions on unpriceable `(provider, model)` pairs are left uncosted
/// with a warning.
pub fn price_completions(catalog: &ModelCatalog, completions: &mut [LlmCompletion]) -> Option<f64> {
    let mut total: Option<f64> = None;
    for completion in completions.iter_mut() {
        let Ok(provider) = completion.provider.parse::<Provider>() else {
            continue;
        };
        match catalog.pricing(provider, &completion.model) {
            Some(pricing) => {
                let cost = compute_cost(&completion.usage, pricing);
                completion.cost_usd = Some(cost);
                total = Some(total.unwrap_or(0.0) + cost);
            }
            None => {
                tracing::warn!(
                    provider = %completion.provider,
                    model = %completion.model,
                    "pricing table has no entry; run is unpriceable"
                );
            }
        }
    }
    total
}

/// Compute the input preview of a canonical input record.
#[must_use]
pub fn input_preview(canonical_input: &Value) -> String {
    if let Some(messages) = canonical_input.get("messages").and_then(Value::as_array) {
        if let Some(last) = messages.last() {
            let role = last.get("role").and_then(Value::as_str).unwrap_or("user");
            let text = last
                .get("content")
                .and_then(Value::as_array)
                .map(|blocks| {
                    blocks
                        .iter()
                        .filter_map(|b| b.get("text").and_then(Value::as_str))
                        .collect::<String>()
                })
                .unwrap_or_default();
            return message_preview(role, &text);
        }
    }
    compute_preview(canonical_input)
}

/// Compute the output preview.
#[must_use]
pub fn output_preview(task_output: &Value, raw_message_output: bool) -> String {
    if raw_message_output {
        if let Value::String(text) = task_output {
            return message_preview("assistant", text);
        }
    }
    compute_preview(task_output)
}

/// Strip private subpaths from the stored record. `task_input` and
/// `task_output` (or dotted subpaths under them) disappear entirely.
pub fn strip_private_fields(run: &mut Run, private_fields: &BTreeSet<String>) {
    for field in private_fields {
        match field.split_once('.') {
            None if field == "task_input" => {
                run.task_input = Value::Object(Default::default());
                run.task_input_preview = None;
            }
            None if field == "task_output" => {
                run.task_output = Value::Object(Default::default());
                run.task_output_preview = None;
            }
            Some(("task_input", rest)) => remove_dotted_path(&mut run.task_input, rest),
            Some(("task_output", rest)) => remove_dotted_path(&mut run.task_output, rest),
            _ => {}
        }
    }
}

/// Persist a terminal run and perform the side effects that come with it.
pub async fn persist_run(
    storage: &Storage,
    events: &RunEventSender,
    tenant_uid: u64,
    agent_uid: u64,
    cache: CacheUsage,
    run: &Run,
) -> Result<(), GatewayError> {
    storage.runs.insert_run(tenant_uid, run.clone()).await?;

    if run.status == RunStatus::Success && cache != CacheUsage::Never {
        storage
            .cache
            .insert_if_absent(
                tenant_uid,
                CacheKey {
                    agent_uid,
                    schema_id: run.schema_id,
                    version_id: run.version_id.clone(),
                    task_input_hash: run.task_input_hash.clone(),
                },
                run.id,
            )
            .await?;
    }

    if let Some(cost) = run.cost_usd {
        if cost > 0.0 {
            storage.tenants.decrement_credits(tenant_uid, cost).await?;
        }
    }

    events.send(RunCreatedEvent {
        tenant_uid,
        agent_id: run.agent_id.clone(),
        schema_id: run.schema_id,
        version_id: run.version_id.clone(),
        run_id: run.id,
        status: run.status,
        cost_usd: run.cost_usd,
        from_cache: run.from_cache,
    });
    Ok(())
}
