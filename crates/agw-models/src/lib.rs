// SPDX-License-Identifier: MIT OR Apache-2.0
//! agw-models
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The model catalog.
//!
//! One table drives provider selection, fallback planning, and cost
//! accounting: every known model lists the providers able to serve it (in
//! preference order), a capability bucket used when picking fallback models,
//! per-provider pricing, and deprecation redirects.

/// Cost computation from usage and pricing.
pub mod cost;
/// The provider enumeration.
pub mod provider;

pub use cost::compute_cost;
pub use provider::Provider;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use agw_core::error::GatewayError;

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// USD prices per million tokens for one `(provider, model)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    /// Prompt tokens.
    pub prompt_usd_per_million: f64,
    /// Completion tokens (reasoning tokens bill at this rate too).
    pub completion_usd_per_million: f64,
    /// Prompt tokens served from the provider cache, when discounted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_usd_per_million: Option<f64>,
    /// Audio prompt tokens, when the model accepts audio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_usd_per_million: Option<f64>,
}

impl Pricing {
    const fn new(prompt: f64, completion: f64) -> Self {
        Self {
            prompt_usd_per_million: prompt,
            completion_usd_per_million: completion,
            cached_usd_per_million: None,
            audio_usd_per_million: None,
        }
    }

    const fn with_cached(mut self, cached: f64) -> Self {
        self.cached_usd_per_million = Some(cached);
        self
    }
}

// ---------------------------------------------------------------------------
// Model data
// ---------------------------------------------------------------------------

/// Everything the gateway knows about one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelData {
    /// Canonical model id.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Providers able to serve the model, in preference order.
    pub providers: Vec<Provider>,
    /// Capability bucket; fallback picks models with `bucket >= this`.
    pub quality_bucket: u8,
    /// Hard ceiling on completion tokens.
    pub max_output_tokens: u32,
    /// Whether the model accepts image inputs.
    pub supports_images: bool,
    /// Whether the model accepts audio inputs.
    pub supports_audio: bool,
    /// Whether provider-side schema-guided decoding is available.
    pub supports_structured_generation: bool,
    /// Per-provider pricing.
    pub pricing: BTreeMap<Provider, Pricing>,
}

/// Redirect for a model id that has been retired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeprecatedModel {
    /// The model to run instead.
    pub replacement: String,
    /// Reasoning effort implied by the retired id, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// The model catalog: known models plus deprecation redirects.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelData>,
    deprecated: BTreeMap<String, DeprecatedModel>,
}

impl ModelCatalog {
    /// Look up a model, following deprecation redirects.
    ///
    /// Returns the canonical model data and the reasoning effort implied by
    /// a retired id, when any.
    ///
    /// # Errors
    ///
    /// `invalid_run_options` when the id is unknown.
    pub fn resolve(&self, model: &str) -> Result<(&ModelData, Option<String>), GatewayError> {
        if let Some(data) = self.models.get(model) {
            return Ok((data, None));
        }
        if let Some(dep) = self.deprecated.get(model) {
            let data = self.models.get(&dep.replacement).ok_or_else(|| {
                GatewayError::internal(format!(
                    "deprecated model {model} points at unknown replacement {}",
                    dep.replacement
                ))
            })?;
            return Ok((data, dep.reasoning_effort.clone()));
        }
        Err(GatewayError::invalid_run_options(format!(
            "Model {model} is not valid"
        )))
    }

    /// Whether the provider string names a known provider.
    ///
    /// # Errors
    ///
    /// `invalid_run_options` when it does not.
    pub fn resolve_provider(&self, provider: &str) -> Result<Provider, GatewayError> {
        provider.parse().map_err(|()| {
            GatewayError::invalid_run_options(format!("Provider {provider} is not valid"))
        })
    }

    /// Ordered provider attempts for a model: the pinned provider first when
    /// given, then the catalog preference order.
    #[must_use]
    pub fn providers_for(&self, data: &ModelData, pinned: Option<Provider>) -> Vec<Provider> {
        let mut out = Vec::new();
        if let Some(p) = pinned {
            if data.providers.contains(&p) {
                out.push(p);
            }
        }
        for p in &data.providers {
            if !out.contains(p) {
                out.push(*p);
            }
        }
        out
    }

    /// Fallback model candidates: same-or-better bucket, cheapest first,
    /// excluding the failed model.
    #[must_use]
    pub fn fallback_models(&self, failed: &ModelData) -> Vec<&ModelData> {
        let mut candidates: Vec<&ModelData> = self
            .models
            .values()
            .filter(|m| m.id != failed.id && m.quality_bucket >= failed.quality_bucket)
            .collect();
        candidates.sort_by(|a, b| {
            let cost = |m: &ModelData| {
                m.pricing
                    .values()
                    .map(|p| p.prompt_usd_per_million + p.completion_usd_per_million)
                    .fold(f64::INFINITY, f64::min)
            };
            cost(a).total_cmp(&cost(b)).then_with(|| a.id.cmp(&b.id))
        });
        candidates
    }

    /// Pricing for a `(provider, model)` pair.
    #[must_use]
    pub fn pricing(&self, provider: Provider, model: &str) -> Option<&Pricing> {
        self.models.get(model)?.pricing.get(&provider)
    }

    /// All models, for the listing endpoint.
    #[must_use]
    pub fn all(&self) -> impl Iterator<Item = &ModelData> {
        self.models.values()
    }

    /// Whether the id is known, deprecations included.
    #[must_use]
    pub fn contains(&self, model: &str) -> bool {
        self.models.contains_key(model) || self.deprecated.contains_key(model)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        let mut insert = |m: ModelData| {
            models.insert(m.id.clone(), m);
        };

        insert(ModelData {
            id: "gpt-4o".into(),
            display_name: "GPT-4o".into(),
            providers: vec![Provider::OpenAi],
            quality_bucket: 3,
            max_output_tokens: 16_384,
            supports_images: true,
            supports_audio: false,
            supports_structured_generation: true,
            pricing: BTreeMap::from([(Provider::OpenAi, Pricing::new(2.5, 10.0).with_cached(1.25))]),
        });
        insert(ModelData {
            id: "gpt-4o-mini".into(),
            display_name: "GPT-4o mini".into(),
            providers: vec![Provider::OpenAi],
            quality_bucket: 2,
            max_output_tokens: 16_384,
            supports_images: true,
            supports_audio: false,
            supports_structured_generation: true,
            pricing: BTreeMap::from([(Provider::OpenAi, Pricing::new(0.15, 0.6).with_cached(0.075))]),
        });
        insert(ModelData {
            id: "gpt-4.1".into(),
            display_name: "GPT-4.1".into(),
            providers: vec![Provider::OpenAi],
            quality_bucket: 4,
            max_output_tokens: 32_768,
            supports_images: true,
            supports_audio: false,
            supports_structured_generation: true,
            pricing: BTreeMap::from([(Provider::OpenAi, Pricing::new(2.0, 8.0).with_cached(0.5))]),
        });
        insert(ModelData {
            id: "claude-3-5-sonnet-20241022".into(),
            display_name: "Claude 3.5 Sonnet".into(),
            providers: vec![Provider::Anthropic, Provider::Bedrock],
            quality_bucket: 3,
            max_output_tokens: 8_192,
            supports_images: true,
            supports_audio: false,
            supports_structured_generation: false,
            pricing: BTreeMap::from([
                (Provider::Anthropic, Pricing::new(3.0, 15.0).with_cached(0.3)),
                (Provider::Bedrock, Pricing::new(3.0, 15.0)),
            ]),
        });
        insert(ModelData {
            id: "claude-3-7-sonnet-20250219".into(),
            display_name: "Claude 3.7 Sonnet".into(),
            providers: vec![Provider::Anthropic, Provider::Bedrock],
            quality_bucket: 4,
            max_output_tokens: 64_000,
            supports_images: true,
            supports_audio: false,
            supports_structured_generation: false,
            pricing: BTreeMap::from([
                (Provider::Anthropic, Pricing::new(3.0, 15.0).with_cached(0.3)),
                (Provider::Bedrock, Pricing::new(3.0, 15.0)),
            ]),
        });
        insert(ModelData {
            id: "mistral-large-latest".into(),
            display_name: "Mistral Large".into(),
            providers: vec![Provider::Mistral],
            quality_bucket: 3,
            max_output_tokens: 8_192,
            supports_images: false,
            supports_audio: false,
            supports_structured_generation: true,
            pricing: BTreeMap::from([(Provider::Mistral, Pricing::new(2.0, 6.0))]),
        });
        insert(ModelData {
            id: "gemini-2.0-flash".into(),
            display_name: "Gemini 2.0 Flash".into(),
            providers: vec![Provider::Google],
            quality_bucket: 2,
            max_output_tokens: 8_192,
            supports_images: true,
            supports_audio: true,
            supports_structured_generation: true,
            pricing: BTreeMap::from([(Provider::Google, Pricing {
                prompt_usd_per_million: 0.1,
                completion_usd_per_million: 0.4,
                cached_usd_per_million: Some(0.025),
                audio_usd_per_million: Some(0.7),
            })]),
        });
        insert(ModelData {
            id: "grok-3".into(),
            display_name: "Grok 3".into(),
            providers: vec![Provider::XAi],
            quality_bucket: 3,
            max_output_tokens: 16_384,
            supports_images: false,
            supports_audio: false,
            supports_structured_generation: true,
            pricing: BTreeMap::from([(Provider::XAi, Pricing::new(3.0, 15.0))]),
        });
        insert(ModelData {
            id: "llama-3.3-70b".into(),
            display_name: "Llama 3.3 70B".into(),
            providers: vec![Provider::Cerebras],
            quality_bucket: 2,
            max_output_tokens: 8_192,
            supports_images: false,
            supports_audio: false,
            supports_structured_generation: false,
            pricing: BTreeMap::from([(Provider::Cerebras, Pricing::new(0.85, 1.2))]),
        });

        let deprecated = BTreeMap::from([
            (
                "gpt-4o-latest".to_string(),
                DeprecatedModel {
                    replacement: "gpt-4o".into(),
                    reasoning_effort: None,
                },
            ),
            (
                "claude-3-5-sonnet-latest".to_string(),
                DeprecatedModel {
                    replacement: "claude-3-5-sonnet-20241022".into(),
                    reasoning_effort: None,
                },
            ),
        ]);

        Self { models, deprecated }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_known_model() {
        let catalog = ModelCatalog::default();
        let (data, effort) = catalog.resolve("gpt-4o").unwrap();
        assert_eq!(data.id, "gpt-4o");
        assert!(effort.is_none());
    }

    #[test]
    fn resolve_follows_deprecations() {
        let catalog = ModelCatalog::default();
        let (data, _) = catalog.resolve("gpt-4o-latest").unwrap();
        assert_eq!(data.id, "gpt-4o");
    }

    #[test]
    fn unknown_model_is_invalid_run_options() {
        let catalog = ModelCatalog::default();
        let err = catalog.resolve("gpt-99").unwrap_err();
        assert_eq!(err.kind, agw_core::error::ErrorKind::InvalidRunOptions);
    }

    #[test]
    fn pinned_provider_goes_first() {
        let catalog = ModelCatalog::default();
        let (claude, _) = catalog.resolve("claude-3-5-sonnet-20241022").unwrap();
        let order = catalog.providers_for(claude, Some(Provider::Bedrock));
        assert_eq!(order, vec![Provider::Bedrock, Provider::Anthropic]);
        let order = catalog.providers_for(claude, None);
        assert_eq!(order, vec![Provider::Anthropic, Provider::Bedrock]);
    }

    #[test]
    fn fallback_models_are_same_or_better_bucket() {
        let catalog = ModelCatalog::default();
        let (claude, _) = catalog.resolve("claude-3-5-sonnet-20241022").unwrap();
        let fallbacks = catalog.fallback_models(claude);
        assert!(!fallbacks.is_empty());
        assert!(fallbacks.iter().all(|m| m.quality_bucket >= claude.quality_bucket));
        assert!(fallbacks.iter().all(|m| m.id != claude.id));
    }

    #[test]
    fn pricing_is_per_provider() {
        let catalog = ModelCatalog::default();
        assert!(catalog.pricing(Provider::Anthropic, "claude-3-5-sonnet-20241022").is_some());
        assert!(catalog.pricing(Provider::OpenAi, "claude-3-5-sonnet-20241022").is_none());
    }
}
