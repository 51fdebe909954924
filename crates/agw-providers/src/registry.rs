// SPDX-License-Identifier: MIT OR Apache-2.0
//! The adapter registry.
//!
//! Connection settings are an explicit context object handed in at
//! construction, never read from process-global state past the binary's
//! entry point. Tenants with credential overrides get a fresh adapter built
//! around their own key.

use std::collections::BTreeMap;
use std::sync::Arc;

use agw_core::tenant::ProviderSettings;
use agw_models::Provider;

use crate::adapter::{ProviderAdapter, ProviderConfig};
use crate::anthropic::AnthropicAdapter;
use crate::bedrock::BedrockAdapter;
use crate::cerebras::CerebrasAdapter;
use crate::google::GoogleAdapter;
use crate::mistral::MistralAdapter;
use crate::openai::OpenAiAdapter;
use crate::xai::XAiAdapter;

/// Environment variable carrying each provider's API key.
const ENV_KEYS: &[(Provider, &str)] = &[
    (Provider::OpenAi, "OPENAI_API_KEY"),
    (Provider::Anthropic, "ANTHROPIC_API_KEY"),
    (Provider::Bedrock, "AWS_BEDROCK_API_KEY"),
    (Provider::Mistral, "MISTRAL_API_KEY"),
    (Provider::Google, "GEMINI_API_KEY"),
    (Provider::XAi, "XAI_API_KEY"),
    (Provider::Cerebras, "CEREBRAS_API_KEY"),
];

/// Holds one configured adapter per enabled provider.
#[derive(Clone)]
pub struct ProviderRegistry {
    adapters: BTreeMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Build the adapter for one provider from its config.
#[must_use]
pub fn build_adapter(provider: Provider, config: ProviderConfig) -> Arc<dyn ProviderAdapter> {
    match provider {
        Provider::OpenAi => Arc::new(OpenAiAdapter::new(config)),
        Provider::Anthropic => Arc::new(AnthropicAdapter::new(config)),
        Provider::Bedrock => Arc::new(BedrockAdapter::new(config)),
        Provider::Mistral => Arc::new(MistralAdapter::new(config)),
        Provider::Google => Arc::new(GoogleAdapter::new(config)),
        Provider::XAi => Arc::new(XAiAdapter::new(config)),
        Provider::Cerebras => Arc::new(CerebrasAdapter::new(config)),
    }
}

impl ProviderRegistry {
    /// Build a registry from explicit per-provider configs.
    #[must_use]
    pub fn new(configs: BTreeMap<Provider, ProviderConfig>) -> Self {
        let adapters = configs
            .into_iter()
            .map(|(provider, config)| (provider, build_adapter(provider, config)))
            .collect();
        Self { adapters }
    }

    /// Build a registry from the conventional environment variables,
    /// skipping providers with no key set. Intended for the server binary.
    #[must_use]
    pub fn from_env() -> Self {
        let mut configs = BTreeMap::new();
        for (provider, var) in ENV_KEYS {
            if let Ok(key) = std::env::var(var) {
                if !key.is_empty() {
                    configs.insert(*provider, ProviderConfig::new(key));
                }
            }
        }
        Self::new(configs)
    }

    /// The adapter for a provider, honoring a tenant credential override.
    #[must_use]
    pub fn adapter(
        &self,
        provider: Provider,
        override_settings: Option<&ProviderSettings>,
    ) -> Option<Arc<dyn ProviderAdapter>> {
        if let Some(settings) = override_settings {
            return Some(build_adapter(
                provider,
                ProviderConfig {
                    api_key: settings.api_key.clone(),
                    base_url: settings.url.clone(),
                },
            ));
        }
        self.adapters.get(&provider).cloned()
    }

    /// Providers with a configured adapter.
    #[must_use]
    pub fn enabled(&self) -> Vec<Provider> {
        self.adapters.keys().copied().collect()
    }
}
