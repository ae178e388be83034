//! Provider adapters and registry

pub mod adapter;
pub mod anthropic;
pub mod mock;
pub mod openai;

pub use adapter::{ChunkStream, ProviderAdapter};
pub use anthropic::AnthropicAdapter;
pub use mock::{MockAdapter, MockRule, RuleAction, RuleMatcher};
pub use openai::OpenAIAdapter;

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::core::types::ProviderType;
use crate::utils::error::Result;

/// Lazily constructs and caches one adapter per provider
///
/// Explicitly registered adapters (tests, custom dialects) take precedence
/// over lazily built ones and are never replaced.
pub struct ProviderRegistry {
    config: Arc<GatewayConfig>,
    adapters: DashMap<ProviderType, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Create a registry over the gateway configuration
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self {
            config,
            adapters: DashMap::new(),
        }
    }

    /// Register an adapter explicitly
    pub fn register(&self, adapter: Arc<dyn ProviderAdapter>) {
        let provider = adapter.provider_type();
        debug!(%provider, "adapter registered");
        self.adapters.insert(provider, adapter);
    }

    /// Adapter for `provider`, built on first use
    pub fn get(&self, provider: &ProviderType) -> Result<Arc<dyn ProviderAdapter>> {
        if let Some(adapter) = self.adapters.get(provider) {
            return Ok(adapter.clone());
        }
        let section = self.config.provider_or_default(provider);
        let adapter: Arc<dyn ProviderAdapter> = match provider {
            ProviderType::Anthropic => Arc::new(AnthropicAdapter::new(&section)?),
            ProviderType::Mock => Arc::new(MockAdapter::new(Vec::new())),
            _ => Arc::new(OpenAIAdapter::new(provider.clone(), &section)?),
        };
        // First insertion wins under concurrent construction
        let entry = self
            .adapters
            .entry(provider.clone())
            .or_insert(adapter);
        Ok(entry.clone())
    }
}
