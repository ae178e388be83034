//! Gateway configuration
//!
//! One serde-backed tree: per-provider sections (network, retry,
//! concurrency, keys with `env.` indirection), the semantic cache
//! section, and the logger section. Loaded from YAML or built in code,
//! then validated as a whole before the gateway starts.

pub mod cache;
pub mod logging;
pub mod provider;

pub use cache::{CacheType, SemanticCacheConfig};
pub use logging::LoggerConfig;
pub use provider::{KeyConfig, KeyExtra, NetworkConfig, ProviderConfig, RetryConfig};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::core::types::ProviderType;
use crate::utils::error::{GatewayError, Result};

/// Root gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Per-provider sections, keyed by provider name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Semantic cache section; absent disables the cache plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_cache: Option<SemanticCacheConfig>,
    /// Logger section
    #[serde(default)]
    pub logger: LoggerConfig,
}

impl GatewayConfig {
    /// Load from a YAML file, resolve `env.` references, validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config: GatewayConfig = serde_yaml::from_str(&raw)
            .map_err(|e| GatewayError::Configuration(format!("invalid YAML: {e}")))?;
        config.resolve_env()?;
        config.validate()?;
        info!(path = %path.display(), providers = config.providers.len(), "configuration loaded");
        Ok(config)
    }

    /// Resolve `env.VAR` key values against the process environment
    pub fn resolve_env(&mut self) -> Result<()> {
        for provider in self.providers.values_mut() {
            for key in &mut provider.keys {
                key.resolve_env()?;
            }
        }
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        for (name, provider) in &self.providers {
            provider.validate(name)?;
        }
        if let Some(cache) = &self.semantic_cache {
            cache.validate()?;
        }
        Ok(())
    }

    /// Section for one provider, when configured
    pub fn provider(&self, provider: &ProviderType) -> Option<&ProviderConfig> {
        self.providers.get(&provider.to_string())
    }

    /// Section for one provider, or defaults when absent
    pub fn provider_or_default(&self, provider: &ProviderType) -> ProviderConfig {
        self.provider(provider).cloned().unwrap_or_default()
    }

    /// Add or replace a provider section (builder style)
    pub fn with_provider(mut self, provider: ProviderType, config: ProviderConfig) -> Self {
        self.providers.insert(provider.to_string(), config);
        self
    }

    /// Set the semantic cache section (builder style)
    pub fn with_semantic_cache(mut self, cache: SemanticCacheConfig) -> Self {
        self.semantic_cache = Some(cache);
        self
    }
}
