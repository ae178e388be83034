//! Semantic cache configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::provider::KeyConfig;
use crate::core::types::ProviderType;
use crate::utils::error::{GatewayError, Result};

/// Which lookup paths the cache may take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Exact-hash lookup only
    Direct,
    /// Vector-similarity lookup only
    Semantic,
}

/// Semantic cache plugin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticCacheConfig {
    /// Context key holding the client-provided cache key; requests
    /// without it bypass the cache entirely
    pub cache_key: String,
    /// Context key overriding the TTL per request
    #[serde(default = "default_cache_ttl_key")]
    pub cache_ttl_key: String,
    /// Context key overriding the similarity threshold per request
    #[serde(default = "default_cache_threshold_key")]
    pub cache_threshold_key: String,
    /// Context key restricting the lookup type per request
    #[serde(default = "default_cache_type_key")]
    pub cache_type_key: String,
    /// Entry time-to-live in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Similarity threshold for semantic hits
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Namespace prefix in the vector store
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Partition entries by model
    #[serde(default = "default_true")]
    pub cache_by_model: bool,
    /// Partition entries by provider
    #[serde(default = "default_true")]
    pub cache_by_provider: bool,
    /// Drop system messages before normalisation
    #[serde(default)]
    pub exclude_system_prompt: bool,
    /// Skip caching once a conversation exceeds this many messages;
    /// zero disables the check
    #[serde(default)]
    pub conversation_history_threshold: usize,
    /// Default lookup restriction; absent means both paths run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_cache_type: Option<CacheType>,
    /// Provider serving cache embeddings
    #[serde(default = "default_embedding_provider")]
    pub provider: ProviderType,
    /// Dedicated credentials for the embedding sub-client
    #[serde(default)]
    pub keys: Vec<KeyConfig>,
    /// Embedding model id
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Explicit vector-store namespace; defaults to the prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_store_namespace: Option<String>,
}

fn default_cache_ttl_key() -> String {
    "semantic_cache.ttl".to_string()
}
fn default_cache_threshold_key() -> String {
    "semantic_cache.threshold".to_string()
}
fn default_cache_type_key() -> String {
    "semantic_cache.type".to_string()
}
fn default_ttl_secs() -> u64 {
    300
}
fn default_threshold() -> f64 {
    0.8
}
fn default_prefix() -> String {
    "semantic_cache".to_string()
}
fn default_true() -> bool {
    true
}
fn default_embedding_provider() -> ProviderType {
    ProviderType::OpenAI
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            cache_key: "semantic_cache.cache_key".to_string(),
            cache_ttl_key: default_cache_ttl_key(),
            cache_threshold_key: default_cache_threshold_key(),
            cache_type_key: default_cache_type_key(),
            ttl_secs: default_ttl_secs(),
            threshold: default_threshold(),
            prefix: default_prefix(),
            cache_by_model: true,
            cache_by_provider: true,
            exclude_system_prompt: false,
            conversation_history_threshold: 0,
            default_cache_type: None,
            provider: default_embedding_provider(),
            keys: Vec::new(),
            embedding_model: default_embedding_model(),
            vector_store_namespace: None,
        }
    }
}

impl SemanticCacheConfig {
    /// Entry TTL as a [`Duration`]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Namespace used in the vector store
    pub fn namespace(&self) -> &str {
        self.vector_store_namespace.as_deref().unwrap_or(&self.prefix)
    }

    /// Structural validation
    pub fn validate(&self) -> Result<()> {
        if self.cache_key.is_empty() {
            return Err(GatewayError::Configuration(
                "semantic cache: cache_key is required".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(GatewayError::Configuration(format!(
                "semantic cache: threshold {} outside [0, 1]",
                self.threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SemanticCacheConfig::default();
        assert_eq!(config.ttl(), Duration::from_secs(300));
        assert_eq!(config.threshold, 0.8);
        assert_eq!(config.namespace(), "semantic_cache");
        assert!(config.cache_by_model);
        assert!(config.cache_by_provider);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_bounds() {
        let config = SemanticCacheConfig {
            threshold: 1.2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
