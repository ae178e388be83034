//! Embedding sub-client for the cache
//!
//! The cache owns its embedding client outright instead of borrowing the
//! gateway's dispatch path, so shutdown never cycles back through the
//! plugin chain.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::KeyConfig;
use crate::core::providers::ProviderAdapter;
use crate::core::types::{GatewayRequest, ProviderType, RequestInput, ResponsePayload};
use crate::utils::error::{GatewayError, Result};

/// Produces embeddings for cache lookups
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one normalised text
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>>;

    /// Vector dimension; 0 when unknown ahead of the first call
    fn dimension(&self) -> usize;
}

/// Embedder backed by a provider adapter and a dedicated credential
pub struct ProviderEmbedder {
    adapter: Arc<dyn ProviderAdapter>,
    key: KeyConfig,
    provider: ProviderType,
}

impl ProviderEmbedder {
    /// Build over an adapter and the key it should use
    pub fn new(adapter: Arc<dyn ProviderAdapter>, key: KeyConfig) -> Self {
        let provider = adapter.provider_type();
        Self {
            adapter,
            key,
            provider,
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    async fn embed(&self, model: &str, text: &str) -> Result<Vec<f32>> {
        let request = GatewayRequest::new(
            self.provider.clone(),
            model,
            RequestInput::Embedding {
                input: vec![text.to_string()],
            },
        );
        let response = self.adapter.execute(&request, &self.key).await?;
        let ResponsePayload::Embedding { data } = response.payload else {
            return Err(GatewayError::Internal(
                "embedding request returned a non-embedding payload".into(),
            ));
        };
        data.into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| GatewayError::Internal("embedding response was empty".into()))
    }

    fn dimension(&self) -> usize {
        0
    }
}

/// Deterministic embedder for tests and embedded single-node use
#[derive(Debug, Default)]
pub struct TextHashEmbedder;

#[async_trait]
impl Embedder for TextHashEmbedder {
    async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>> {
        Ok(crate::core::providers::mock::deterministic_embedding(text))
    }

    fn dimension(&self) -> usize {
        8
    }
}
