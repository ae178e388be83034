//! Provider adapter contract
//!
//! An adapter translates one canonical request into the provider's native
//! wire format, executes it, and translates the result back. Adapters are
//! stateless beyond their HTTP client; credential material arrives with
//! every call so key rotation needs no adapter rebuild.

use async_trait::async_trait;
use futures::Stream;
use std::fmt::Debug;
use std::pin::Pin;

use crate::config::KeyConfig;
use crate::core::types::{GatewayRequest, GatewayResponse, ProviderType, RequestKind, StreamChunk};
use crate::utils::error::{GatewayError, Result};

/// A boxed stream of canonical chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// Per-provider translator between canonical and native schemas
#[async_trait]
pub trait ProviderAdapter: Send + Sync + Debug {
    /// The provider family this adapter serves
    fn provider_type(&self) -> ProviderType;

    /// Request kinds this adapter implements
    fn supported_kinds(&self) -> &[RequestKind];

    /// Execute a unary request
    async fn execute(&self, request: &GatewayRequest, key: &KeyConfig) -> Result<GatewayResponse>;

    /// Execute a streaming request, returning the live chunk stream
    async fn execute_stream(
        &self,
        request: &GatewayRequest,
        key: &KeyConfig,
    ) -> Result<ChunkStream>;

    /// Guard shared by implementations: reject kinds the adapter lacks
    fn check_supported(&self, kind: RequestKind) -> Result<()> {
        if self.supported_kinds().contains(&kind) {
            Ok(())
        } else {
            Err(GatewayError::UnsupportedOperation {
                provider: self.provider_type().to_string(),
                operation: kind.to_string(),
            })
        }
    }
}
