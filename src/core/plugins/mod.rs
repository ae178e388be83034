//! Plugin system
//!
//! A plugin implements any subset of the hook surface: LLM pre/post
//! hooks around dispatch, MCP pre/post hooks around tool execution, and
//! transport hooks for embedding HTTP front-ends. Default impls make
//! every hook a no-op so plugins declare only what they use.

pub mod pipeline;

pub use pipeline::PluginPipeline;

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::core::types::{GatewayRequest, GatewayResponse, RequestContext, StreamChunk};
use crate::utils::error::{GatewayError, Result};

/// A pre-hook verdict that bypasses the dispatcher
///
/// Exactly one field is expected to be set. The payload enters the
/// post-hook chain as if the provider had produced it.
pub struct ShortCircuit {
    /// Ready unary response
    pub response: Option<GatewayResponse>,
    /// Ready stream
    pub stream: Option<mpsc::Receiver<Result<StreamChunk>>>,
    /// Intentional error
    pub error: Option<GatewayError>,
}

impl ShortCircuit {
    /// Short-circuit with a unary response
    pub fn with_response(response: GatewayResponse) -> Self {
        Self {
            response: Some(response),
            stream: None,
            error: None,
        }
    }

    /// Short-circuit with a ready stream
    pub fn with_stream(stream: mpsc::Receiver<Result<StreamChunk>>) -> Self {
        Self {
            response: None,
            stream: Some(stream),
            error: None,
        }
    }

    /// Short-circuit with an error
    pub fn with_error(error: GatewayError) -> Self {
        Self {
            response: None,
            stream: None,
            error: Some(error),
        }
    }
}

/// The response-or-error pair flowing through post-hooks
///
/// Exactly one side is normally set; a post-hook may transform either,
/// including turning an error into a response or vice versa.
#[derive(Debug, Default)]
pub struct LlmResult {
    /// Successful response, when present
    pub response: Option<GatewayResponse>,
    /// Failure, when present
    pub error: Option<GatewayError>,
}

impl LlmResult {
    /// Wrap a success
    pub fn ok(response: GatewayResponse) -> Self {
        Self {
            response: Some(response),
            error: None,
        }
    }

    /// Wrap a failure
    pub fn err(error: GatewayError) -> Self {
        Self {
            response: None,
            error: Some(error),
        }
    }

    /// Collapse into a `Result`
    pub fn into_result(self) -> Result<GatewayResponse> {
        match (self.response, self.error) {
            (_, Some(error)) => Err(error),
            (Some(response), None) => Ok(response),
            (None, None) => Err(GatewayError::Internal(
                "post-hook chain produced neither response nor error".into(),
            )),
        }
    }
}

/// A tool invocation about to be executed by an MCP server
#[derive(Debug, Clone)]
pub struct McpToolCall {
    /// Tool name
    pub name: String,
    /// JSON arguments
    pub arguments: serde_json::Value,
}

/// Outcome of an MCP tool execution
#[derive(Debug, Default)]
pub struct McpToolResult {
    /// Tool output, when execution succeeded
    pub result: Option<serde_json::Value>,
    /// Failure, when present
    pub error: Option<GatewayError>,
}

/// Raw transport request seen by transport hooks
#[derive(Debug, Clone, Default)]
pub struct TransportRequest {
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Request body
    pub body: bytes::Bytes,
}

/// Raw transport response seen by transport hooks
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    /// HTTP status
    pub status: u16,
    /// Response headers
    pub headers: HashMap<String, String>,
    /// Response body
    pub body: bytes::Bytes,
}

/// The hook surface
///
/// Hook errors are internal errors: the pipeline logs them and keeps
/// going; they are never surfaced in responses. Intentional failures
/// travel as short-circuits or through [`LlmResult::error`].
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Stable plugin name, used in logs and error attribution
    fn name(&self) -> &str;

    /// Runs before dispatch, in registration order. May mutate the
    /// request or return a short-circuit.
    async fn pre_llm_hook(&self, _request: &mut GatewayRequest) -> Result<Option<ShortCircuit>> {
        Ok(None)
    }

    /// Runs after completion, in reverse registration order. May
    /// transform the response or error.
    async fn post_llm_hook(&self, _ctx: &mut RequestContext, _result: &mut LlmResult) -> Result<()> {
        Ok(())
    }

    /// Observes every streamed chunk, in reverse registration order.
    async fn post_stream_chunk_hook(
        &self,
        _ctx: &mut RequestContext,
        _chunk: &mut StreamChunk,
    ) -> Result<()> {
        Ok(())
    }

    /// Runs before an MCP tool executes; may mutate arguments or
    /// short-circuit with a ready result.
    async fn pre_mcp_hook(
        &self,
        _ctx: &mut RequestContext,
        _call: &mut McpToolCall,
    ) -> Result<Option<McpToolResult>> {
        Ok(None)
    }

    /// Runs after an MCP tool executes, in reverse registration order.
    async fn post_mcp_hook(
        &self,
        _ctx: &mut RequestContext,
        _result: &mut McpToolResult,
    ) -> Result<()> {
        Ok(())
    }

    /// Transport-level request hook for embedding front-ends.
    async fn transport_pre_hook(&self, _request: &mut TransportRequest) -> Result<()> {
        Ok(())
    }

    /// Transport-level response hook for embedding front-ends.
    async fn transport_post_hook(&self, _response: &mut TransportResponse) -> Result<()> {
        Ok(())
    }

    /// Transport-level hook over raw stream frames.
    async fn transport_stream_chunk_hook(&self, _frame: &mut bytes::Bytes) -> Result<()> {
        Ok(())
    }

    /// Release plugin resources at gateway shutdown.
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}
