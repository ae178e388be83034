//! Plugin pipeline
//!
//! Pre-hooks run in registration order; post-hooks run in reverse over
//! the plugins whose pre-hook actually executed, so each plugin sees the
//! result produced by everything registered after it. A short-circuit
//! stops the pre-hook walk and feeds its payload straight into the
//! post-hook chain.

use std::sync::Arc;
use tracing::error;

use super::{LlmResult, McpToolCall, McpToolResult, Plugin, ShortCircuit, TransportRequest, TransportResponse};
use crate::core::types::{GatewayRequest, RequestContext, StreamChunk};
use crate::utils::error::Result;

/// Outcome of the pre-hook walk
pub struct PreHookRun {
    /// Number of plugins whose pre-hook executed
    pub executed: usize,
    /// Short-circuit payload, when a pre-hook produced one
    pub short_circuit: Option<ShortCircuit>,
}

/// Ordered plugin chain
#[derive(Default)]
pub struct PluginPipeline {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginPipeline {
    /// Empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plugin; registration order is execution order
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Number of registered plugins
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether the pipeline is empty
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run pre-hooks in order until completion or short-circuit
    pub async fn run_pre_hooks(&self, request: &mut GatewayRequest) -> PreHookRun {
        for (index, plugin) in self.plugins.iter().enumerate() {
            match plugin.pre_llm_hook(request).await {
                Ok(Some(short_circuit)) => {
                    return PreHookRun {
                        executed: index + 1,
                        short_circuit: Some(short_circuit),
                    };
                }
                Ok(None) => {}
                Err(internal) => {
                    // Hook bugs never fail the request
                    error!(plugin = plugin.name(), %internal, "pre-hook internal error");
                }
            }
        }
        PreHookRun {
            executed: self.plugins.len(),
            short_circuit: None,
        }
    }

    /// Run post-hooks in reverse over the first `executed` plugins
    pub async fn run_post_hooks(
        &self,
        ctx: &mut RequestContext,
        result: &mut LlmResult,
        executed: usize,
    ) {
        for plugin in self.plugins[..executed.min(self.plugins.len())]
            .iter()
            .rev()
        {
            if let Err(internal) = plugin.post_llm_hook(ctx, result).await {
                error!(plugin = plugin.name(), %internal, "post-hook internal error");
            }
        }
    }

    /// Run stream-chunk hooks in reverse over the first `executed` plugins
    pub async fn run_post_stream_chunk(
        &self,
        ctx: &mut RequestContext,
        chunk: &mut StreamChunk,
        executed: usize,
    ) {
        for plugin in self.plugins[..executed.min(self.plugins.len())]
            .iter()
            .rev()
        {
            if let Err(internal) = plugin.post_stream_chunk_hook(ctx, chunk).await {
                error!(plugin = plugin.name(), %internal, "stream-chunk hook internal error");
            }
        }
    }

    /// Run MCP pre-hooks in order until completion or short-circuit
    pub async fn run_pre_mcp_hooks(
        &self,
        ctx: &mut RequestContext,
        call: &mut McpToolCall,
    ) -> (usize, Option<McpToolResult>) {
        for (index, plugin) in self.plugins.iter().enumerate() {
            match plugin.pre_mcp_hook(ctx, call).await {
                Ok(Some(result)) => return (index + 1, Some(result)),
                Ok(None) => {}
                Err(internal) => {
                    error!(plugin = plugin.name(), %internal, "MCP pre-hook internal error");
                }
            }
        }
        (self.plugins.len(), None)
    }

    /// Run MCP post-hooks in reverse over the first `executed` plugins
    pub async fn run_post_mcp_hooks(
        &self,
        ctx: &mut RequestContext,
        result: &mut McpToolResult,
        executed: usize,
    ) {
        for plugin in self.plugins[..executed.min(self.plugins.len())]
            .iter()
            .rev()
        {
            if let Err(internal) = plugin.post_mcp_hook(ctx, result).await {
                error!(plugin = plugin.name(), %internal, "MCP post-hook internal error");
            }
        }
    }

    /// Run transport request hooks in registration order; embedding
    /// front-ends call this before handing the body to the gateway
    pub async fn run_transport_pre_hooks(&self, request: &mut TransportRequest) {
        for plugin in &self.plugins {
            if let Err(internal) = plugin.transport_pre_hook(request).await {
                error!(plugin = plugin.name(), %internal, "transport pre-hook internal error");
            }
        }
    }

    /// Run transport response hooks in reverse order
    pub async fn run_transport_post_hooks(&self, response: &mut TransportResponse) {
        for plugin in self.plugins.iter().rev() {
            if let Err(internal) = plugin.transport_post_hook(response).await {
                error!(plugin = plugin.name(), %internal, "transport post-hook internal error");
            }
        }
    }

    /// Run transport hooks over one raw stream frame, in reverse order
    pub async fn run_transport_stream_chunk_hooks(&self, frame: &mut bytes::Bytes) {
        for plugin in self.plugins.iter().rev() {
            if let Err(internal) = plugin.transport_stream_chunk_hook(frame).await {
                error!(plugin = plugin.name(), %internal, "transport stream hook internal error");
            }
        }
    }

    /// Invoke every plugin's cleanup, continuing past failures
    pub async fn cleanup(&self) -> Result<()> {
        for plugin in &self.plugins {
            if let Err(e) = plugin.cleanup().await {
                error!(plugin = plugin.name(), %e, "plugin cleanup failed");
            }
        }
        Ok(())
    }
}
