//! MCP tool execution bridge
//!
//! Wraps every tool invocation with the plugin pipeline's MCP hooks:
//! pre-hooks may rewrite arguments or short-circuit with a ready result,
//! post-hooks see the result or error. The transport to an actual MCP
//! server sits behind [`McpTool`].

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::logging::{LogStatus, McpToolLogEntry, McpToolLogStore};
use crate::core::plugins::{McpToolCall, McpToolResult, PluginPipeline};
use crate::core::types::RequestContext;
use crate::utils::error::{GatewayError, Result};

/// One executable tool, local or proxied to a remote MCP server
#[async_trait]
pub trait McpTool: Send + Sync {
    /// Tool name exposed to models
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// JSON Schema of the arguments
    fn schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }

    /// Execute with JSON arguments
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value>;
}

/// Tool registry plus the hook-wrapped execution path
pub struct McpGateway {
    tools: DashMap<String, Arc<dyn McpTool>>,
    pipeline: Arc<PluginPipeline>,
    tool_logs: Option<Arc<dyn McpToolLogStore>>,
}

impl McpGateway {
    /// Build over the shared plugin pipeline
    pub fn new(pipeline: Arc<PluginPipeline>) -> Self {
        Self {
            tools: DashMap::new(),
            pipeline,
            tool_logs: None,
        }
    }

    /// Record every tool execution into `store`
    pub fn with_tool_log_store(mut self, store: Arc<dyn McpToolLogStore>) -> Self {
        self.tool_logs = Some(store);
        self
    }

    /// Register a tool; later registrations replace earlier ones
    pub fn register_tool(&self, tool: Arc<dyn McpTool>) {
        debug!(tool = tool.name(), "MCP tool registered");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Names of every registered tool
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    /// Execute `name` with `arguments`, wrapped by MCP hooks.
    ///
    /// The hook contract mirrors the LLM pipeline: pre-hooks run in
    /// registration order until one short-circuits; post-hooks run in
    /// reverse over the plugins whose pre-hook executed.
    pub async fn execute_tool(
        &self,
        ctx: &mut RequestContext,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let started = std::time::Instant::now();
        let mut call = McpToolCall {
            name: name.to_string(),
            arguments,
        };
        let (executed, short_circuit) = self.pipeline.run_pre_mcp_hooks(ctx, &mut call).await;

        let mut result = match short_circuit {
            Some(result) => result,
            None => match self.tools.get(&call.name).map(|t| t.clone()) {
                Some(tool) => match tool.execute(call.arguments.clone()).await {
                    Ok(value) => McpToolResult {
                        result: Some(value),
                        error: None,
                    },
                    Err(error) => {
                        warn!(tool = %call.name, %error, "MCP tool failed");
                        McpToolResult {
                            result: None,
                            error: Some(error),
                        }
                    }
                },
                None => McpToolResult {
                    result: None,
                    error: Some(GatewayError::Validation(format!(
                        "unknown MCP tool {}",
                        call.name
                    ))),
                },
            },
        };

        self.pipeline
            .run_post_mcp_hooks(ctx, &mut result, executed)
            .await;

        if let Some(store) = &self.tool_logs {
            let entry = McpToolLogEntry {
                id: uuid::Uuid::new_v4().to_string(),
                request_id: Some(ctx.request_id().to_string()),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
                result: result.result.clone(),
                error: result.error.as_ref().map(|e| e.to_string()),
                status: if result.error.is_some() {
                    LogStatus::Error
                } else {
                    LogStatus::Success
                },
                created_at: chrono::Utc::now(),
                latency_ms: Some(started.elapsed().as_millis() as u64),
            };
            if let Err(e) = store.batch_create_if_not_exists(vec![entry]).await {
                warn!(%e, "MCP tool log write failed");
            }
        }

        match (result.result, result.error) {
            (_, Some(error)) => Err(error),
            (Some(value), None) => Ok(value),
            (None, None) => Err(GatewayError::Internal(
                "MCP hook chain produced neither result nor error".into(),
            )),
        }
    }
}
