//! # omnigate
//!
//! A unified, multi-provider LLM gateway core. Callers speak one
//! canonical request/response schema; the gateway selects a provider
//! adapter, picks a credential, translates to the native wire format,
//! executes (unary or streamed), translates back, and emits
//! observability signals along the way.
//!
//! ## Highlights
//!
//! - **Per-provider worker pools** with bounded queues and caller-visible
//!   backpressure
//! - **Weighted, model-aware credential selection** with atomic hot reload
//! - **Retry and fallback orchestration** across ordered provider/model
//!   cascades
//! - **Plugin pipeline** with pre-hooks, reverse-order post-hooks,
//!   short-circuits and MCP tool hooks
//! - **Streaming accumulator** fanning live chunks to the caller while
//!   materialising one logical response per stream
//! - **Semantic cache** combining exact-hash and vector-similarity
//!   lookups with strict per-parameter filters and TTL expiry
//! - **Batched async logger** writing one row per request attempt
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use omnigate::{Gateway, GatewayConfig};
//! use omnigate::core::types::{ChatMessage, GatewayRequest, MessageRole, ProviderType, RequestInput};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::from_file("gateway.yaml")?;
//!     let gateway = Gateway::builder(config).build()?;
//!
//!     let request = GatewayRequest::new(
//!         ProviderType::OpenAI,
//!         "gpt-4o-mini",
//!         RequestInput::Chat {
//!             messages: vec![ChatMessage::text(MessageRole::User, "Hello!")],
//!         },
//!     );
//!     let response = gateway.execute(request).await?;
//!     println!("{}", response.content_text().unwrap_or_default());
//!
//!     gateway.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod config;
pub mod core;
pub mod storage;
pub mod utils;

pub use config::GatewayConfig;
pub use utils::error::{GatewayError, Result};

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::SemanticCacheConfig;
use crate::core::dispatcher::Dispatcher;
use crate::core::logging::{LiveCallback, LogStore, LoggerPlugin, McpToolLogStore, MemoryLogStore};
use crate::core::mcp::{McpGateway, McpTool};
use crate::core::plugins::{LlmResult, Plugin, PluginPipeline, ShortCircuit};
use crate::core::providers::{ProviderAdapter, ProviderRegistry};
use crate::core::resilience::run_with_fallbacks;
use crate::core::semantic_cache::{
    Embedder, ProviderEmbedder, SemanticCachePlugin, TextHashEmbedder,
};
use crate::core::trace::Tracer;
use crate::core::types::context::keys as context_keys;
use crate::core::types::{
    ChatDelta, ChunkDelta, ContextValue, GatewayRequest, GatewayResponse, MessageRole,
    ProviderType, RequestContext, StreamChunk, StreamError,
};
use crate::storage::vector::{MemoryVectorStore, VectorStore};

/// Builder for a [`Gateway`]
pub struct GatewayBuilder {
    config: GatewayConfig,
    adapters: Vec<Arc<dyn ProviderAdapter>>,
    plugins: Vec<Arc<dyn Plugin>>,
    log_store: Option<Arc<dyn LogStore>>,
    mcp_tool_log_store: Option<Arc<dyn McpToolLogStore>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    live_callback: Option<LiveCallback>,
}

impl GatewayBuilder {
    fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            adapters: Vec::new(),
            plugins: Vec::new(),
            log_store: None,
            mcp_tool_log_store: None,
            vector_store: None,
            embedder: None,
            live_callback: None,
        }
    }

    /// Pre-register a provider adapter (tests, custom dialects)
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Register a plugin; runs after the built-in logger and cache
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Use a concrete log store instead of the in-memory default
    pub fn with_log_store(mut self, store: Arc<dyn LogStore>) -> Self {
        self.log_store = Some(store);
        self
    }

    /// Record MCP tool executions into `store`
    pub fn with_mcp_tool_log_store(mut self, store: Arc<dyn McpToolLogStore>) -> Self {
        self.mcp_tool_log_store = Some(store);
        self
    }

    /// Use a concrete vector store instead of the in-memory default
    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Use a specific embedding client for the cache
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Receive live log snapshots (processing + committed rows)
    pub fn with_live_callback(mut self, callback: LiveCallback) -> Self {
        self.live_callback = Some(callback);
        self
    }

    /// Construct the gateway and start its background tasks
    pub fn build(self) -> Result<Gateway> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let registry = Arc::new(ProviderRegistry::new(config.clone()));
        for adapter in self.adapters {
            registry.register(adapter);
        }

        let tracer = Arc::new(Tracer::default());
        let accumulator_sweeper = tracer
            .accumulator()
            .spawn_sweeper(std::time::Duration::from_secs(60));

        let log_store: Arc<dyn LogStore> = self
            .log_store
            .unwrap_or_else(|| Arc::new(MemoryLogStore::new()));
        let logger = LoggerPlugin::new(
            &config.logger,
            log_store.clone(),
            tracer.clone(),
            self.live_callback,
        );

        let mut pipeline = PluginPipeline::new();
        // The logger runs first so its pre-hook stamps the earliest
        // timestamp and its stream hook finalises after every other plugin
        pipeline.register(logger.clone());

        if let Some(cache_config) = &config.semantic_cache {
            let vector_store: Arc<dyn VectorStore> = self
                .vector_store
                .unwrap_or_else(|| Arc::new(MemoryVectorStore::new()));
            let embedder = match self.embedder {
                Some(embedder) => embedder,
                None => Self::embedder_from_config(&registry, cache_config)?,
            };
            let cache = SemanticCachePlugin::new(cache_config.clone(), vector_store, embedder);
            pipeline.register(cache);
        }

        for plugin in self.plugins {
            pipeline.register(plugin);
        }
        let pipeline = Arc::new(pipeline);

        let dispatcher = Arc::new(Dispatcher::new(config.clone(), registry.clone()));
        let mut mcp = McpGateway::new(pipeline.clone());
        if let Some(store) = self.mcp_tool_log_store {
            mcp = mcp.with_tool_log_store(store);
        }

        info!(
            providers = config.providers.len(),
            plugins = pipeline.len(),
            cache = config.semantic_cache.is_some(),
            "gateway ready"
        );
        Ok(Gateway {
            config,
            dispatcher,
            pipeline,
            tracer,
            logger,
            log_store,
            mcp,
            accumulator_sweeper: parking_lot::Mutex::new(Some(accumulator_sweeper)),
        })
    }

    fn embedder_from_config(
        registry: &Arc<ProviderRegistry>,
        cache_config: &SemanticCacheConfig,
    ) -> Result<Arc<dyn Embedder>> {
        if cache_config.keys.is_empty() {
            return Ok(Arc::new(TextHashEmbedder));
        }
        let adapter = registry.get(&cache_config.provider)?;
        let key = cache_config.keys[0].clone();
        Ok(Arc::new(ProviderEmbedder::new(adapter, key)))
    }
}

/// The gateway: explicit owner of every collaborator
pub struct Gateway {
    config: Arc<GatewayConfig>,
    dispatcher: Arc<Dispatcher>,
    pipeline: Arc<PluginPipeline>,
    tracer: Arc<Tracer>,
    logger: Arc<LoggerPlugin>,
    log_store: Arc<dyn LogStore>,
    mcp: McpGateway,
    accumulator_sweeper: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Gateway {
    /// Start building a gateway over `config`
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    /// The active configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The log store backing the logger
    pub fn log_store(&self) -> &Arc<dyn LogStore> {
        &self.log_store
    }

    /// The tracer
    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    /// Requests dropped by the logger after shutdown began
    pub fn dropped_log_requests(&self) -> u64 {
        self.logger.dropped_requests()
    }

    /// Replace one provider's credentials atomically
    pub fn reload_keys(&self, provider: &ProviderType, keys: Vec<crate::config::KeyConfig>) {
        self.dispatcher.selector(provider).reload(keys);
    }

    /// Register an MCP tool
    pub fn register_mcp_tool(&self, tool: Arc<dyn McpTool>) {
        self.mcp.register_tool(tool);
    }

    /// Execute an MCP tool through the hook-wrapped bridge
    pub async fn execute_mcp_tool(
        &self,
        ctx: &mut RequestContext,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value> {
        self.mcp.execute_tool(ctx, name, arguments).await
    }

    /// Execute a unary request: pre-hooks, dispatch, post-hooks, with the
    /// fallback cascade around the whole lifecycle so every attempt gets
    /// its own hooks and its own log row.
    pub async fn execute(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        request.validate()?;
        run_with_fallbacks(&request, |attempt| self.lifecycle_unary(attempt)).await
    }

    async fn lifecycle_unary(&self, mut request: GatewayRequest) -> Result<GatewayResponse> {
        let trace_id = self.tracer.create_trace(&mut request.context);
        let span_name = request.kind().to_string();
        let span_id = self.tracer.start_span(&mut request.context, span_name);
        self.tracer.set_attribute(
            &span_id,
            "provider",
            serde_json::json!(request.provider.to_string()),
        );
        self.tracer
            .set_attribute(&span_id, "model", serde_json::json!(request.model));

        let run = self.pipeline.run_pre_hooks(&mut request).await;
        let mut result = match run.short_circuit {
            Some(ShortCircuit {
                response: Some(response),
                ..
            }) => LlmResult::ok(response),
            Some(ShortCircuit {
                error: Some(error), ..
            }) => LlmResult::err(error),
            Some(_) => LlmResult::err(GatewayError::Internal(
                "short-circuit carried no unary payload".into(),
            )),
            None => match self.dispatcher.dispatch(&request).await {
                Ok(response) => LlmResult::ok(response),
                Err(error) => LlmResult::err(error),
            },
        };

        self.pipeline
            .run_post_hooks(&mut request.context, &mut result, run.executed)
            .await;

        self.tracer.end_span(&span_id);
        self.tracer.end_trace(&trace_id);
        result.into_result()
    }

    /// Execute a streaming request. Resolves once the stream is
    /// established; the receiver delivers chunks in provider-emit order
    /// after each has passed the stream-chunk hooks.
    pub async fn execute_stream(
        &self,
        mut request: GatewayRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk>>> {
        request.stream = true;
        request.validate()?;
        run_with_fallbacks(&request, |attempt| self.lifecycle_stream(attempt)).await
    }

    async fn lifecycle_stream(
        &self,
        mut request: GatewayRequest,
    ) -> Result<mpsc::Receiver<Result<StreamChunk>>> {
        let trace_id = self.tracer.create_trace(&mut request.context);
        let span_name = format!("{} stream", request.kind());
        let span_id = self.tracer.start_span(&mut request.context, span_name);
        self.tracer.defer_span(request.context.request_id(), &span_id);
        request.context.set(
            context_keys::ACCUMULATOR_ID,
            ContextValue::Str(request.context.request_id().to_string()),
        );

        let run = self.pipeline.run_pre_hooks(&mut request).await;
        let upstream = match run.short_circuit {
            Some(ShortCircuit {
                stream: Some(stream),
                ..
            }) => stream,
            Some(ShortCircuit {
                response: Some(response),
                ..
            }) => Self::response_as_stream(&request, response),
            Some(ShortCircuit {
                error: Some(error), ..
            }) => {
                // The attempt failed before dispatch; the post-hook chain
                // still records it, then the cascade may continue
                return self
                    .fail_stream_attempt(&mut request, error, run.executed, &span_id, &trace_id)
                    .await;
            }
            Some(_) => {
                // A malformed short-circuit still runs post-hooks and
                // releases the deferred span like any other failed attempt
                return self
                    .fail_stream_attempt(
                        &mut request,
                        GatewayError::Internal("short-circuit carried no payload".into()),
                        run.executed,
                        &span_id,
                        &trace_id,
                    )
                    .await;
            }
            None => match self.dispatcher.dispatch_stream(&request).await {
                Ok(stream) => stream,
                Err(error) => {
                    return self
                        .fail_stream_attempt(&mut request, error, run.executed, &span_id, &trace_id)
                        .await;
                }
            },
        };

        Ok(self.pump_stream(request, upstream, run.executed, trace_id))
    }

    /// A stream attempt that never produced a stream still runs the
    /// post-hook chain, so the logger records the failed attempt. A
    /// post-hook may rescue the error into a response, which then flows
    /// back as a single-chunk stream.
    async fn fail_stream_attempt(
        &self,
        request: &mut GatewayRequest,
        error: GatewayError,
        executed: usize,
        span_id: &str,
        trace_id: &str,
    ) -> Result<mpsc::Receiver<Result<StreamChunk>>> {
        let mut result = LlmResult::err(error);
        self.pipeline
            .run_post_hooks(&mut request.context, &mut result, executed)
            .await;
        self.tracer.cancel_deferred(request.context.request_id());
        self.tracer.end_span(span_id);
        self.tracer.end_trace(trace_id);
        match result.into_result() {
            Ok(response) => Ok(Self::response_as_stream(request, response)),
            Err(error) => Err(error),
        }
    }

    /// Fan the upstream into the caller's channel, passing every chunk
    /// through the stream-chunk hooks on the way.
    fn pump_stream(
        &self,
        request: GatewayRequest,
        mut upstream: mpsc::Receiver<Result<StreamChunk>>,
        executed: usize,
        trace_id: String,
    ) -> mpsc::Receiver<Result<StreamChunk>> {
        let (tx, rx) = mpsc::channel::<Result<StreamChunk>>(64);
        let pipeline = self.pipeline.clone();
        let tracer = self.tracer.clone();
        let mut ctx = request.context.clone();
        let model = request.model.clone();

        tokio::spawn(async move {
            let mut next_index: u64 = 0;
            let mut finished = false;
            while let Some(item) = upstream.recv().await {
                match item {
                    Ok(mut chunk) => {
                        next_index = next_index.max(chunk.chunk_index + 1);
                        let is_final = chunk.is_final();
                        pipeline
                            .run_post_stream_chunk(&mut ctx, &mut chunk, executed)
                            .await;
                        let caller_gone = tx.send(Ok(chunk)).await.is_err();
                        if is_final {
                            finished = true;
                            break;
                        }
                        if caller_gone {
                            // Caller went away: cancel so the provider
                            // read loop unwinds, keep draining for hooks
                            ctx.cancel_token().cancel();
                        }
                    }
                    Err(error) => {
                        // Terminal error chunk; partial output already
                        // delivered stays delivered
                        let mut chunk = StreamChunk::delta(
                            ctx.request_id(),
                            &model,
                            next_index,
                            ChunkDelta::Chat(ChatDelta::default()),
                        );
                        chunk.error = Some(StreamError {
                            message: error.to_string(),
                            status: error.status_code(),
                        });
                        pipeline
                            .run_post_stream_chunk(&mut ctx, &mut chunk, executed)
                            .await;
                        let _ = tx.send(Ok(chunk)).await;
                        finished = true;
                        break;
                    }
                }
            }
            if !finished {
                // Upstream closed without a terminal marker
                let mut chunk =
                    StreamChunk::delta(ctx.request_id(), &model, next_index, ChunkDelta::Done);
                pipeline
                    .run_post_stream_chunk(&mut ctx, &mut chunk, executed)
                    .await;
                let _ = tx.send(Ok(chunk)).await;
            }
            tracer.end_trace(&trace_id);
        });
        rx
    }

    /// Adapt a unary short-circuit response to a single-chunk stream
    fn response_as_stream(
        request: &GatewayRequest,
        response: GatewayResponse,
    ) -> mpsc::Receiver<Result<StreamChunk>> {
        let (tx, rx) = mpsc::channel(1);
        let mut chunk = StreamChunk::delta(
            request.context.request_id(),
            &request.model,
            0,
            ChunkDelta::Chat(ChatDelta {
                role: Some(MessageRole::Assistant),
                content: response.content_text(),
                ..Default::default()
            }),
        );
        chunk.finish_reason = Some(response.finish_reason().unwrap_or("stop").to_string());
        chunk.usage = response.usage.clone();
        chunk.cache_debug = response.extra.cache_debug.clone();
        tokio::spawn(async move {
            let _ = tx.send(Ok(chunk)).await;
        });
        rx
    }

    /// Graceful shutdown: drain the dispatcher, then let every plugin
    /// release its resources (logger flush, cache cleanup).
    pub async fn shutdown(&self) {
        info!("gateway shutting down");
        self.dispatcher.shutdown().await;
        let _ = self.pipeline.cleanup().await;
        if let Some(handle) = self.accumulator_sweeper.lock().take() {
            handle.abort();
        }
        info!("gateway shutdown complete");
    }
}
