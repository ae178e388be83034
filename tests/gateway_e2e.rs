//! End-to-end gateway scenarios against the mock provider

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

use omnigate::config::{
    GatewayConfig, KeyConfig, ProviderConfig, RetryConfig, SemanticCacheConfig,
};
use omnigate::core::logging::{LogFilters, LogStatus, Pagination};
use omnigate::core::providers::{MockAdapter, MockRule, RuleAction, RuleMatcher};
use omnigate::core::types::{
    ChatDelta, ChatMessage, ChunkDelta, ContextValue, Fallback, GatewayRequest, MessageRole,
    ProviderType, RequestInput, RequestParams, StreamChunk, ToolCallDelta, Usage,
};
use omnigate::storage::vector::{Query, ScanPage, VectorEntry, VectorStore};
use omnigate::{Gateway, GatewayError};

const CACHE_KEY_CTX: &str = "semantic_cache.cache_key";

fn key(id: &str) -> KeyConfig {
    KeyConfig {
        id: id.to_string(),
        value: format!("sk-{id}"),
        supported_models: vec![],
        weight: 1.0,
        extra: Default::default(),
    }
}

fn provider_section(concurrency: usize, buffer_size: usize, max_retries: u32) -> ProviderConfig {
    ProviderConfig {
        concurrency,
        buffer_size,
        retry: RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        },
        keys: vec![key("primary")],
        ..Default::default()
    }
}

fn chat_request(provider: ProviderType, model: &str, content: &str) -> GatewayRequest {
    init_tracing();
    GatewayRequest::new(
        provider,
        model,
        RequestInput::Chat {
            messages: vec![ChatMessage::text(MessageRole::User, content)],
        },
    )
}

fn cacheable_request(content: &str, temperature: f64) -> GatewayRequest {
    let mut request = chat_request(ProviderType::OpenAI, "gpt-4o-mini", content);
    request.params = RequestParams {
        temperature: Some(temperature),
        max_tokens: Some(50),
        ..Default::default()
    };
    request
        .context
        .set(CACHE_KEY_CTX, ContextValue::Str("tenant-a".into()));
    request
}

fn cache_config() -> SemanticCacheConfig {
    SemanticCacheConfig {
        cache_key: CACHE_KEY_CTX.to_string(),
        threshold: 0.8,
        ..Default::default()
    }
}

async fn drain_stream(
    rx: tokio::sync::mpsc::Receiver<omnigate::Result<StreamChunk>>,
) -> Vec<StreamChunk> {
    let mut stream = ReceiverStream::new(rx);
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await {
        chunks.push(chunk.expect("stream item"));
    }
    chunks
}

async fn wait_for_log_rows(gateway: &Gateway, count: u64) {
    for _ in 0..400 {
        let stats = gateway
            .log_store()
            .get_stats(&LogFilters::default())
            .await
            .unwrap();
        if stats.total_requests >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {count} log rows");
}

#[tokio::test]
async fn test_cache_direct_hit_on_identical_request() {
    let config = GatewayConfig::default()
        .with_provider(ProviderType::OpenAI, provider_section(4, 8, 0))
        .with_semantic_cache(cache_config());
    let adapter = Arc::new(MockAdapter::masquerading(
        ProviderType::OpenAI,
        vec![MockRule::new(
            "gateway-question",
            RuleMatcher {
                content_contains: Some("What is a gateway?".into()),
                ..Default::default()
            },
            RuleAction::Respond {
                content: "A gateway fronts many model providers.".into(),
                finish_reason: "stop".into(),
                usage: Some(Usage::new(12, 9)),
            },
        )],
    ));
    let gateway = Gateway::builder(config)
        .with_adapter(adapter.clone())
        .build()
        .unwrap();

    let first = gateway
        .execute(cacheable_request("What is a gateway?", 0.7))
        .await
        .unwrap();
    assert!(first.extra.cache_debug.is_none());
    assert_eq!(adapter.request_count(), 1);

    let second = gateway
        .execute(cacheable_request("What is a gateway?", 0.7))
        .await
        .unwrap();
    let debug_info = second.extra.cache_debug.as_ref().expect("cache debug");
    assert!(debug_info.cache_hit);
    assert_eq!(debug_info.hit_type.as_deref(), Some("direct"));
    assert_eq!(second.content_text(), first.content_text());
    // the provider was not consulted again
    assert_eq!(adapter.request_count(), 1);

    // one log row per request, the hit included
    wait_for_log_rows(&gateway, 2).await;
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_cache_miss_on_param_change() {
    let config = GatewayConfig::default()
        .with_provider(ProviderType::OpenAI, provider_section(4, 8, 0))
        .with_semantic_cache(cache_config());
    let adapter = Arc::new(MockAdapter::masquerading(ProviderType::OpenAI, vec![]));
    let gateway = Gateway::builder(config)
        .with_adapter(adapter.clone())
        .build()
        .unwrap();

    gateway
        .execute(cacheable_request("What is a gateway?", 0.7))
        .await
        .unwrap();
    let second = gateway
        .execute(cacheable_request("What is a gateway?", 0.9))
        .await
        .unwrap();

    assert!(second
        .extra
        .cache_debug
        .as_ref()
        .map(|d| !d.cache_hit)
        .unwrap_or(true));
    assert_eq!(adapter.request_count(), 2);
    gateway.shutdown().await;
}

/// Vector store wrapper that counts nearest-neighbour lookups
struct CountingVectorStore {
    inner: omnigate::storage::vector::MemoryVectorStore,
    nearest_calls: std::sync::atomic::AtomicU64,
}

impl CountingVectorStore {
    fn new() -> Self {
        Self {
            inner: omnigate::storage::vector::MemoryVectorStore::new(),
            nearest_calls: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

#[async_trait::async_trait]
impl VectorStore for CountingVectorStore {
    async fn ping(&self) -> omnigate::Result<()> {
        self.inner.ping().await
    }

    async fn create_namespace(
        &self,
        namespace: &str,
        dimension: usize,
        schema: &[String],
    ) -> omnigate::Result<()> {
        self.inner.create_namespace(namespace, dimension, schema).await
    }

    async fn delete_namespace(&self, namespace: &str) -> omnigate::Result<()> {
        self.inner.delete_namespace(namespace).await
    }

    async fn add(
        &self,
        namespace: &str,
        id: &str,
        embedding: Option<Vec<f32>>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> omnigate::Result<()> {
        self.inner.add(namespace, id, embedding, metadata).await
    }

    async fn get_chunk(&self, namespace: &str, id: &str) -> omnigate::Result<Option<VectorEntry>> {
        self.inner.get_chunk(namespace, id).await
    }

    async fn get_chunks(
        &self,
        namespace: &str,
        ids: &[String],
    ) -> omnigate::Result<Vec<VectorEntry>> {
        self.inner.get_chunks(namespace, ids).await
    }

    async fn get_all(
        &self,
        namespace: &str,
        queries: &[Query],
        select: &[String],
        cursor: Option<String>,
        limit: usize,
    ) -> omnigate::Result<ScanPage> {
        self.inner.get_all(namespace, queries, select, cursor, limit).await
    }

    async fn get_nearest(
        &self,
        namespace: &str,
        vector: &[f32],
        queries: &[Query],
        select: &[String],
        threshold: f64,
        limit: usize,
    ) -> omnigate::Result<Vec<VectorEntry>> {
        self.nearest_calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.inner
            .get_nearest(namespace, vector, queries, select, threshold, limit)
            .await
    }

    async fn delete(&self, namespace: &str, id: &str) -> omnigate::Result<()> {
        self.inner.delete(namespace, id).await
    }

    async fn delete_all(
        &self,
        namespace: &str,
        queries: &[Query],
    ) -> omnigate::Result<Vec<VectorEntry>> {
        self.inner.delete_all(namespace, queries).await
    }

    async fn close(&self, namespace: &str) -> omnigate::Result<()> {
        self.inner.close(namespace).await
    }

    fn requires_vectors(&self) -> bool {
        self.inner.requires_vectors()
    }
}

#[tokio::test]
async fn test_direct_only_mode_never_searches_semantically() {
    let mut cache = cache_config();
    cache.default_cache_type = Some(omnigate::config::CacheType::Direct);
    let config = GatewayConfig::default()
        .with_provider(ProviderType::OpenAI, provider_section(4, 8, 0))
        .with_semantic_cache(cache);
    let store = Arc::new(CountingVectorStore::new());
    let gateway = Gateway::builder(config)
        .with_adapter(Arc::new(MockAdapter::masquerading(
            ProviderType::OpenAI,
            vec![],
        )))
        .with_vector_store(store.clone())
        .build()
        .unwrap();

    gateway
        .execute(cacheable_request("direct only", 0.7))
        .await
        .unwrap();
    let hit = gateway
        .execute(cacheable_request("direct only", 0.7))
        .await
        .unwrap();
    assert!(hit.extra.cache_debug.as_ref().unwrap().cache_hit);
    assert_eq!(
        store
            .nearest_calls
            .load(std::sync::atomic::Ordering::Relaxed),
        0
    );
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_streaming_tool_call_accumulation() {
    let config =
        GatewayConfig::default().with_provider(ProviderType::OpenAI, provider_section(4, 8, 0));
    let tool_delta = |arguments: &str| {
        ChunkDelta::Chat(ChatDelta {
            tool_calls: vec![ToolCallDelta {
                index: 0,
                arguments: Some(arguments.to_string()),
                ..Default::default()
            }],
            ..Default::default()
        })
    };
    let adapter = Arc::new(MockAdapter::masquerading(
        ProviderType::OpenAI,
        vec![MockRule::new(
            "weather-tool",
            RuleMatcher::default(),
            RuleAction::Stream {
                deltas: vec![
                    ChunkDelta::Chat(ChatDelta {
                        role: Some(MessageRole::Assistant),
                        tool_calls: vec![ToolCallDelta {
                            index: 0,
                            id: Some("call_1".into()),
                            call_type: Some("function".into()),
                            name: Some("get_weather".into()),
                            arguments: Some("{\"".into()),
                        }],
                        ..Default::default()
                    }),
                    tool_delta("loc"),
                    tool_delta("\":\"SF\"}"),
                ],
                finish_reason: "tool_calls".into(),
                usage: Some(Usage::new(20, 10)),
            },
        )],
    ));
    let gateway = Gateway::builder(config).with_adapter(adapter).build().unwrap();

    let request = chat_request(ProviderType::OpenAI, "gpt-4o-mini", "weather in SF?");
    let request_id = request.context.request_id().to_string();
    let chunks = drain_stream(gateway.execute_stream(request).await.unwrap()).await;

    assert_eq!(chunks.iter().filter(|c| c.is_final()).count(), 1);
    assert_eq!(
        chunks.last().unwrap().finish_reason.as_deref(),
        Some("tool_calls")
    );

    // the accumulator-materialised row carries the assembled call
    wait_for_log_rows(&gateway, 1).await;
    let row = gateway
        .log_store()
        .find_first(&LogFilters {
            request_id: Some(request_id),
            ..Default::default()
        })
        .await
        .unwrap()
        .expect("stream row");
    let calls = row.output_tool_calls.expect("tool calls");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "call_1");
    assert_eq!(calls[0].function.name, "get_weather");
    assert_eq!(calls[0].function.arguments, "{\"loc\":\"SF\"}");
    assert_eq!(row.finish_reason.as_deref(), Some("tool_calls"));
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_fallback_on_5xx_after_retry_exhaustion() {
    let config = GatewayConfig::default()
        .with_provider(ProviderType::OpenAI, provider_section(4, 8, 2))
        .with_provider(ProviderType::Anthropic, provider_section(4, 8, 0));

    let failing = Arc::new(MockAdapter::masquerading(
        ProviderType::OpenAI,
        vec![MockRule::new(
            "always-500",
            RuleMatcher::default(),
            RuleAction::Fail(GatewayError::ProviderAPI {
                status: 500,
                error_type: None,
                error_code: None,
                message: "upstream exploded".into(),
            }),
        )],
    ));
    let healthy = Arc::new(MockAdapter::masquerading(
        ProviderType::Anthropic,
        vec![MockRule::new(
            "claude",
            RuleMatcher::default(),
            RuleAction::Respond {
                content: "answer from the alternate".into(),
                finish_reason: "stop".into(),
                usage: None,
            },
        )],
    ));
    let gateway = Gateway::builder(config)
        .with_adapter(failing.clone())
        .with_adapter(healthy.clone())
        .build()
        .unwrap();

    let mut request = chat_request(ProviderType::OpenAI, "gpt-4", "hello");
    request.fallbacks = vec![Fallback {
        provider: ProviderType::Anthropic,
        model: "claude-3".into(),
    }];
    let original_id = request.context.request_id().to_string();

    let response = gateway.execute(request).await.unwrap();
    assert_eq!(
        response.content_text().as_deref(),
        Some("answer from the alternate")
    );
    assert_eq!(response.extra.provider, ProviderType::Anthropic);

    // primary attempt + 2 retries, then one fallback call
    assert_eq!(failing.rule_hit_count("always-500"), 3);
    assert_eq!(healthy.rule_hit_count("claude"), 1);

    // two rows: the failed primary and the successful fallback, linked
    wait_for_log_rows(&gateway, 2).await;
    let error_row = gateway
        .log_store()
        .find_first(&LogFilters {
            request_id: Some(original_id.clone()),
            ..Default::default()
        })
        .await
        .unwrap()
        .expect("primary row");
    assert_eq!(error_row.status, LogStatus::Error);
    assert_eq!(error_row.fallback_index, 0);

    let fallback_row = gateway
        .log_store()
        .find_first(&LogFilters {
            parent_request_id: Some(original_id),
            ..Default::default()
        })
        .await
        .unwrap()
        .expect("fallback row");
    assert_eq!(fallback_row.status, LogStatus::Success);
    assert_eq!(fallback_row.fallback_index, 1);
    assert_eq!(fallback_row.provider, ProviderType::Anthropic);
    assert_eq!(fallback_row.model, "claude-3");
    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backpressure_serialises_parallel_callers() {
    let config =
        GatewayConfig::default().with_provider(ProviderType::OpenAI, provider_section(1, 1, 0));
    let adapter = Arc::new(
        MockAdapter::masquerading(ProviderType::OpenAI, vec![])
            .with_default_latency(Duration::from_secs(2)),
    );
    let gateway = Arc::new(Gateway::builder(config).with_adapter(adapter).build().unwrap());

    let started = tokio::time::Instant::now();
    let mut handles = Vec::new();
    for i in 0..3 {
        let gateway = gateway.clone();
        handles.push(tokio::spawn(async move {
            let request = chat_request(ProviderType::OpenAI, "gpt-4o-mini", &format!("caller {i}"));
            gateway.execute(request).await.unwrap();
            tokio::time::Instant::now()
        }));
    }

    let mut completions: Vec<Duration> = Vec::new();
    for handle in handles {
        completions.push(handle.await.unwrap().duration_since(started));
    }
    completions.sort();

    assert!(completions[0] >= Duration::from_secs(2) && completions[0] < Duration::from_secs(3));
    assert!(completions[1] >= Duration::from_secs(4) && completions[1] < Duration::from_secs(5));
    assert!(completions[2] >= Duration::from_secs(6) && completions[2] < Duration::from_secs(7));
}

#[tokio::test]
async fn test_cache_ttl_expiry_returns_miss_and_deletes() {
    let config = GatewayConfig::default()
        .with_provider(ProviderType::OpenAI, provider_section(4, 8, 0))
        .with_semantic_cache(cache_config());
    let adapter = Arc::new(MockAdapter::masquerading(ProviderType::OpenAI, vec![]));
    let store = Arc::new(CountingVectorStore::new());
    let gateway = Gateway::builder(config)
        .with_adapter(adapter.clone())
        .with_vector_store(store.clone())
        .build()
        .unwrap();

    let with_short_ttl = |content: &str| {
        let mut request = cacheable_request(content, 0.7);
        request
            .context
            .set("semantic_cache.ttl", ContextValue::Int(1));
        request
    };

    gateway.execute(with_short_ttl("expiring entry")).await.unwrap();
    let page = store
        .get_all("semantic_cache", &[], &[], None, 100)
        .await
        .unwrap();
    assert_eq!(page.entries.len(), 1);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    // expired: read path treats it as a miss and re-dispatches
    let second = gateway.execute(with_short_ttl("expiring entry")).await.unwrap();
    assert!(second
        .extra
        .cache_debug
        .as_ref()
        .map(|d| !d.cache_hit)
        .unwrap_or(true));
    assert_eq!(adapter.request_count(), 2);

    // the async delete eventually removes the expired row; the second
    // call re-inserted a fresh one
    for _ in 0..200 {
        let page = store
            .get_all("semantic_cache", &[], &[], None, 100)
            .await
            .unwrap();
        let now = chrono::Utc::now().timestamp();
        let expired_left = page.entries.iter().any(|entry| {
            entry
                .metadata
                .get("expires_at")
                .and_then(|v| v.as_i64())
                .map(|e| e < now)
                .unwrap_or(false)
        });
        if !expired_left {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_streaming_cache_round_trip() {
    let config = GatewayConfig::default()
        .with_provider(ProviderType::OpenAI, provider_section(4, 8, 0))
        .with_semantic_cache(cache_config());
    let adapter = Arc::new(MockAdapter::masquerading(
        ProviderType::OpenAI,
        vec![MockRule::new(
            "stream",
            RuleMatcher::default(),
            RuleAction::Stream {
                deltas: vec![
                    ChunkDelta::Chat(ChatDelta {
                        role: Some(MessageRole::Assistant),
                        content: Some("str".into()),
                        ..Default::default()
                    }),
                    ChunkDelta::Chat(ChatDelta {
                        content: Some("eamed".into()),
                        ..Default::default()
                    }),
                ],
                finish_reason: "stop".into(),
                usage: None,
            },
        )],
    ));
    let gateway = Gateway::builder(config)
        .with_adapter(adapter.clone())
        .build()
        .unwrap();

    let first = drain_stream(
        gateway
            .execute_stream(cacheable_request("stream me", 0.2))
            .await
            .unwrap(),
    )
    .await;
    let first_text: String = first
        .iter()
        .filter_map(|c| match &c.delta {
            ChunkDelta::Chat(d) => d.content.clone(),
            _ => None,
        })
        .collect();
    assert_eq!(first_text, "streamed");
    assert_eq!(adapter.request_count(), 1);

    // allow the post-hook insertion to finish
    tokio::time::sleep(Duration::from_millis(50)).await;

    let replay = drain_stream(
        gateway
            .execute_stream(cacheable_request("stream me", 0.2))
            .await
            .unwrap(),
    )
    .await;
    let replay_text: String = replay
        .iter()
        .filter_map(|c| match &c.delta {
            ChunkDelta::Chat(d) => d.content.clone(),
            _ => None,
        })
        .collect();
    assert_eq!(replay_text, "streamed");
    assert_eq!(adapter.request_count(), 1, "replay must not hit the provider");
    let debug_info = replay
        .last()
        .and_then(|c| c.cache_debug.clone())
        .expect("cache debug on final replayed chunk");
    assert!(debug_info.cache_hit);
    assert_eq!(debug_info.hit_type.as_deref(), Some("direct"));
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_unsupported_operation_is_not_fallen_back() {
    let config = GatewayConfig::default()
        .with_provider(ProviderType::Anthropic, provider_section(2, 4, 0));
    // the real Anthropic adapter shape: no speech support
    struct NoSpeech;
    #[async_trait::async_trait]
    impl omnigate::core::providers::ProviderAdapter for NoSpeech {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Anthropic
        }
        fn supported_kinds(&self) -> &[omnigate::core::types::RequestKind] {
            &[omnigate::core::types::RequestKind::Chat]
        }
        async fn execute(
            &self,
            request: &GatewayRequest,
            _key: &KeyConfig,
        ) -> omnigate::Result<omnigate::core::types::GatewayResponse> {
            self.check_supported(request.kind())?;
            unreachable!("only unsupported kinds are sent in this test")
        }
        async fn execute_stream(
            &self,
            request: &GatewayRequest,
            _key: &KeyConfig,
        ) -> omnigate::Result<omnigate::core::providers::ChunkStream> {
            self.check_supported(request.kind())?;
            unreachable!()
        }
    }
    impl std::fmt::Debug for NoSpeech {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("NoSpeech")
        }
    }

    let gateway = Gateway::builder(config)
        .with_adapter(Arc::new(NoSpeech))
        .build()
        .unwrap();

    let mut request = GatewayRequest::new(
        ProviderType::Anthropic,
        "claude-3",
        RequestInput::Speech {
            input: "say this".into(),
            voice: "alloy".into(),
            format: None,
        },
    );
    request.fallbacks = vec![Fallback {
        provider: ProviderType::Mock,
        model: "mock-model".into(),
    }];

    let result = gateway.execute(request).await;
    assert!(matches!(
        result,
        Err(GatewayError::UnsupportedOperation { .. })
    ));
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_empty_short_circuit_on_stream_is_recorded_as_failed_attempt() {
    use omnigate::core::plugins::{Plugin, ShortCircuit};

    // A buggy plugin can build a ShortCircuit with no payload at all;
    // the attempt must still flow through the post-hook chain
    struct EmptyShortCircuitPlugin;

    #[async_trait::async_trait]
    impl Plugin for EmptyShortCircuitPlugin {
        fn name(&self) -> &str {
            "empty-short-circuit"
        }

        async fn pre_llm_hook(
            &self,
            _request: &mut GatewayRequest,
        ) -> omnigate::Result<Option<ShortCircuit>> {
            Ok(Some(ShortCircuit {
                response: None,
                stream: None,
                error: None,
            }))
        }
    }

    let config =
        GatewayConfig::default().with_provider(ProviderType::OpenAI, provider_section(2, 4, 0));
    let gateway = Gateway::builder(config)
        .with_adapter(Arc::new(MockAdapter::masquerading(
            ProviderType::OpenAI,
            vec![],
        )))
        .with_plugin(Arc::new(EmptyShortCircuitPlugin))
        .build()
        .unwrap();

    let request = chat_request(ProviderType::OpenAI, "gpt-4o-mini", "never dispatched");
    let request_id = request.context.request_id().to_string();
    let result = gateway.execute_stream(request).await;
    assert!(matches!(result, Err(GatewayError::Internal(_))));

    // the failed attempt still produced its log row
    wait_for_log_rows(&gateway, 1).await;
    let row = gateway
        .log_store()
        .find_first(&LogFilters {
            request_id: Some(request_id),
            ..Default::default()
        })
        .await
        .unwrap()
        .expect("row for the failed attempt");
    assert_eq!(row.status, LogStatus::Error);
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_mcp_tool_round_trip() {
    struct AdderTool;
    #[async_trait::async_trait]
    impl omnigate::core::mcp::McpTool for AdderTool {
        fn name(&self) -> &str {
            "add"
        }
        fn description(&self) -> &str {
            "Adds two numbers"
        }
        async fn execute(
            &self,
            arguments: serde_json::Value,
        ) -> omnigate::Result<serde_json::Value> {
            let a = arguments["a"].as_i64().unwrap_or(0);
            let b = arguments["b"].as_i64().unwrap_or(0);
            Ok(serde_json::json!({"sum": a + b}))
        }
    }

    init_tracing();
    let gateway = Gateway::builder(GatewayConfig::default()).build().unwrap();
    gateway.register_mcp_tool(Arc::new(AdderTool));

    let mut ctx = omnigate::core::types::RequestContext::new();
    let output = gateway
        .execute_mcp_tool(&mut ctx, "add", serde_json::json!({"a": 2, "b": 3}))
        .await
        .unwrap();
    assert_eq!(output, serde_json::json!({"sum": 5}));
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_search_logs_pagination_and_stats() -> anyhow::Result<()> {
    let config =
        GatewayConfig::default().with_provider(ProviderType::OpenAI, provider_section(4, 8, 0));
    let gateway = Gateway::builder(config)
        .with_adapter(Arc::new(MockAdapter::masquerading(
            ProviderType::OpenAI,
            vec![],
        )))
        .build()?;

    for i in 0..5 {
        gateway
            .execute(chat_request(
                ProviderType::OpenAI,
                "gpt-4o-mini",
                &format!("message {i}"),
            ))
            .await?;
    }
    wait_for_log_rows(&gateway, 5).await;

    let (page, total) = gateway
        .log_store()
        .search_logs(
            &LogFilters::default(),
            &Pagination {
                offset: 0,
                limit: 2,
                newest_first: true,
            },
        )
        .await?;
    assert_eq!(total, 5);
    assert_eq!(page.len(), 2);

    let stats = gateway.log_store().get_stats(&LogFilters::default()).await?;
    assert_eq!(stats.success_requests, 5);
    assert!(stats.total_tokens > 0);
    gateway.shutdown().await;
    Ok(())
}
