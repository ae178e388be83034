//! Semantic cache plugin
//!
//! Serves repeated requests from a vector store: an exact-hash lookup
//! first, then (unless restricted) a vector-similarity search under
//! strict metadata filters. Misses proceed to the provider and are
//! inserted by the post-hook; streamed responses are captured chunk by
//! chunk and stored as a replayable sequence.

pub mod embedder;
pub mod normalize;

pub use embedder::{Embedder, ProviderEmbedder, TextHashEmbedder};
pub use normalize::{normalize_input, params_hash, request_hash};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, error, info, warn};

use crate::config::{CacheType, SemanticCacheConfig};
use crate::core::plugins::{LlmResult, Plugin, ShortCircuit};
use crate::core::types::{
    CacheDebug, ContextValue, GatewayRequest, GatewayResponse, RequestContext, RequestKind,
    StreamChunk,
};
use crate::storage::vector::{Query, VectorEntry, VectorStore};
use crate::utils::error::Result;

const CTX_REQUEST_HASH: &str = "semantic_cache.request_hash";
const CTX_EMBEDDING: &str = "semantic_cache.embedding";
const CTX_CACHE_KEY: &str = "semantic_cache.resolved_key";
const CTX_SERVED_FROM_CACHE: &str = "semantic_cache.served_from_cache";
const CTX_PARAMS_HASH: &str = "semantic_cache.params_hash";
const CTX_TTL_SECS: &str = "semantic_cache.resolved_ttl";
const CTX_STREAM: &str = "semantic_cache.stream";
const CTX_PROVIDER: &str = "semantic_cache.provider";
const CTX_MODEL: &str = "semantic_cache.model";

const F_MARKER: &str = "from_semantic_cache_plugin";
const F_REQUEST_HASH: &str = "request_hash";
const F_CACHE_KEY: &str = "cache_key";
const F_PROVIDER: &str = "provider";
const F_MODEL: &str = "model";
const F_PARAMS_HASH: &str = "params_hash";
const F_STREAM: &str = "stream";
const F_EXPIRES_AT: &str = "expires_at";
const F_RESPONSE: &str = "response";
const F_STREAM_RESPONSES: &str = "stream_responses";

const TTL_SWEEP_PERIOD: Duration = Duration::from_secs(60);
const CLEANUP_BATCH: usize = 100;

/// The semantic cache plugin
pub struct SemanticCachePlugin {
    config: SemanticCacheConfig,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    namespace_ready: OnceCell<()>,
    // per-request chunk capture for streamed insertions; isolated from
    // the tracer's accumulator on purpose
    captured_streams: DashMap<String, Vec<StreamChunk>>,
    sweeper: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SemanticCachePlugin {
    /// Build the plugin and start its TTL sweeper
    pub fn new(
        config: SemanticCacheConfig,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Arc<Self> {
        info!(
            threshold = config.threshold,
            ttl_secs = config.ttl_secs,
            namespace = config.namespace(),
            "semantic cache initialised"
        );
        let plugin = Arc::new(Self {
            config,
            store,
            embedder,
            namespace_ready: OnceCell::new(),
            captured_streams: DashMap::new(),
            sweeper: parking_lot::Mutex::new(None),
        });
        let weak = Arc::downgrade(&plugin);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TTL_SWEEP_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(plugin) = weak.upgrade() else { break };
                if let Err(e) = plugin.sweep_expired().await {
                    warn!(%e, "cache TTL sweep failed");
                }
            }
        });
        *plugin.sweeper.lock() = Some(handle);
        plugin
    }

    async fn ensure_namespace(&self) -> Result<()> {
        self.namespace_ready
            .get_or_try_init(|| async {
                self.store
                    .create_namespace(
                        self.config.namespace(),
                        self.embedder.dimension(),
                        &[
                            F_REQUEST_HASH.to_string(),
                            F_CACHE_KEY.to_string(),
                            F_PROVIDER.to_string(),
                            F_MODEL.to_string(),
                            F_PARAMS_HASH.to_string(),
                        ],
                    )
                    .await
            })
            .await
            .map(|_| ())
    }

    /// Kinds never served from or inserted into the cache
    fn kind_excluded(kind: RequestKind) -> bool {
        matches!(
            kind,
            RequestKind::Embedding | RequestKind::Transcription | RequestKind::ListModels
        )
    }

    fn resolved_cache_type(&self, ctx: &RequestContext) -> Option<CacheType> {
        match ctx.get_str(&self.config.cache_type_key) {
            Some("direct") => Some(CacheType::Direct),
            Some("semantic") => Some(CacheType::Semantic),
            _ => self.config.default_cache_type,
        }
    }

    fn resolved_ttl(&self, ctx: &RequestContext) -> Duration {
        ctx.get_int(&self.config.cache_ttl_key)
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or_else(|| self.config.ttl())
    }

    fn resolved_threshold(&self, ctx: &RequestContext) -> f64 {
        ctx.get_float(&self.config.cache_threshold_key)
            .filter(|t| (0.0..=1.0).contains(t))
            .unwrap_or(self.config.threshold)
    }

    /// Strict filters shared by both lookup paths
    fn base_queries(
        &self,
        request: &GatewayRequest,
        cache_key: &str,
        params_hash_value: &str,
    ) -> Vec<Query> {
        let mut queries = vec![
            Query::eq(F_MARKER, true),
            Query::eq(F_CACHE_KEY, cache_key),
            Query::eq(F_PARAMS_HASH, params_hash_value),
            Query::eq(F_STREAM, request.stream),
        ];
        if self.config.cache_by_provider {
            queries.push(Query::eq(F_PROVIDER, request.provider.to_string()));
        }
        if self.config.cache_by_model {
            queries.push(Query::eq(F_MODEL, request.model.clone()));
        }
        queries
    }

    fn entry_expired(entry: &VectorEntry) -> bool {
        entry
            .metadata
            .get(F_EXPIRES_AT)
            .and_then(|v| v.as_i64())
            .map(|expires_at| expires_at < Utc::now().timestamp())
            .unwrap_or(false)
    }

    /// Expired entries are misses; their deletion is fire-and-forget
    fn delete_async(&self, id: String) {
        let store = self.store.clone();
        let namespace = self.config.namespace().to_string();
        tokio::spawn(async move {
            if let Err(e) = store.delete(&namespace, &id).await {
                warn!(%e, %id, "async delete of expired cache entry failed");
            }
        });
    }

    fn cache_debug(&self, hit_type: &str, entry: &VectorEntry, threshold: f64) -> CacheDebug {
        CacheDebug {
            cache_hit: true,
            hit_type: Some(hit_type.to_string()),
            cache_id: Some(entry.id.clone()),
            threshold: Some(threshold),
            similarity: entry.score.map(|s| s as f64),
        }
    }

    /// Rebuild a short-circuit from a stored entry, unary or streamed
    fn hit_to_short_circuit(
        &self,
        entry: &VectorEntry,
        ctx: &mut RequestContext,
        hit_type: &str,
        threshold: f64,
    ) -> Option<ShortCircuit> {
        let debug_info = self.cache_debug(hit_type, entry, threshold);
        if let Some(serialized) = entry.metadata.get(F_RESPONSE).and_then(|v| v.as_str()) {
            match serde_json::from_str::<GatewayResponse>(serialized) {
                Ok(mut response) => {
                    response.extra.cache_debug = Some(debug_info);
                    ctx.set(CTX_SERVED_FROM_CACHE, ContextValue::Bool(true));
                    return Some(ShortCircuit::with_response(response));
                }
                Err(e) => {
                    warn!(%e, id = %entry.id, "cached response failed to decode, treating as miss");
                    self.delete_async(entry.id.clone());
                    return None;
                }
            }
        }
        if let Some(serialized_chunks) =
            entry.metadata.get(F_STREAM_RESPONSES).and_then(|v| v.as_array())
        {
            let mut chunks: Vec<StreamChunk> = Vec::with_capacity(serialized_chunks.len());
            for serialized in serialized_chunks {
                let Some(text) = serialized.as_str() else { continue };
                match serde_json::from_str::<StreamChunk>(text) {
                    Ok(chunk) => chunks.push(chunk),
                    Err(e) => {
                        warn!(%e, id = %entry.id, "cached stream chunk failed to decode, treating as miss");
                        self.delete_async(entry.id.clone());
                        return None;
                    }
                }
            }
            if let Some(last) = chunks.last_mut() {
                last.cache_debug = Some(debug_info);
            }
            ctx.set(CTX_SERVED_FROM_CACHE, ContextValue::Bool(true));
            let (tx, rx) = mpsc::channel(chunks.len().max(1));
            tokio::spawn(async move {
                for chunk in chunks {
                    if tx.send(Ok(chunk)).await.is_err() {
                        break;
                    }
                }
            });
            return Some(ShortCircuit::with_stream(rx));
        }
        None
    }

    async fn direct_lookup(
        &self,
        request: &GatewayRequest,
        queries: &[Query],
    ) -> Result<Option<VectorEntry>> {
        let mut direct_queries = queries.to_vec();
        let hash = request
            .context
            .get_str(CTX_REQUEST_HASH)
            .unwrap_or_default()
            .to_string();
        direct_queries.push(Query::eq(F_REQUEST_HASH, hash));

        let mut cursor = None;
        loop {
            let page = self
                .store
                .get_all(self.config.namespace(), &direct_queries, &[], cursor, 16)
                .await?;
            for entry in page.entries {
                if Self::entry_expired(&entry) {
                    self.delete_async(entry.id.clone());
                    continue;
                }
                return Ok(Some(entry));
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(None),
            }
        }
    }

    async fn semantic_lookup(
        &self,
        vector: &[f32],
        queries: &[Query],
        threshold: f64,
    ) -> Result<Option<VectorEntry>> {
        let results = self
            .store
            .get_nearest(self.config.namespace(), vector, queries, &[], threshold, 4)
            .await?;
        for entry in results {
            if Self::entry_expired(&entry) {
                self.delete_async(entry.id.clone());
                continue;
            }
            return Ok(Some(entry));
        }
        Ok(None)
    }

    fn unified_metadata(
        &self,
        ctx: &RequestContext,
        expires_at: i64,
    ) -> HashMap<String, serde_json::Value> {
        let mut metadata = HashMap::new();
        metadata.insert(F_MARKER.to_string(), json!(true));
        metadata.insert(
            F_REQUEST_HASH.to_string(),
            json!(ctx.get_str(CTX_REQUEST_HASH).unwrap_or_default()),
        );
        metadata.insert(
            F_CACHE_KEY.to_string(),
            json!(ctx.get_str(CTX_CACHE_KEY).unwrap_or_default()),
        );
        metadata.insert(
            F_PARAMS_HASH.to_string(),
            json!(ctx.get_str(CTX_PARAMS_HASH).unwrap_or_default()),
        );
        metadata.insert(
            F_PROVIDER.to_string(),
            json!(ctx.get_str(CTX_PROVIDER).unwrap_or_default()),
        );
        metadata.insert(
            F_MODEL.to_string(),
            json!(ctx.get_str(CTX_MODEL).unwrap_or_default()),
        );
        metadata.insert(
            F_STREAM.to_string(),
            json!(ctx.get_bool(CTX_STREAM).unwrap_or(false)),
        );
        metadata.insert(F_EXPIRES_AT.to_string(), json!(expires_at));
        metadata
    }

    fn stashed_embedding(ctx: &RequestContext) -> Option<Vec<f32>> {
        ctx.get_json(CTX_EMBEDDING).and_then(|value| {
            value.as_array().map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            })
        })
    }

    async fn insert_unary(&self, ctx: &RequestContext, response: &GatewayResponse) -> Result<()> {
        let ttl_secs = ctx
            .get_int(CTX_TTL_SECS)
            .unwrap_or(self.config.ttl_secs as i64);
        let expires_at = Utc::now().timestamp() + ttl_secs;
        let mut metadata = self.unified_metadata(ctx, expires_at);
        metadata.insert(F_RESPONSE.to_string(), json!(serde_json::to_string(response)?));
        self.store
            .add(
                self.config.namespace(),
                ctx.request_id(),
                Self::stashed_embedding(ctx),
                metadata,
            )
            .await?;
        debug!(request_id = ctx.request_id(), "response cached");
        Ok(())
    }

    async fn insert_stream(&self, ctx: &RequestContext, chunks: &[StreamChunk]) -> Result<()> {
        let ttl_secs = ctx
            .get_int(CTX_TTL_SECS)
            .unwrap_or(self.config.ttl_secs as i64);
        let expires_at = Utc::now().timestamp() + ttl_secs;
        let mut metadata = self.unified_metadata(ctx, expires_at);
        let serialized: Vec<String> = chunks
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<_, _>>()?;
        metadata.insert(F_STREAM_RESPONSES.to_string(), json!(serialized));
        self.store
            .add(
                self.config.namespace(),
                ctx.request_id(),
                Self::stashed_embedding(ctx),
                metadata,
            )
            .await?;
        debug!(
            request_id = ctx.request_id(),
            chunks = chunks.len(),
            "stream cached"
        );
        Ok(())
    }

    /// Delete expired entries in batches
    async fn sweep_expired(&self) -> Result<()> {
        if self.namespace_ready.get().is_none() {
            return Ok(());
        }
        let marker = [Query::eq(F_MARKER, true)];
        let mut cursor = None;
        let mut expired = Vec::new();
        loop {
            let page = self
                .store
                .get_all(
                    self.config.namespace(),
                    &marker,
                    &[F_EXPIRES_AT.to_string()],
                    cursor,
                    CLEANUP_BATCH,
                )
                .await?;
            for entry in &page.entries {
                if Self::entry_expired(entry) {
                    expired.push(entry.id.clone());
                }
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        if expired.is_empty() {
            return Ok(());
        }
        debug!(count = expired.len(), "sweeping expired cache entries");
        for batch in expired.chunks(CLEANUP_BATCH) {
            for id in batch {
                self.store.delete(self.config.namespace(), id).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Plugin for SemanticCachePlugin {
    fn name(&self) -> &str {
        "semantic-cache"
    }

    async fn pre_llm_hook(&self, request: &mut GatewayRequest) -> Result<Option<ShortCircuit>> {
        // No client cache key, no caching
        let Some(cache_key) = request.context.get_str(&self.config.cache_key).map(str::to_string)
        else {
            return Ok(None);
        };
        if Self::kind_excluded(request.kind()) {
            return Ok(None);
        }
        if self.config.conversation_history_threshold > 0 {
            if let Some(messages) = request.input.messages() {
                if messages.len() > self.config.conversation_history_threshold {
                    debug!(
                        request_id = request.context.request_id(),
                        messages = messages.len(),
                        "conversation too long, cache skipped"
                    );
                    return Ok(None);
                }
            }
        }
        self.ensure_namespace().await?;

        let normalized = normalize_input(&request.input, self.config.exclude_system_prompt);
        let hash = request_hash(&normalized, &request.params, request.stream);
        let params_hash_value = params_hash(&request.params);
        let ttl = self.resolved_ttl(&request.context);
        let threshold = self.resolved_threshold(&request.context);
        let cache_type = self.resolved_cache_type(&request.context);

        request
            .context
            .set(CTX_REQUEST_HASH, ContextValue::Str(hash));
        request
            .context
            .set(CTX_CACHE_KEY, ContextValue::Str(cache_key));
        request
            .context
            .set(CTX_PARAMS_HASH, ContextValue::Str(params_hash_value.clone()));
        request
            .context
            .set(CTX_PROVIDER, ContextValue::Str(request.provider.to_string()));
        request
            .context
            .set(CTX_MODEL, ContextValue::Str(request.model.clone()));
        request
            .context
            .set(CTX_STREAM, ContextValue::Bool(request.stream));
        request
            .context
            .set(CTX_TTL_SECS, ContextValue::Int(ttl.as_secs() as i64));

        let cache_key = request
            .context
            .get_str(CTX_CACHE_KEY)
            .unwrap_or_default()
            .to_string();
        let queries = self.base_queries(request, &cache_key, &params_hash_value);

        if cache_type != Some(CacheType::Semantic) {
            if let Some(entry) = self.direct_lookup(request, &queries).await? {
                info!(request_id = request.context.request_id(), id = %entry.id, "direct cache hit");
                if let Some(short_circuit) =
                    self.hit_to_short_circuit(&entry, &mut request.context, "direct", threshold)
                {
                    return Ok(Some(short_circuit));
                }
            }
        }

        if cache_type == Some(CacheType::Direct) {
            return Ok(None);
        }

        let embedding = self
            .embedder
            .embed(&self.config.embedding_model, &normalized)
            .await;
        let embedding = match embedding {
            Ok(embedding) => embedding,
            Err(e) => {
                // Embedding trouble degrades to a cache bypass
                warn!(%e, "embedding failed, cache bypassed");
                return Ok(None);
            }
        };

        if let Some(entry) = self.semantic_lookup(&embedding, &queries, threshold).await? {
            info!(
                request_id = request.context.request_id(),
                id = %entry.id,
                similarity = entry.score.unwrap_or_default(),
                "semantic cache hit"
            );
            if let Some(short_circuit) =
                self.hit_to_short_circuit(&entry, &mut request.context, "semantic", threshold)
            {
                return Ok(Some(short_circuit));
            }
        }

        // Miss: keep the embedding for the post-hook insertion
        request.context.set(
            CTX_EMBEDDING,
            ContextValue::Json(json!(embedding)),
        );
        Ok(None)
    }

    async fn post_llm_hook(&self, ctx: &mut RequestContext, result: &mut LlmResult) -> Result<()> {
        if result.error.is_some() {
            return Ok(());
        }
        let Some(response) = &result.response else {
            return Ok(());
        };
        // A hit served from the cache never re-inserts itself
        if response
            .extra
            .cache_debug
            .as_ref()
            .map(|d| d.cache_hit)
            .unwrap_or(false)
        {
            return Ok(());
        }
        if ctx.get_str(CTX_REQUEST_HASH).is_none() {
            return Ok(());
        }
        if let Err(e) = self.insert_unary(ctx, response).await {
            error!(%e, request_id = ctx.request_id(), "cache insertion failed");
        }
        Ok(())
    }

    async fn post_stream_chunk_hook(
        &self,
        ctx: &mut RequestContext,
        chunk: &mut StreamChunk,
    ) -> Result<()> {
        if ctx.get_str(CTX_REQUEST_HASH).is_none() {
            return Ok(());
        }
        if ctx.get_bool(CTX_SERVED_FROM_CACHE).unwrap_or(false) {
            return Ok(());
        }
        if chunk.error.is_some() {
            // Failed streams are never cached
            self.captured_streams.remove(ctx.request_id());
            return Ok(());
        }
        let is_final = chunk.is_final();
        self.captured_streams
            .entry(ctx.request_id().to_string())
            .or_default()
            .push(chunk.clone());
        if is_final {
            if let Some((_, chunks)) = self.captured_streams.remove(ctx.request_id()) {
                if let Err(e) = self.insert_stream(ctx, &chunks).await {
                    error!(%e, request_id = ctx.request_id(), "stream cache insertion failed");
                }
            }
        }
        Ok(())
    }

    /// Shutdown cleanup: remove every entry this plugin wrote, in batches
    async fn cleanup(&self) -> Result<()> {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        if self.namespace_ready.get().is_none() {
            return Ok(());
        }
        let marker = [Query::eq(F_MARKER, true)];
        let mut ids = Vec::new();
        let mut cursor = None;
        loop {
            let page = self
                .store
                .get_all(self.config.namespace(), &marker, &[], cursor, CLEANUP_BATCH)
                .await?;
            ids.extend(page.entries.into_iter().map(|entry| entry.id));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        info!(entries = ids.len(), "semantic cache cleanup");
        for batch in ids.chunks(CLEANUP_BATCH) {
            for id in batch {
                self.store.delete(self.config.namespace(), id).await?;
            }
        }
        self.store.close(self.config.namespace()).await
    }
}

impl Drop for SemanticCachePlugin {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        ChatChoice, ChatMessage, ExtraFields, MessageContent, MessageRole, ProviderType,
        RequestInput, ResponsePayload,
    };
    use crate::storage::vector::MemoryVectorStore;

    fn plugin() -> Arc<SemanticCachePlugin> {
        let config = SemanticCacheConfig {
            cache_key: "semantic_cache.cache_key".into(),
            ..Default::default()
        };
        SemanticCachePlugin::new(
            config,
            Arc::new(MemoryVectorStore::new()),
            Arc::new(TextHashEmbedder),
        )
    }

    fn request_for(content: &str) -> GatewayRequest {
        let mut request = GatewayRequest::new(
            ProviderType::OpenAI,
            "gpt-4o-mini",
            RequestInput::Chat {
                messages: vec![ChatMessage::text(MessageRole::User, content)],
            },
        );
        request.context.set(
            "semantic_cache.cache_key",
            ContextValue::Str("tenant".into()),
        );
        request
    }

    fn response_for(request: &GatewayRequest, content: &str) -> GatewayResponse {
        GatewayResponse {
            id: "resp".into(),
            created: Utc::now().timestamp(),
            model: request.model.clone(),
            payload: ResponsePayload::Chat {
                choices: vec![ChatChoice {
                    index: 0,
                    message: ChatMessage {
                        role: MessageRole::Assistant,
                        content: MessageContent::Text(content.into()),
                        name: None,
                        tool_calls: None,
                        tool_call_id: None,
                    },
                    finish_reason: Some("stop".into()),
                }],
            },
            usage: None,
            extra: ExtraFields::new(request.provider.clone(), &request.model, request.kind()),
        }
    }

    #[tokio::test]
    async fn test_no_cache_key_bypasses_everything() {
        let cache = plugin();
        let mut request = GatewayRequest::new(
            ProviderType::OpenAI,
            "gpt-4o-mini",
            RequestInput::Chat {
                messages: vec![ChatMessage::text(MessageRole::User, "hi")],
            },
        );
        let verdict = cache.pre_llm_hook(&mut request).await.unwrap();
        assert!(verdict.is_none());
        assert!(request.context.get_str(CTX_REQUEST_HASH).is_none());
    }

    #[tokio::test]
    async fn test_semantic_hit_on_near_identical_prompt() {
        let cache = plugin();

        let mut first = request_for("what is a gateway?");
        assert!(cache.pre_llm_hook(&mut first).await.unwrap().is_none());
        let mut ctx = first.context.clone();
        let mut result = crate::core::plugins::LlmResult::ok(response_for(&first, "it routes"));
        cache.post_llm_hook(&mut ctx, &mut result).await.unwrap();

        // same characters, different exact hash
        let mut second = request_for("what is a gateway??");
        let verdict = cache.pre_llm_hook(&mut second).await.unwrap();
        let short_circuit = verdict.expect("semantic hit");
        let response = short_circuit.response.expect("unary payload");
        assert_eq!(response.content_text().as_deref(), Some("it routes"));
        let debug_info = response.extra.cache_debug.unwrap();
        assert!(debug_info.cache_hit);
        assert_eq!(debug_info.hit_type.as_deref(), Some("semantic"));
        assert!(debug_info.similarity.unwrap_or_default() > 0.9);
    }

    #[tokio::test]
    async fn test_different_cache_keys_are_isolated() {
        let cache = plugin();

        let mut first = request_for("shared question");
        cache.pre_llm_hook(&mut first).await.unwrap();
        let mut ctx = first.context.clone();
        let mut result = crate::core::plugins::LlmResult::ok(response_for(&first, "answer"));
        cache.post_llm_hook(&mut ctx, &mut result).await.unwrap();

        let mut other_tenant = request_for("shared question");
        other_tenant.context.set(
            "semantic_cache.cache_key",
            ContextValue::Str("other".into()),
        );
        let verdict = cache.pre_llm_hook(&mut other_tenant).await.unwrap();
        assert!(verdict.is_none());
    }

    #[tokio::test]
    async fn test_conversation_history_threshold_skips_cache() {
        let config = SemanticCacheConfig {
            cache_key: "semantic_cache.cache_key".into(),
            conversation_history_threshold: 2,
            ..Default::default()
        };
        let cache = SemanticCachePlugin::new(
            config,
            Arc::new(MemoryVectorStore::new()),
            Arc::new(TextHashEmbedder),
        );

        let mut request = request_for("hi");
        let RequestInput::Chat { messages } = &mut request.input else {
            unreachable!()
        };
        messages.push(ChatMessage::text(MessageRole::Assistant, "hello"));
        messages.push(ChatMessage::text(MessageRole::User, "more"));

        let verdict = cache.pre_llm_hook(&mut request).await.unwrap();
        assert!(verdict.is_none());
        assert!(request.context.get_str(CTX_REQUEST_HASH).is_none());
    }

    #[tokio::test]
    async fn test_error_results_are_not_cached() {
        let cache = plugin();
        let mut request = request_for("failing question");
        cache.pre_llm_hook(&mut request).await.unwrap();

        let mut ctx = request.context.clone();
        let mut result = crate::core::plugins::LlmResult::err(
            crate::utils::error::GatewayError::Timeout("slow".into()),
        );
        cache.post_llm_hook(&mut ctx, &mut result).await.unwrap();

        let mut retry = request_for("failing question");
        assert!(cache.pre_llm_hook(&mut retry).await.unwrap().is_none());
    }
}
