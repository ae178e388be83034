//! Async batched logger
//!
//! One row per request attempt. The pre-hook parks the input-side fields
//! in a concurrent pending map and fires the live view without touching
//! the store; the post-hook joins them with the outcome and enqueues the
//! finished row. A single writer task drains the bounded queue in
//! batches; post-commit callbacks run on one dedicated task so a burst of
//! commits cannot fan out into a task storm.

pub mod store;

pub use store::{
    HistogramBucket, LogEntry, LogFilters, LogStats, LogStatus, LogStore, McpToolLogEntry,
    McpToolLogStore, MemoryLogStore, MemoryMcpToolLogStore, ModelHistogramBucket, Pagination,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::config::LoggerConfig;
use crate::core::plugins::{LlmResult, Plugin, ShortCircuit};
use crate::core::streaming::AccumulatedData;
use crate::core::trace::Tracer;
use crate::core::types::context::keys;
use crate::core::types::{
    ChatMessage, GatewayRequest, ProviderType, RequestContext, RequestInput, RequestKind,
    RequestParams, StreamChunk, Tool,
};
use crate::utils::error::Result;

/// Live-view callback fired on "processing" snapshots and committed rows
pub type LiveCallback = Arc<dyn Fn(&LogEntry) + Send + Sync>;

/// Input-side fields parked between pre- and post-hook
#[derive(Debug, Clone)]
struct PendingLogData {
    request_id: String,
    parent_request_id: Option<String>,
    fallback_index: usize,
    provider: ProviderType,
    model: String,
    request_type: RequestKind,
    stream: bool,
    created_at: DateTime<Utc>,
    parked_at: Instant,
    input_history: Option<Vec<ChatMessage>>,
    input_text: Option<String>,
    params: RequestParams,
    tools: Option<Vec<Tool>>,
    routing_engines: Vec<String>,
    logging_headers: HashMap<String, String>,
}

struct WriteOp {
    entry: LogEntry,
    notify: bool,
}

/// The logger plugin
pub struct LoggerPlugin {
    pending: DashMap<String, PendingLogData>,
    sender: parking_lot::Mutex<Option<mpsc::Sender<WriteOp>>>,
    store: Arc<dyn LogStore>,
    tracer: Arc<Tracer>,
    callback: Option<LiveCallback>,
    closed: AtomicBool,
    dropped_requests: AtomicU64,
    writer: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    janitor: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl LoggerPlugin {
    /// Start the logger: writer task, callback task and janitor
    pub fn new(
        config: &LoggerConfig,
        store: Arc<dyn LogStore>,
        tracer: Arc<Tracer>,
        callback: Option<LiveCallback>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<WriteOp>(config.queue_capacity);
        let plugin = Arc::new(Self {
            pending: DashMap::new(),
            sender: parking_lot::Mutex::new(Some(tx)),
            store,
            tracer,
            callback,
            closed: AtomicBool::new(false),
            dropped_requests: AtomicU64::new(0),
            writer: parking_lot::Mutex::new(None),
            janitor: parking_lot::Mutex::new(None),
        });

        let writer = tokio::spawn(Self::writer_loop(
            rx,
            plugin.store.clone(),
            plugin.callback.clone(),
            config.max_batch_size,
            config.batch_interval(),
        ));
        let janitor = tokio::spawn(Self::janitor_loop(Arc::downgrade(&plugin), config.clone()));
        *plugin.writer.lock() = Some(writer);
        *plugin.janitor.lock() = Some(janitor);
        plugin
    }

    /// Requests dropped because the logger was already closed
    pub fn dropped_requests(&self) -> u64 {
        self.dropped_requests.load(Ordering::Relaxed)
    }

    /// Pending pre-hook records currently parked
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    async fn writer_loop(
        mut rx: mpsc::Receiver<WriteOp>,
        store: Arc<dyn LogStore>,
        callback: Option<LiveCallback>,
        max_batch_size: usize,
        batch_interval: std::time::Duration,
    ) {
        // Committed rows fan into one dedicated callback task
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<LogEntry>();
        let callback_task = tokio::spawn(async move {
            while let Some(entry) = notify_rx.recv().await {
                if let Some(callback) = &callback {
                    callback(&entry);
                }
            }
        });

        let mut batch: Vec<WriteOp> = Vec::with_capacity(max_batch_size);
        let mut ticker = tokio::time::interval(batch_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                op = rx.recv() => match op {
                    Some(op) => {
                        batch.push(op);
                        if batch.len() >= max_batch_size {
                            Self::flush_batch(&store, &notify_tx, &mut batch).await;
                        }
                    }
                    None => {
                        Self::flush_batch(&store, &notify_tx, &mut batch).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        Self::flush_batch(&store, &notify_tx, &mut batch).await;
                    }
                }
            }
        }
        drop(notify_tx);
        let _ = callback_task.await;
    }

    async fn flush_batch(
        store: &Arc<dyn LogStore>,
        notify_tx: &mpsc::UnboundedSender<LogEntry>,
        batch: &mut Vec<WriteOp>,
    ) {
        if batch.is_empty() {
            return;
        }
        let ops: Vec<WriteOp> = batch.drain(..).collect();
        let entries: Vec<LogEntry> = ops.iter().map(|op| op.entry.clone()).collect();
        let count = entries.len();
        match store.batch_create_if_not_exists(entries).await {
            Ok(inserted) => debug!(batch = count, inserted, "log batch committed"),
            Err(e) => {
                error!(%e, batch = count, "log batch write failed");
                return;
            }
        }
        for op in ops {
            if op.notify {
                let _ = notify_tx.send(op.entry);
            }
        }
    }

    async fn janitor_loop(plugin: std::sync::Weak<Self>, config: LoggerConfig) {
        let mut ticker = tokio::time::interval(config.janitor_period());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(plugin) = plugin.upgrade() else { break };

            let pending_ttl = config.pending_ttl();
            let now = Instant::now();
            let before = plugin.pending.len();
            plugin
                .pending
                .retain(|_, pending| now.duration_since(pending.parked_at) < pending_ttl);
            let expired = before - plugin.pending.len();
            if expired > 0 {
                warn!(expired, "expired pending log records dropped");
            }

            if config.retention_secs > 0 {
                let cutoff = Utc::now() - chrono::Duration::seconds(config.retention_secs as i64);
                match plugin.store.flush(cutoff).await {
                    Ok(0) => {}
                    Ok(deleted) => debug!(deleted, "retention flush"),
                    Err(e) => error!(%e, "retention flush failed"),
                }
            }
        }
    }

    /// Queue a finished row. Closed logger drops silently; a full queue
    /// degrades from try_send to a blocking send (backpressure).
    async fn enqueue(&self, entry: LogEntry) {
        if self.closed.load(Ordering::Acquire) {
            self.dropped_requests.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let Some(sender) = self.sender.lock().clone() else {
            self.dropped_requests.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let op = WriteOp {
            entry,
            notify: self.callback.is_some(),
        };
        match sender.try_send(op) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(op)) => {
                if sender.send(op).await.is_err() {
                    self.dropped_requests.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped_requests.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn pending_from_request(request: &GatewayRequest) -> PendingLogData {
        let (input_history, input_text) = match &request.input {
            RequestInput::Chat { messages } | RequestInput::Responses { input: messages } => {
                (Some(messages.clone()), None)
            }
            RequestInput::Text { prompt } => (None, Some(prompt.clone())),
            RequestInput::Speech { input, .. } => (None, Some(input.clone())),
            RequestInput::ImageGeneration { prompt, .. } => (None, Some(prompt.clone())),
            RequestInput::Rerank { query, .. } => (None, Some(query.clone())),
            RequestInput::Embedding { input } => (None, Some(input.join("\n"))),
            RequestInput::Transcription { .. } | RequestInput::ListModels => (None, None),
        };
        let routing_engines = request
            .context
            .get_json(keys::ROUTING_ENGINES_USED)
            .and_then(|v| v.as_array())
            .map(|engines| {
                engines
                    .iter()
                    .filter_map(|e| e.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        PendingLogData {
            request_id: request.context.request_id().to_string(),
            parent_request_id: request.context.parent_request_id().map(str::to_string),
            fallback_index: request.context.fallback_index(),
            provider: request.provider.clone(),
            model: request.model.clone(),
            request_type: request.kind(),
            stream: request.stream,
            created_at: Utc::now(),
            parked_at: Instant::now(),
            input_history,
            input_text,
            params: request.params.clone(),
            tools: request.params.tools.clone(),
            routing_engines,
            logging_headers: HashMap::new(),
        }
    }

    fn row_skeleton(pending: PendingLogData) -> LogEntry {
        LogEntry {
            request_id: pending.request_id,
            parent_request_id: pending.parent_request_id,
            fallback_index: pending.fallback_index,
            provider: pending.provider,
            model: pending.model,
            request_type: pending.request_type,
            stream: pending.stream,
            status: LogStatus::Processing,
            created_at: pending.created_at,
            completed_at: None,
            input_history: pending.input_history,
            input_text: pending.input_text,
            params: Some(pending.params),
            tools: pending.tools,
            output_content: None,
            output_tool_calls: None,
            finish_reason: None,
            usage: None,
            error: None,
            cache_debug: None,
            cost: None,
            latency_ms: None,
            ttft_ms: None,
            routing_engines: pending.routing_engines,
            logging_headers: pending.logging_headers,
        }
    }

    fn take_pending(&self, ctx: &RequestContext) -> PendingLogData {
        match self.pending.remove(ctx.request_id()) {
            Some((_, pending)) => pending,
            None => {
                warn!(request_id = ctx.request_id(), "post-hook without pending record");
                PendingLogData {
                    request_id: ctx.request_id().to_string(),
                    parent_request_id: ctx.parent_request_id().map(str::to_string),
                    fallback_index: ctx.fallback_index(),
                    provider: ProviderType::Custom("unknown".into()),
                    model: String::new(),
                    request_type: RequestKind::Chat,
                    stream: false,
                    created_at: Utc::now(),
                    parked_at: Instant::now(),
                    input_history: None,
                    input_text: None,
                    params: RequestParams::default(),
                    tools: None,
                    routing_engines: Vec::new(),
                    logging_headers: HashMap::new(),
                }
            }
        }
    }

    fn row_from_unary(&self, ctx: &RequestContext, result: &LlmResult) -> LogEntry {
        let mut row = Self::row_skeleton(self.take_pending(ctx));
        row.completed_at = Some(Utc::now());
        match (&result.response, &result.error) {
            (_, Some(error)) => {
                row.status = LogStatus::Error;
                row.error = Some(error.to_string());
            }
            (Some(response), None) => {
                row.status = LogStatus::Success;
                row.output_content = response.content_text();
                row.finish_reason = response.finish_reason().map(str::to_string);
                row.usage = response.usage.clone();
                row.cache_debug = response.extra.cache_debug.clone();
                row.latency_ms = response.extra.latency_ms;
                if let crate::core::types::ResponsePayload::Chat { choices } = &response.payload {
                    row.output_tool_calls =
                        choices.first().and_then(|c| c.message.tool_calls.clone());
                }
            }
            (None, None) => {
                row.status = LogStatus::Error;
                row.error = Some("post-hook chain produced no outcome".into());
            }
        }
        row
    }

    fn row_from_aggregate(&self, ctx: &RequestContext, data: &AccumulatedData) -> LogEntry {
        let mut row = Self::row_skeleton(self.take_pending(ctx));
        row.completed_at = Some(Utc::now());
        if let Some(error) = &data.error {
            row.status = LogStatus::Error;
            row.error = Some(error.message.clone());
        } else {
            row.status = LogStatus::Success;
        }
        // Partial output before a terminal error is still recorded
        row.output_content = data.content.clone().or_else(|| data.text.clone());
        row.output_tool_calls = (!data.tool_calls.is_empty()).then(|| data.tool_calls.clone());
        row.finish_reason = data.finish_reason.clone();
        row.usage = data.usage.clone();
        row.cost = data.cost;
        row.cache_debug = data.cache_debug.clone();
        let id = ctx
            .get_str(keys::ACCUMULATOR_ID)
            .unwrap_or(ctx.request_id());
        if let Some(timings) = self.tracer.accumulator().timings(id) {
            row.ttft_ms = timings.ttft.map(|d| d.as_millis() as u64);
            row.latency_ms = timings.total.map(|d| d.as_millis() as u64);
        }
        row
    }

    /// Stop accepting rows, flush the queue, stop the worker tasks
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the sender lets the writer drain and exit
        self.sender.lock().take();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
        if let Some(janitor) = self.janitor.lock().take() {
            janitor.abort();
        }
    }
}

#[async_trait]
impl Plugin for LoggerPlugin {
    fn name(&self) -> &str {
        "logger"
    }

    async fn pre_llm_hook(&self, request: &mut GatewayRequest) -> Result<Option<ShortCircuit>> {
        let pending = Self::pending_from_request(request);
        // Live view gets a processing snapshot; the store is not touched
        if let Some(callback) = &self.callback {
            callback(&Self::row_skeleton(pending.clone()));
        }
        self.pending.insert(pending.request_id.clone(), pending);
        Ok(None)
    }

    async fn post_llm_hook(&self, ctx: &mut RequestContext, result: &mut LlmResult) -> Result<()> {
        let row = self.row_from_unary(ctx, result);
        self.enqueue(row).await;
        Ok(())
    }

    async fn post_stream_chunk_hook(
        &self,
        ctx: &mut RequestContext,
        chunk: &mut StreamChunk,
    ) -> Result<()> {
        // Non-final chunks only advance the accumulator; the single row
        // write happens when the final aggregate materialises.
        if let Some(aggregate) = self.tracer.process_streaming_chunk(ctx, chunk) {
            let row = self.row_from_aggregate(ctx, &aggregate);
            self.enqueue(row).await;
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        self.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ChatDelta, ChunkDelta, MessageRole};
    use crate::core::types::{GatewayResponse, ResponsePayload};

    fn logger_with_store() -> (Arc<LoggerPlugin>, Arc<MemoryLogStore>, Arc<Tracer>) {
        let store = Arc::new(MemoryLogStore::new());
        let tracer = Arc::new(Tracer::default());
        let config = LoggerConfig {
            batch_interval_ms: 5,
            ..Default::default()
        };
        let logger = LoggerPlugin::new(&config, store.clone(), tracer.clone(), None);
        (logger, store, tracer)
    }

    fn chat_request() -> GatewayRequest {
        GatewayRequest::new(
            ProviderType::Mock,
            "mock-model",
            RequestInput::Chat {
                messages: vec![ChatMessage::text(MessageRole::User, "hi")],
            },
        )
    }

    fn ok_response(request: &GatewayRequest, content: &str) -> GatewayResponse {
        GatewayResponse {
            id: "r".into(),
            created: Utc::now().timestamp(),
            model: request.model.clone(),
            payload: ResponsePayload::Chat {
                choices: vec![crate::core::types::ChatChoice {
                    index: 0,
                    message: ChatMessage::text(MessageRole::Assistant, content),
                    finish_reason: Some("stop".into()),
                }],
            },
            usage: Some(crate::core::types::Usage::new(5, 7)),
            extra: crate::core::types::ExtraFields::new(
                request.provider.clone(),
                &request.model,
                request.kind(),
            ),
        }
    }

    async fn wait_for_rows(store: &MemoryLogStore, count: u64) {
        for _ in 0..200 {
            let stats = store.get_stats(&LogFilters::default()).await.unwrap();
            if stats.total_requests >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("rows never materialised");
    }

    #[tokio::test]
    async fn test_pre_and_post_produce_exactly_one_row() {
        let (logger, store, _) = logger_with_store();
        let mut request = chat_request();

        logger.pre_llm_hook(&mut request).await.unwrap();
        assert_eq!(logger.pending_len(), 1);

        let mut ctx = request.context.clone();
        let mut result = LlmResult::ok(ok_response(&request, "hello"));
        logger.post_llm_hook(&mut ctx, &mut result).await.unwrap();
        assert_eq!(logger.pending_len(), 0);

        wait_for_rows(&store, 1).await;
        let row = store
            .find_first(&LogFilters {
                request_id: Some(request.context.request_id().to_string()),
                ..Default::default()
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, LogStatus::Success);
        assert_eq!(row.output_content.as_deref(), Some("hello"));
        assert_eq!(row.usage.as_ref().unwrap().total_tokens, 12);

        // the same request id never yields a second row
        let mut result = LlmResult::ok(ok_response(&request, "again"));
        logger.post_llm_hook(&mut ctx, &mut result).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let stats = store.get_stats(&LogFilters::default()).await.unwrap();
        assert_eq!(stats.total_requests, 1);
    }

    #[tokio::test]
    async fn test_streaming_chunks_coalesce_into_one_row() {
        let (logger, store, _) = logger_with_store();
        let mut request = chat_request();
        request.stream = true;
        logger.pre_llm_hook(&mut request).await.unwrap();

        let mut ctx = request.context.clone();
        let id = ctx.request_id().to_string();
        let mut chunks = vec![
            StreamChunk::delta(
                &id,
                "mock-model",
                0,
                ChunkDelta::Chat(ChatDelta {
                    content: Some("str".into()),
                    ..Default::default()
                }),
            ),
            StreamChunk::delta(
                &id,
                "mock-model",
                1,
                ChunkDelta::Chat(ChatDelta {
                    content: Some("eam".into()),
                    ..Default::default()
                }),
            ),
        ];
        let mut terminal = StreamChunk::delta(&id, "mock-model", 2, ChunkDelta::Chat(ChatDelta::default()));
        terminal.finish_reason = Some("stop".into());
        chunks.push(terminal);

        for chunk in &mut chunks {
            logger.post_stream_chunk_hook(&mut ctx, chunk).await.unwrap();
        }

        wait_for_rows(&store, 1).await;
        let row = store
            .find_first(&LogFilters {
                request_id: Some(id),
                ..Default::default()
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, LogStatus::Success);
        assert_eq!(row.output_content.as_deref(), Some("stream"));
        assert!(row.stream);
        assert_eq!(logger.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_error_result_records_error_row() {
        let (logger, store, _) = logger_with_store();
        let mut request = chat_request();
        logger.pre_llm_hook(&mut request).await.unwrap();

        let mut ctx = request.context.clone();
        let mut result = LlmResult::err(crate::utils::error::GatewayError::ProviderAPI {
            status: 500,
            error_type: None,
            error_code: None,
            message: "boom".into(),
        });
        logger.post_llm_hook(&mut ctx, &mut result).await.unwrap();

        wait_for_rows(&store, 1).await;
        let stats = store.get_stats(&LogFilters::default()).await.unwrap();
        assert_eq!(stats.error_requests, 1);
    }

    #[tokio::test]
    async fn test_closed_logger_drops_silently() {
        let (logger, store, _) = logger_with_store();
        let mut request = chat_request();
        logger.pre_llm_hook(&mut request).await.unwrap();
        logger.shutdown().await;

        let mut ctx = request.context.clone();
        let mut result = LlmResult::ok(ok_response(&request, "late"));
        logger.post_llm_hook(&mut ctx, &mut result).await.unwrap();
        assert_eq!(logger.dropped_requests(), 1);
        let stats = store.get_stats(&LogFilters::default()).await.unwrap();
        assert_eq!(stats.total_requests, 0);
    }

    #[tokio::test]
    async fn test_live_callback_sees_processing_then_commit() {
        let store = Arc::new(MemoryLogStore::new());
        let tracer = Arc::new(Tracer::default());
        let seen: Arc<parking_lot::Mutex<Vec<LogStatus>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: LiveCallback = Arc::new(move |entry| sink.lock().push(entry.status));
        let config = LoggerConfig {
            batch_interval_ms: 5,
            ..Default::default()
        };
        let logger = LoggerPlugin::new(&config, store.clone(), tracer, Some(callback));

        let mut request = chat_request();
        logger.pre_llm_hook(&mut request).await.unwrap();
        let mut ctx = request.context.clone();
        let mut result = LlmResult::ok(ok_response(&request, "x"));
        logger.post_llm_hook(&mut ctx, &mut result).await.unwrap();

        for _ in 0..200 {
            if seen.lock().len() >= 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let seen = seen.lock();
        assert_eq!(seen[0], LogStatus::Processing);
        assert_eq!(seen[1], LogStatus::Success);
    }
}
