//! Request tracing
//!
//! An in-memory trace/span graph plus the streaming accumulator. Spans
//! resolve their parent from the context's span id first, then an
//! incoming W3C traceparent, else they become roots. Streaming requests
//! keep a deferred span open until the final chunk materialises.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::core::streaming::{AccumulatedData, ProcessOutcome, StreamingAccumulator};
use crate::core::types::context::keys;
use crate::core::types::{ContextValue, RequestContext, StreamChunk};

/// One timestamped span event
#[derive(Debug, Clone)]
pub struct SpanEvent {
    /// Event name
    pub name: String,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// Event attributes
    pub attributes: HashMap<String, serde_json::Value>,
}

/// One span in a trace tree
#[derive(Debug, Clone)]
pub struct Span {
    /// Span id
    pub id: String,
    /// Owning trace id
    pub trace_id: String,
    /// Parent span id; `None` for roots
    pub parent_id: Option<String>,
    /// Operation name
    pub name: String,
    /// Start timestamp
    pub started_at: DateTime<Utc>,
    /// End timestamp, set by `end_span`
    pub ended_at: Option<DateTime<Utc>>,
    /// Span attributes
    pub attributes: HashMap<String, serde_json::Value>,
    /// Span events
    pub events: Vec<SpanEvent>,
}

/// One trace: a tree of spans for a single request lifecycle
#[derive(Debug, Clone)]
pub struct Trace {
    /// Trace id
    pub id: String,
    /// Start timestamp
    pub started_at: DateTime<Utc>,
    /// End timestamp, set by `end_trace`
    pub ended_at: Option<DateTime<Utc>>,
    /// Span ids in creation order
    pub span_ids: Vec<String>,
}

/// Parse the parent span id out of a W3C traceparent header value
/// (`00-<trace-id>-<parent-id>-<flags>`); plain span ids pass through.
fn parse_parent_span(value: &str) -> Option<String> {
    let parts: Vec<&str> = value.split('-').collect();
    if parts.len() == 4 && parts[1].len() == 32 && parts[2].len() == 16 {
        return Some(parts[2].to_string());
    }
    (!value.is_empty()).then(|| value.to_string())
}

/// In-memory tracer owning the trace/span store and the accumulator
pub struct Tracer {
    traces: DashMap<String, Trace>,
    spans: DashMap<String, Span>,
    // request id -> span id held open until the stream finishes
    deferred_spans: DashMap<String, String>,
    accumulator: Arc<StreamingAccumulator>,
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl Tracer {
    /// Tracer whose accumulator sweeps abandoned streams after `grace`
    pub fn new(grace: Duration) -> Self {
        Self {
            traces: DashMap::new(),
            spans: DashMap::new(),
            deferred_spans: DashMap::new(),
            accumulator: Arc::new(StreamingAccumulator::new(grace)),
        }
    }

    /// The embedded streaming accumulator
    pub fn accumulator(&self) -> &Arc<StreamingAccumulator> {
        &self.accumulator
    }

    /// Create a trace and record its id in the context
    pub fn create_trace(&self, ctx: &mut RequestContext) -> String {
        let id = Uuid::new_v4().to_string();
        self.traces.insert(
            id.clone(),
            Trace {
                id: id.clone(),
                started_at: Utc::now(),
                ended_at: None,
                span_ids: Vec::new(),
            },
        );
        ctx.set(keys::TRACE_ID, ContextValue::Str(id.clone()));
        id
    }

    /// Mark a trace ended
    pub fn end_trace(&self, trace_id: &str) {
        if let Some(mut trace) = self.traces.get_mut(trace_id) {
            trace.ended_at = Some(Utc::now());
        }
    }

    /// Start a span under the context's resolved parent and make it the
    /// context's current span
    pub fn start_span(&self, ctx: &mut RequestContext, name: impl Into<String>) -> String {
        let trace_id = match ctx.get_str(keys::TRACE_ID) {
            Some(id) => id.to_string(),
            None => self.create_trace(ctx),
        };
        let parent_id = ctx
            .get_str(keys::SPAN_ID)
            .map(str::to_string)
            .or_else(|| ctx.get_str(keys::PARENT_SPAN_ID).and_then(parse_parent_span));

        let id = Uuid::new_v4().to_string();
        let span = Span {
            id: id.clone(),
            trace_id: trace_id.clone(),
            parent_id,
            name: name.into(),
            started_at: Utc::now(),
            ended_at: None,
            attributes: HashMap::new(),
            events: Vec::new(),
        };
        self.spans.insert(id.clone(), span);
        if let Some(mut trace) = self.traces.get_mut(&trace_id) {
            trace.span_ids.push(id.clone());
        }
        ctx.set(keys::SPAN_ID, ContextValue::Str(id.clone()));
        id
    }

    /// Mark a span ended
    pub fn end_span(&self, span_id: &str) {
        if let Some(mut span) = self.spans.get_mut(span_id) {
            span.ended_at = Some(Utc::now());
        }
    }

    /// Set a span attribute
    pub fn set_attribute(&self, span_id: &str, key: impl Into<String>, value: serde_json::Value) {
        if let Some(mut span) = self.spans.get_mut(span_id) {
            span.attributes.insert(key.into(), value);
        }
    }

    /// Append a span event
    pub fn add_event(
        &self,
        span_id: &str,
        name: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
    ) {
        if let Some(mut span) = self.spans.get_mut(span_id) {
            span.events.push(SpanEvent {
                name: name.into(),
                timestamp: Utc::now(),
                attributes,
            });
        }
    }

    /// Keep `span_id` open until the stream for `request_id` completes
    pub fn defer_span(&self, request_id: &str, span_id: &str) {
        self.deferred_spans
            .insert(request_id.to_string(), span_id.to_string());
    }

    /// Drop a deferral whose stream never materialised
    pub fn cancel_deferred(&self, request_id: &str) {
        self.deferred_spans.remove(request_id);
    }

    /// Feed one streamed chunk through the accumulator.
    ///
    /// Returns the final aggregate exactly once, when the final chunk is
    /// processed; the deferred span (if any) is closed with the stream's
    /// outcome attributes at that moment.
    pub fn process_streaming_chunk(
        &self,
        ctx: &RequestContext,
        chunk: &StreamChunk,
    ) -> Option<AccumulatedData> {
        let id = ctx
            .get_str(keys::ACCUMULATOR_ID)
            .unwrap_or(ctx.request_id())
            .to_string();
        let is_final = chunk.is_final();
        self.accumulator.add_chunk(&id, chunk.clone());
        if !is_final {
            return None;
        }
        match self.accumulator.process(&id, true) {
            ProcessOutcome::Final(data) => {
                if let Some((_, span_id)) = self.deferred_spans.remove(ctx.request_id()) {
                    if let Some(reason) = &data.finish_reason {
                        self.set_attribute(&span_id, "finish_reason", serde_json::json!(reason));
                    }
                    if let Some(usage) = &data.usage {
                        self.set_attribute(
                            &span_id,
                            "total_tokens",
                            serde_json::json!(usage.total_tokens),
                        );
                    }
                    self.end_span(&span_id);
                    debug!(request_id = ctx.request_id(), span_id = %span_id, "deferred span closed");
                }
                Some(data)
            }
            _ => None,
        }
    }

    /// Snapshot a span
    pub fn span(&self, span_id: &str) -> Option<Span> {
        self.spans.get(span_id).map(|s| s.clone())
    }

    /// Snapshot a trace
    pub fn trace(&self, trace_id: &str) -> Option<Trace> {
        self.traces.get(trace_id).map(|t| t.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ChatDelta, ChunkDelta};

    #[test]
    fn test_parent_resolution_order() {
        let tracer = Tracer::default();

        // span id in context wins
        let mut ctx = RequestContext::new();
        tracer.create_trace(&mut ctx);
        let first = tracer.start_span(&mut ctx, "outer");
        let second = tracer.start_span(&mut ctx, "inner");
        assert_eq!(tracer.span(&second).unwrap().parent_id, Some(first.clone()));

        // W3C traceparent parent when no span id yet
        let mut ctx = RequestContext::new();
        ctx.set(
            keys::PARENT_SPAN_ID,
            ContextValue::Str(
                "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".into(),
            ),
        );
        let span = tracer.start_span(&mut ctx, "remote-child");
        assert_eq!(
            tracer.span(&span).unwrap().parent_id.as_deref(),
            Some("b7ad6b7169203331")
        );

        // neither: root
        let mut ctx = RequestContext::new();
        let root = tracer.start_span(&mut ctx, "root");
        assert_eq!(tracer.span(&root).unwrap().parent_id, None);
    }

    #[test]
    fn test_span_lifecycle_and_attributes() {
        let tracer = Tracer::default();
        let mut ctx = RequestContext::new();
        let trace_id = tracer.create_trace(&mut ctx);
        let span_id = tracer.start_span(&mut ctx, "llm-call");

        tracer.set_attribute(&span_id, "model", serde_json::json!("gpt-4o-mini"));
        tracer.add_event(&span_id, "queued", HashMap::new());
        tracer.end_span(&span_id);
        tracer.end_trace(&trace_id);

        let span = tracer.span(&span_id).unwrap();
        assert!(span.ended_at.is_some());
        assert_eq!(span.attributes["model"], serde_json::json!("gpt-4o-mini"));
        assert_eq!(span.events.len(), 1);
        assert!(tracer.trace(&trace_id).unwrap().ended_at.is_some());
    }

    #[test]
    fn test_streaming_chunks_close_deferred_span_once() {
        let tracer = Tracer::default();
        let mut ctx = RequestContext::new();
        tracer.create_trace(&mut ctx);
        let span_id = tracer.start_span(&mut ctx, "stream");
        tracer.defer_span(ctx.request_id(), &span_id);

        let request_id = ctx.request_id().to_string();
        let chunk = |i: u64, content: &str| {
            StreamChunk::delta(
                &request_id,
                "m",
                i,
                ChunkDelta::Chat(ChatDelta {
                    content: Some(content.into()),
                    ..Default::default()
                }),
            )
        };

        assert!(tracer.process_streaming_chunk(&ctx, &chunk(0, "he")).is_none());
        assert!(tracer.span(&span_id).unwrap().ended_at.is_none());

        let mut last = chunk(1, "y");
        last.finish_reason = Some("stop".into());
        let data = tracer.process_streaming_chunk(&ctx, &last).unwrap();
        assert_eq!(data.content.as_deref(), Some("hey"));

        let span = tracer.span(&span_id).unwrap();
        assert!(span.ended_at.is_some());
        assert_eq!(span.attributes["finish_reason"], serde_json::json!("stop"));

        // a duplicate terminal chunk does not produce a second aggregate
        assert!(tracer.process_streaming_chunk(&ctx, &last).is_none());
    }
}
