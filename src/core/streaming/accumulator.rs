//! Per-stream accumulation
//!
//! One entry per request id holds the append-only chunk list and the
//! lifecycle timestamps. The entry mutex protects all of it; the final
//! materialisation is idempotent — exactly the first caller that observes
//! the incomplete state produces the final aggregate.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::merge::{merge_chunks, AccumulatedData};
use crate::core::types::StreamChunk;

/// Outcome of a `process` call
pub enum ProcessOutcome {
    /// Mid-stream aggregate over the chunks seen so far
    Partial(AccumulatedData),
    /// The single final aggregate; the entry is released
    Final(AccumulatedData),
    /// A final aggregate was already produced by an earlier caller
    AlreadyComplete,
}

struct EntryState {
    chunks: Vec<StreamChunk>,
    started_at: Instant,
    first_chunk_at: Option<Instant>,
    final_at: Option<Instant>,
    last_activity: Instant,
    is_complete: bool,
}

struct AccumulatorEntry {
    state: Mutex<EntryState>,
}

impl AccumulatorEntry {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(EntryState {
                chunks: Vec::new(),
                started_at: now,
                first_chunk_at: None,
                final_at: None,
                last_activity: now,
                is_complete: false,
            }),
        }
    }
}

/// Timing signals of one stream
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamTimings {
    /// Time to first token
    pub ttft: Option<Duration>,
    /// Total stream duration, set on completion
    pub total: Option<Duration>,
}

/// Registry of live stream accumulations
pub struct StreamingAccumulator {
    entries: DashMap<String, Arc<AccumulatorEntry>>,
    grace: Duration,
}

impl Default for StreamingAccumulator {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl StreamingAccumulator {
    /// Accumulator whose sweeper reclaims entries idle beyond `grace`
    pub fn new(grace: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            grace,
        }
    }

    fn entry(&self, id: &str) -> Arc<AccumulatorEntry> {
        self.entries
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(AccumulatorEntry::new()))
            .clone()
    }

    /// Live entry count
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no streams are being accumulated
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a chunk to the stream keyed by `id`.
    ///
    /// The first chunk stamps the TTFT timestamp; a final chunk stamps
    /// the completion timestamp. Chunks arriving after completion are
    /// dropped.
    pub fn add_chunk(&self, id: &str, chunk: StreamChunk) {
        let entry = self.entry(id);
        let mut state = entry.state.lock();
        if state.is_complete {
            debug!(request_id = id, "chunk after completion dropped");
            return;
        }
        let now = Instant::now();
        if state.first_chunk_at.is_none() {
            state.first_chunk_at = Some(now);
        }
        if chunk.is_final() {
            state.final_at = Some(now);
        }
        state.last_activity = now;
        state.chunks.push(chunk);
    }

    /// Materialise the aggregate for `id`.
    ///
    /// Chunks are stably sorted by `chunk_index` and merged. A non-final
    /// call returns the current partial aggregate. A final call marks the
    /// entry complete under its mutex and schedules its release before
    /// unlocking, so no later reader can observe released chunks; only
    /// the first final caller produces [`ProcessOutcome::Final`].
    pub fn process(&self, id: &str, is_final: bool) -> ProcessOutcome {
        let Some(entry) = self.entries.get(id).map(|e| e.clone()) else {
            return ProcessOutcome::AlreadyComplete;
        };
        let mut state = entry.state.lock();
        if state.is_complete {
            return ProcessOutcome::AlreadyComplete;
        }

        state.chunks.sort_by_key(|chunk| chunk.chunk_index);
        let data = merge_chunks(&state.chunks);

        if is_final {
            // Chunk storage is released while the mutex is still held; the
            // emptied entry stays behind as an idempotency marker until the
            // sweeper reclaims it.
            state.is_complete = true;
            state.chunks = Vec::new();
            state.last_activity = Instant::now();
            drop(state);
            ProcessOutcome::Final(data)
        } else {
            ProcessOutcome::Partial(data)
        }
    }

    /// Timing signals for `id`, when the entry is still live
    pub fn timings(&self, id: &str) -> Option<StreamTimings> {
        let entry = self.entries.get(id)?.clone();
        let state = entry.state.lock();
        Some(StreamTimings {
            ttft: state
                .first_chunk_at
                .map(|t| t.duration_since(state.started_at)),
            total: state.final_at.map(|t| t.duration_since(state.started_at)),
        })
    }

    /// Drop entries idle beyond the grace window; recovers streams that
    /// never emitted a final chunk.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| {
                let state = entry.value().state.lock();
                now.duration_since(state.last_activity) > self.grace
            })
            .map(|entry| entry.key().clone())
            .collect();
        let count = stale.len();
        for id in stale {
            warn!(request_id = %id, "sweeping abandoned stream accumulator");
            self.entries.remove(&id);
        }
        count
    }

    /// Spawn the periodic sweeper; the task ends when the accumulator is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(accumulator) = weak.upgrade() else {
                    break;
                };
                let swept = accumulator.sweep();
                if swept > 0 {
                    debug!(swept, "accumulator sweep");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ChatDelta, ChunkDelta};

    fn content_chunk(index: u64, content: &str) -> StreamChunk {
        StreamChunk::delta(
            "req",
            "model",
            index,
            ChunkDelta::Chat(ChatDelta {
                content: Some(content.to_string()),
                ..Default::default()
            }),
        )
    }

    fn final_chunk(index: u64) -> StreamChunk {
        let mut chunk = StreamChunk::delta("req", "model", index, ChunkDelta::Chat(ChatDelta::default()));
        chunk.finish_reason = Some("stop".into());
        chunk
    }

    #[test]
    fn test_out_of_order_arrival_merges_in_index_order() {
        let accumulator = StreamingAccumulator::default();
        accumulator.add_chunk("req", content_chunk(2, "c"));
        accumulator.add_chunk("req", content_chunk(0, "a"));
        accumulator.add_chunk("req", content_chunk(1, "b"));
        accumulator.add_chunk("req", final_chunk(3));

        let ProcessOutcome::Final(data) = accumulator.process("req", true) else {
            panic!("expected final aggregate");
        };
        assert_eq!(data.content.as_deref(), Some("abc"));
        assert_eq!(data.finish_reason.as_deref(), Some("stop"));
        assert!(matches!(
            accumulator.process("req", true),
            ProcessOutcome::AlreadyComplete
        ));
    }

    #[test]
    fn test_partial_process_keeps_entry_alive() {
        let accumulator = StreamingAccumulator::default();
        accumulator.add_chunk("req", content_chunk(0, "par"));

        let ProcessOutcome::Partial(data) = accumulator.process("req", false) else {
            panic!("expected partial aggregate");
        };
        assert_eq!(data.content.as_deref(), Some("par"));
        assert_eq!(accumulator.len(), 1);
    }

    #[test]
    fn test_final_process_is_idempotent() {
        let accumulator = StreamingAccumulator::default();
        accumulator.add_chunk("req", content_chunk(0, "x"));
        accumulator.add_chunk("req", final_chunk(1));

        let mut finals = 0;
        for _ in 0..5 {
            if matches!(accumulator.process("req", true), ProcessOutcome::Final(_)) {
                finals += 1;
            }
        }
        assert_eq!(finals, 1);
    }

    #[tokio::test]
    async fn test_concurrent_final_process_single_winner() {
        let accumulator = Arc::new(StreamingAccumulator::default());
        accumulator.add_chunk("req", content_chunk(0, "x"));
        accumulator.add_chunk("req", final_chunk(1));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let accumulator = accumulator.clone();
            handles.push(tokio::spawn(async move {
                matches!(accumulator.process("req", true), ProcessOutcome::Final(_))
            }));
        }
        let mut finals = 0;
        for handle in handles {
            if handle.await.unwrap() {
                finals += 1;
            }
        }
        assert_eq!(finals, 1);
    }

    #[test]
    fn test_sweep_reclaims_abandoned_entries() {
        let accumulator = StreamingAccumulator::new(Duration::ZERO);
        accumulator.add_chunk("req", content_chunk(0, "x"));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(accumulator.sweep(), 1);
        assert!(accumulator.is_empty());
    }

    #[test]
    fn test_chunks_after_completion_dropped() {
        let accumulator = StreamingAccumulator::default();
        accumulator.add_chunk("req", final_chunk(0));
        let ProcessOutcome::Final(_) = accumulator.process("req", true) else {
            panic!("expected final");
        };
        // the completed marker swallows late duplicates
        accumulator.add_chunk("req", content_chunk(5, "late"));
        assert!(matches!(
            accumulator.process("req", true),
            ProcessOutcome::AlreadyComplete
        ));
    }
}
