//! Log store interface
//!
//! The logger writes through this trait; concrete SQL schemas live
//! outside the crate. The in-memory implementation backs tests and
//! embedded deployments and defines the reference query semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::core::types::{
    CacheDebug, ChatMessage, ProviderType, RequestKind, RequestParams, Tool, ToolCall, Usage,
};
use crate::utils::error::{GatewayError, Result};

/// Row status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    /// Pre-hook seen, no outcome yet (live view only, never stored)
    Processing,
    /// Completed successfully
    Success,
    /// Completed with an error
    Error,
}

/// One request log row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Request id, the row key
    pub request_id: String,
    /// Original request id for fallback attempts
    pub parent_request_id: Option<String>,
    /// Position in the fallback cascade, 0 for the primary
    pub fallback_index: usize,
    /// Provider that served (or failed) the request
    pub provider: ProviderType,
    /// Requested model
    pub model: String,
    /// Request kind
    pub request_type: RequestKind,
    /// Whether the request streamed
    pub stream: bool,
    /// Row status
    pub status: LogStatus,
    /// Pre-hook timestamp
    pub created_at: DateTime<Utc>,
    /// Post-hook timestamp
    pub completed_at: Option<DateTime<Utc>>,
    /// Conversation history captured at pre-hook time
    pub input_history: Option<Vec<ChatMessage>>,
    /// Non-chat input rendered to text (prompt, speech input, ...)
    pub input_text: Option<String>,
    /// Request params
    pub params: Option<RequestParams>,
    /// Tools offered to the model
    pub tools: Option<Vec<Tool>>,
    /// Output content
    pub output_content: Option<String>,
    /// Output tool calls
    pub output_tool_calls: Option<Vec<ToolCall>>,
    /// Finish reason
    pub finish_reason: Option<String>,
    /// Token usage
    pub usage: Option<Usage>,
    /// Error message for failed requests
    pub error: Option<String>,
    /// Cache lookup outcome
    pub cache_debug: Option<CacheDebug>,
    /// Billed cost
    pub cost: Option<f64>,
    /// Provider latency
    pub latency_ms: Option<u64>,
    /// Time to first token for streams
    pub ttft_ms: Option<u64>,
    /// Routing engines that touched the request
    pub routing_engines: Vec<String>,
    /// Headers captured for log correlation
    pub logging_headers: HashMap<String, String>,
}

/// Row filters; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct LogFilters {
    /// Required request id
    pub request_id: Option<String>,
    /// Required parent request id
    pub parent_request_id: Option<String>,
    /// Required provider
    pub provider: Option<ProviderType>,
    /// Required model
    pub model: Option<String>,
    /// Required status
    pub status: Option<LogStatus>,
    /// Rows created at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Rows created before this instant
    pub until: Option<DateTime<Utc>>,
}

impl LogFilters {
    fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(id) = &self.request_id {
            if &entry.request_id != id {
                return false;
            }
        }
        if let Some(parent) = &self.parent_request_id {
            if entry.parent_request_id.as_ref() != Some(parent) {
                return false;
            }
        }
        if let Some(provider) = &self.provider {
            if &entry.provider != provider {
                return false;
            }
        }
        if let Some(model) = &self.model {
            if &entry.model != model {
                return false;
            }
        }
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.created_at >= until {
                return false;
            }
        }
        true
    }
}

/// Offset pagination
#[derive(Debug, Clone)]
pub struct Pagination {
    /// Rows to skip
    pub offset: usize,
    /// Rows to return
    pub limit: usize,
    /// Newest first when set
    pub newest_first: bool,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
            newest_first: true,
        }
    }
}

/// Aggregate stats over a filtered row set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogStats {
    /// Matching rows
    pub total_requests: u64,
    /// Successful rows
    pub success_requests: u64,
    /// Failed rows
    pub error_requests: u64,
    /// Sum of total tokens
    pub total_tokens: u64,
    /// Sum of billed cost
    pub total_cost: f64,
    /// Mean provider latency over rows that report one
    pub average_latency_ms: f64,
}

/// One time bucket of a histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Bucket start (unix seconds, aligned to the bucket width)
    pub bucket_start: i64,
    /// Bucket value (count, tokens or cost depending on the histogram)
    pub value: f64,
}

/// One time bucket of the per-model histogram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHistogramBucket {
    /// Bucket start (unix seconds)
    pub bucket_start: i64,
    /// Model id
    pub model: String,
    /// Requests for the model in the bucket
    pub count: u64,
}

/// Storage surface used by the batched logger
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Insert rows whose request id is not already present; returns the
    /// number actually inserted
    async fn batch_create_if_not_exists(&self, entries: Vec<LogEntry>) -> Result<usize>;

    /// Patch named fields of one row
    async fn update(&self, request_id: &str, patch: HashMap<String, serde_json::Value>)
        -> Result<()>;

    /// First row matching the filters, oldest first
    async fn find_first(&self, filters: &LogFilters) -> Result<Option<LogEntry>>;

    /// Filtered page plus the total match count
    async fn search_logs(
        &self,
        filters: &LogFilters,
        pagination: &Pagination,
    ) -> Result<(Vec<LogEntry>, u64)>;

    /// Aggregate stats over the filtered rows
    async fn get_stats(&self, filters: &LogFilters) -> Result<LogStats>;

    /// Request-count histogram
    async fn get_histogram(
        &self,
        filters: &LogFilters,
        bucket_seconds: i64,
    ) -> Result<Vec<HistogramBucket>>;

    /// Token-sum histogram
    async fn get_token_histogram(
        &self,
        filters: &LogFilters,
        bucket_seconds: i64,
    ) -> Result<Vec<HistogramBucket>>;

    /// Cost-sum histogram
    async fn get_cost_histogram(
        &self,
        filters: &LogFilters,
        bucket_seconds: i64,
    ) -> Result<Vec<HistogramBucket>>;

    /// Per-model request-count histogram
    async fn get_model_histogram(
        &self,
        filters: &LogFilters,
        bucket_seconds: i64,
    ) -> Result<Vec<ModelHistogramBucket>>;

    /// Distinct models seen
    async fn get_distinct_models(&self) -> Result<Vec<String>>;

    /// Distinct (provider, model) pairs seen
    async fn get_distinct_key_pairs(&self) -> Result<Vec<(ProviderType, String)>>;

    /// Distinct routing engines seen
    async fn get_distinct_routing_engines(&self) -> Result<Vec<String>>;

    /// Patch billed cost on many rows at once
    async fn bulk_update_cost(&self, costs: HashMap<String, f64>) -> Result<()>;

    /// Delete rows created before `older_than`; returns deleted count
    async fn flush(&self, older_than: DateTime<Utc>) -> Result<usize>;
}

/// One MCP tool-execution log row, the sibling of [`LogEntry`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolLogEntry {
    /// Row id
    pub id: String,
    /// Request the tool call belonged to, when executed inside one
    pub request_id: Option<String>,
    /// Tool name
    pub tool_name: String,
    /// Arguments after pre-hook rewriting
    pub arguments: serde_json::Value,
    /// Tool output on success
    pub result: Option<serde_json::Value>,
    /// Error message on failure
    pub error: Option<String>,
    /// Row status
    pub status: LogStatus,
    /// Execution start
    pub created_at: DateTime<Utc>,
    /// Execution latency
    pub latency_ms: Option<u64>,
}

/// Storage surface for MCP tool-execution logs
#[async_trait]
pub trait McpToolLogStore: Send + Sync {
    /// Insert rows whose id is not already present
    async fn batch_create_if_not_exists(&self, entries: Vec<McpToolLogEntry>) -> Result<usize>;

    /// Page of rows, optionally restricted to one tool, newest first
    async fn search(
        &self,
        tool_name: Option<&str>,
        pagination: &Pagination,
    ) -> Result<(Vec<McpToolLogEntry>, u64)>;

    /// Delete rows created before `older_than`
    async fn flush(&self, older_than: DateTime<Utc>) -> Result<usize>;
}

/// In-memory MCP tool-log store
#[derive(Default)]
pub struct MemoryMcpToolLogStore {
    rows: RwLock<Vec<McpToolLogEntry>>,
}

impl MemoryMcpToolLogStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl McpToolLogStore for MemoryMcpToolLogStore {
    async fn batch_create_if_not_exists(&self, entries: Vec<McpToolLogEntry>) -> Result<usize> {
        let mut rows = self.rows.write();
        let existing: HashSet<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut inserted = 0;
        for entry in entries {
            if !existing.contains(&entry.id) {
                rows.push(entry);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn search(
        &self,
        tool_name: Option<&str>,
        pagination: &Pagination,
    ) -> Result<(Vec<McpToolLogEntry>, u64)> {
        let mut matches: Vec<McpToolLogEntry> = self
            .rows
            .read()
            .iter()
            .filter(|row| tool_name.map(|t| row.tool_name == t).unwrap_or(true))
            .cloned()
            .collect();
        matches.sort_by_key(|row| row.created_at);
        if pagination.newest_first {
            matches.reverse();
        }
        let total = matches.len() as u64;
        let page = matches
            .into_iter()
            .skip(pagination.offset)
            .take(pagination.limit)
            .collect();
        Ok((page, total))
    }

    async fn flush(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|row| row.created_at >= older_than);
        Ok(before - rows.len())
    }
}

/// In-memory reference implementation
#[derive(Default)]
pub struct MemoryLogStore {
    rows: RwLock<Vec<LogEntry>>,
}

impl MemoryLogStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn filtered(&self, filters: &LogFilters) -> Vec<LogEntry> {
        self.rows
            .read()
            .iter()
            .filter(|row| filters.matches(row))
            .cloned()
            .collect()
    }

    fn histogram_of<F>(&self, filters: &LogFilters, bucket_seconds: i64, value: F) -> Vec<HistogramBucket>
    where
        F: Fn(&LogEntry) -> f64,
    {
        let bucket_seconds = bucket_seconds.max(1);
        let mut buckets: HashMap<i64, f64> = HashMap::new();
        for row in self.filtered(filters) {
            let ts = row.created_at.timestamp();
            let start = ts - ts.rem_euclid(bucket_seconds);
            *buckets.entry(start).or_default() += value(&row);
        }
        let mut out: Vec<HistogramBucket> = buckets
            .into_iter()
            .map(|(bucket_start, value)| HistogramBucket { bucket_start, value })
            .collect();
        out.sort_by_key(|b| b.bucket_start);
        out
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn batch_create_if_not_exists(&self, entries: Vec<LogEntry>) -> Result<usize> {
        let mut rows = self.rows.write();
        let existing: HashSet<String> = rows.iter().map(|r| r.request_id.clone()).collect();
        let mut inserted = 0;
        for entry in entries {
            if !existing.contains(&entry.request_id) {
                rows.push(entry);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn update(
        &self,
        request_id: &str,
        patch: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let mut rows = self.rows.write();
        let row = rows
            .iter_mut()
            .find(|r| r.request_id == request_id)
            .ok_or_else(|| GatewayError::LogStore(format!("no row for {request_id}")))?;
        let mut value = serde_json::to_value(&*row)?;
        if let serde_json::Value::Object(map) = &mut value {
            for (field, new_value) in patch {
                map.insert(field, new_value);
            }
        }
        *row = serde_json::from_value(value)
            .map_err(|e| GatewayError::LogStore(format!("invalid patch: {e}")))?;
        Ok(())
    }

    async fn find_first(&self, filters: &LogFilters) -> Result<Option<LogEntry>> {
        Ok(self.filtered(filters).into_iter().next())
    }

    async fn search_logs(
        &self,
        filters: &LogFilters,
        pagination: &Pagination,
    ) -> Result<(Vec<LogEntry>, u64)> {
        let mut matches = self.filtered(filters);
        matches.sort_by_key(|row| row.created_at);
        if pagination.newest_first {
            matches.reverse();
        }
        let total = matches.len() as u64;
        let page = matches
            .into_iter()
            .skip(pagination.offset)
            .take(pagination.limit)
            .collect();
        Ok((page, total))
    }

    async fn get_stats(&self, filters: &LogFilters) -> Result<LogStats> {
        let matches = self.filtered(filters);
        let mut stats = LogStats {
            total_requests: matches.len() as u64,
            ..Default::default()
        };
        let mut latency_sum = 0u64;
        let mut latency_count = 0u64;
        for row in &matches {
            match row.status {
                LogStatus::Success => stats.success_requests += 1,
                LogStatus::Error => stats.error_requests += 1,
                LogStatus::Processing => {}
            }
            if let Some(usage) = &row.usage {
                stats.total_tokens += usage.total_tokens as u64;
            }
            if let Some(cost) = row.cost {
                stats.total_cost += cost;
            }
            if let Some(latency) = row.latency_ms {
                latency_sum += latency;
                latency_count += 1;
            }
        }
        if latency_count > 0 {
            stats.average_latency_ms = latency_sum as f64 / latency_count as f64;
        }
        Ok(stats)
    }

    async fn get_histogram(
        &self,
        filters: &LogFilters,
        bucket_seconds: i64,
    ) -> Result<Vec<HistogramBucket>> {
        Ok(self.histogram_of(filters, bucket_seconds, |_| 1.0))
    }

    async fn get_token_histogram(
        &self,
        filters: &LogFilters,
        bucket_seconds: i64,
    ) -> Result<Vec<HistogramBucket>> {
        Ok(self.histogram_of(filters, bucket_seconds, |row| {
            row.usage.as_ref().map(|u| u.total_tokens as f64).unwrap_or(0.0)
        }))
    }

    async fn get_cost_histogram(
        &self,
        filters: &LogFilters,
        bucket_seconds: i64,
    ) -> Result<Vec<HistogramBucket>> {
        Ok(self.histogram_of(filters, bucket_seconds, |row| row.cost.unwrap_or(0.0)))
    }

    async fn get_model_histogram(
        &self,
        filters: &LogFilters,
        bucket_seconds: i64,
    ) -> Result<Vec<ModelHistogramBucket>> {
        let bucket_seconds = bucket_seconds.max(1);
        let mut buckets: HashMap<(i64, String), u64> = HashMap::new();
        for row in self.filtered(filters) {
            let ts = row.created_at.timestamp();
            let start = ts - ts.rem_euclid(bucket_seconds);
            *buckets.entry((start, row.model.clone())).or_default() += 1;
        }
        let mut out: Vec<ModelHistogramBucket> = buckets
            .into_iter()
            .map(|((bucket_start, model), count)| ModelHistogramBucket {
                bucket_start,
                model,
                count,
            })
            .collect();
        out.sort_by(|a, b| (a.bucket_start, &a.model).cmp(&(b.bucket_start, &b.model)));
        Ok(out)
    }

    async fn get_distinct_models(&self) -> Result<Vec<String>> {
        let mut models: Vec<String> = self
            .rows
            .read()
            .iter()
            .map(|row| row.model.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        models.sort();
        Ok(models)
    }

    async fn get_distinct_key_pairs(&self) -> Result<Vec<(ProviderType, String)>> {
        let mut pairs: Vec<(ProviderType, String)> = self
            .rows
            .read()
            .iter()
            .map(|row| (row.provider.clone(), row.model.clone()))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        pairs.sort_by(|a, b| (a.0.to_string(), &a.1).cmp(&(b.0.to_string(), &b.1)));
        Ok(pairs)
    }

    async fn get_distinct_routing_engines(&self) -> Result<Vec<String>> {
        let mut engines: Vec<String> = self
            .rows
            .read()
            .iter()
            .flat_map(|row| row.routing_engines.iter().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        engines.sort();
        Ok(engines)
    }

    async fn bulk_update_cost(&self, costs: HashMap<String, f64>) -> Result<()> {
        let mut rows = self.rows.write();
        for row in rows.iter_mut() {
            if let Some(cost) = costs.get(&row.request_id) {
                row.cost = Some(*cost);
            }
        }
        Ok(())
    }

    async fn flush(&self, older_than: DateTime<Utc>) -> Result<usize> {
        let mut rows = self.rows.write();
        let before = rows.len();
        rows.retain(|row| row.created_at >= older_than);
        Ok(before - rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: &str, model: &str, status: LogStatus, at: i64) -> LogEntry {
        LogEntry {
            request_id: id.to_string(),
            parent_request_id: None,
            fallback_index: 0,
            provider: ProviderType::OpenAI,
            model: model.to_string(),
            request_type: RequestKind::Chat,
            stream: false,
            status,
            created_at: Utc.timestamp_opt(at, 0).unwrap(),
            completed_at: None,
            input_history: None,
            input_text: None,
            params: None,
            tools: None,
            output_content: None,
            output_tool_calls: None,
            finish_reason: None,
            usage: Some(Usage::new(10, 10)),
            error: None,
            cache_debug: None,
            cost: Some(0.5),
            latency_ms: Some(100),
            ttft_ms: None,
            routing_engines: vec!["weighted".into()],
            logging_headers: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_if_not_exists_deduplicates() {
        let store = MemoryLogStore::new();
        let inserted = store
            .batch_create_if_not_exists(vec![
                entry("a", "gpt-4o", LogStatus::Success, 100),
                entry("a", "gpt-4o", LogStatus::Error, 100),
                entry("b", "gpt-4o", LogStatus::Success, 100),
            ])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let inserted = store
            .batch_create_if_not_exists(vec![entry("b", "gpt-4o", LogStatus::Success, 100)])
            .await
            .unwrap();
        assert_eq!(inserted, 0);
    }

    #[tokio::test]
    async fn test_search_and_stats() {
        let store = MemoryLogStore::new();
        store
            .batch_create_if_not_exists(vec![
                entry("a", "gpt-4o", LogStatus::Success, 100),
                entry("b", "gpt-4o", LogStatus::Error, 200),
                entry("c", "claude-3", LogStatus::Success, 300),
            ])
            .await
            .unwrap();

        let filters = LogFilters {
            model: Some("gpt-4o".into()),
            ..Default::default()
        };
        let (page, total) = store
            .search_logs(&filters, &Pagination::default())
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(page[0].request_id, "b"); // newest first

        let stats = store.get_stats(&LogFilters::default()).await.unwrap();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.success_requests, 2);
        assert_eq!(stats.error_requests, 1);
        assert_eq!(stats.total_tokens, 60);
        assert!((stats.total_cost - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_histograms_bucket_correctly() {
        let store = MemoryLogStore::new();
        store
            .batch_create_if_not_exists(vec![
                entry("a", "gpt-4o", LogStatus::Success, 0),
                entry("b", "gpt-4o", LogStatus::Success, 30),
                entry("c", "gpt-4o", LogStatus::Success, 90),
            ])
            .await
            .unwrap();

        let counts = store
            .get_histogram(&LogFilters::default(), 60)
            .await
            .unwrap();
        assert_eq!(
            counts,
            vec![
                HistogramBucket { bucket_start: 0, value: 2.0 },
                HistogramBucket { bucket_start: 60, value: 1.0 },
            ]
        );

        let tokens = store
            .get_token_histogram(&LogFilters::default(), 60)
            .await
            .unwrap();
        assert_eq!(tokens[0].value, 40.0);
    }

    #[tokio::test]
    async fn test_update_patches_fields() {
        let store = MemoryLogStore::new();
        store
            .batch_create_if_not_exists(vec![entry("a", "gpt-4o", LogStatus::Success, 100)])
            .await
            .unwrap();
        let mut patch = HashMap::new();
        patch.insert("cost".to_string(), serde_json::json!(2.25));
        store.update("a", patch).await.unwrap();

        let row = store
            .find_first(&LogFilters {
                request_id: Some("a".into()),
                ..Default::default()
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.cost, Some(2.25));
    }

    #[tokio::test]
    async fn test_flush_and_distinct() {
        let store = MemoryLogStore::new();
        store
            .batch_create_if_not_exists(vec![
                entry("a", "gpt-4o", LogStatus::Success, 100),
                entry("b", "claude-3", LogStatus::Success, 5000),
            ])
            .await
            .unwrap();

        let deleted = store
            .flush(Utc.timestamp_opt(1000, 0).unwrap())
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.get_distinct_models().await.unwrap(), vec!["claude-3"]);
        assert_eq!(
            store.get_distinct_routing_engines().await.unwrap(),
            vec!["weighted"]
        );
    }
}
