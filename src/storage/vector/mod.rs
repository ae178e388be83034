//! Vector store interface
//!
//! The semantic cache talks to its backend exclusively through
//! [`VectorStore`]. Concrete network backends (Weaviate, Redis, Qdrant)
//! live outside this crate; an in-memory implementation ships for tests
//! and embedded use.

pub mod memory;

pub use memory::MemoryVectorStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::utils::error::Result;

/// Equality filter over one metadata field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    /// Metadata field name
    pub field: String,
    /// Required value
    pub value: serde_json::Value,
}

impl Query {
    /// Build an equality filter
    pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// One stored or retrieved entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEntry {
    /// Entry id
    pub id: String,
    /// Embedding, present when the caller selected vectors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Metadata fields
    pub metadata: HashMap<String, serde_json::Value>,
    /// Similarity score, present on nearest-neighbour results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// A page of scan results with an opaque continuation cursor
#[derive(Debug, Clone)]
pub struct ScanPage {
    /// Entries in this page
    pub entries: Vec<VectorEntry>,
    /// Cursor for the next page; `None` when exhausted
    pub next_cursor: Option<String>,
}

/// Backend capability set required by the semantic cache
///
/// `get_all` applies `queries` as a conjunction of equality filters and
/// pages through matches; `get_nearest` ranks by similarity under the same
/// filters and drops results below `threshold`. Implementations that
/// cannot enumerate a namespace without a vector must report
/// `requires_vectors() == true` and fail `delete_all` with a
/// namespace-not-initialised error rather than fabricating a query vector.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Liveness probe
    async fn ping(&self) -> Result<()>;

    /// Create a namespace for vectors of dimension `dimension`;
    /// `schema` declares metadata fields for backends that index them
    async fn create_namespace(
        &self,
        namespace: &str,
        dimension: usize,
        schema: &[String],
    ) -> Result<()>;

    /// Drop a namespace and everything in it
    async fn delete_namespace(&self, namespace: &str) -> Result<()>;

    /// Insert or replace one entry
    async fn add(
        &self,
        namespace: &str,
        id: &str,
        embedding: Option<Vec<f32>>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()>;

    /// Fetch one entry by id
    async fn get_chunk(&self, namespace: &str, id: &str) -> Result<Option<VectorEntry>>;

    /// Fetch several entries by id, skipping missing ones
    async fn get_chunks(&self, namespace: &str, ids: &[String]) -> Result<Vec<VectorEntry>>;

    /// Filtered scan with pagination; `select` projects metadata fields
    /// (empty selects everything)
    async fn get_all(
        &self,
        namespace: &str,
        queries: &[Query],
        select: &[String],
        cursor: Option<String>,
        limit: usize,
    ) -> Result<ScanPage>;

    /// Similarity search under filters; results at or above `threshold`,
    /// best first, at most `limit`
    async fn get_nearest(
        &self,
        namespace: &str,
        vector: &[f32],
        queries: &[Query],
        select: &[String],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<VectorEntry>>;

    /// Delete one entry by id
    async fn delete(&self, namespace: &str, id: &str) -> Result<()>;

    /// Delete every entry matching the filters, returning what was removed
    async fn delete_all(&self, namespace: &str, queries: &[Query]) -> Result<Vec<VectorEntry>>;

    /// Release per-namespace resources
    async fn close(&self, namespace: &str) -> Result<()>;

    /// Whether this backend needs a vector to enumerate entries
    fn requires_vectors(&self) -> bool;
}

/// Whether `entry` satisfies every filter in `queries`
pub fn matches_queries(entry: &VectorEntry, queries: &[Query]) -> bool {
    queries
        .iter()
        .all(|q| entry.metadata.get(&q.field) == Some(&q.value))
}

/// Cosine similarity of two vectors; zero when either has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
