//! In-memory vector store
//!
//! Exact cosine scan over a per-namespace map. Suitable for tests and
//! single-process embedded deployments; the trait is the boundary for
//! anything bigger.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use super::{cosine_similarity, matches_queries, Query, ScanPage, VectorEntry, VectorStore};
use crate::utils::error::{GatewayError, Result};

#[derive(Debug, Default)]
struct Namespace {
    dimension: usize,
    // insertion-ordered ids drive deterministic cursors
    order: Vec<String>,
    entries: HashMap<String, VectorEntry>,
}

/// Exact-scan in-memory implementation of [`VectorStore`]
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl MemoryVectorStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn project(entry: &VectorEntry, select: &[String]) -> VectorEntry {
        if select.is_empty() {
            return entry.clone();
        }
        let metadata = entry
            .metadata
            .iter()
            .filter(|(k, _)| select.iter().any(|s| s == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        VectorEntry {
            id: entry.id.clone(),
            embedding: entry.embedding.clone(),
            metadata,
            score: entry.score,
        }
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_namespace(
        &self,
        namespace: &str,
        dimension: usize,
        _schema: &[String],
    ) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        namespaces.entry(namespace.to_string()).or_insert_with(|| {
            debug!(namespace, dimension, "namespace created");
            Namespace {
                dimension,
                ..Default::default()
            }
        });
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        self.namespaces.write().remove(namespace);
        Ok(())
    }

    async fn add(
        &self,
        namespace: &str,
        id: &str,
        embedding: Option<Vec<f32>>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        let ns = namespaces
            .entry(namespace.to_string())
            .or_insert_with(Namespace::default);
        if let (Some(vector), true) = (&embedding, ns.dimension > 0) {
            if vector.len() != ns.dimension {
                return Err(GatewayError::VectorStore(format!(
                    "dimension mismatch in {namespace}: expected {}, got {}",
                    ns.dimension,
                    vector.len()
                )));
            }
        }
        if !ns.entries.contains_key(id) {
            ns.order.push(id.to_string());
        }
        ns.entries.insert(
            id.to_string(),
            VectorEntry {
                id: id.to_string(),
                embedding,
                metadata,
                score: None,
            },
        );
        Ok(())
    }

    async fn get_chunk(&self, namespace: &str, id: &str) -> Result<Option<VectorEntry>> {
        let namespaces = self.namespaces.read();
        Ok(namespaces
            .get(namespace)
            .and_then(|ns| ns.entries.get(id))
            .cloned())
    }

    async fn get_chunks(&self, namespace: &str, ids: &[String]) -> Result<Vec<VectorEntry>> {
        let namespaces = self.namespaces.read();
        let Some(ns) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| ns.entries.get(id))
            .cloned()
            .collect())
    }

    async fn get_all(
        &self,
        namespace: &str,
        queries: &[Query],
        select: &[String],
        cursor: Option<String>,
        limit: usize,
    ) -> Result<ScanPage> {
        let namespaces = self.namespaces.read();
        let Some(ns) = namespaces.get(namespace) else {
            return Ok(ScanPage {
                entries: Vec::new(),
                next_cursor: None,
            });
        };

        let start = match cursor {
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| GatewayError::VectorStore(format!("invalid cursor {c}")))?,
            None => 0,
        };
        let limit = if limit == 0 { usize::MAX } else { limit };

        let mut entries = Vec::new();
        let mut position = start;
        while position < ns.order.len() && entries.len() < limit {
            if let Some(entry) = ns.entries.get(&ns.order[position]) {
                if matches_queries(entry, queries) {
                    entries.push(Self::project(entry, select));
                }
            }
            position += 1;
        }
        let next_cursor = (position < ns.order.len()).then(|| position.to_string());
        Ok(ScanPage {
            entries,
            next_cursor,
        })
    }

    async fn get_nearest(
        &self,
        namespace: &str,
        vector: &[f32],
        queries: &[Query],
        select: &[String],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<VectorEntry>> {
        let namespaces = self.namespaces.read();
        let Some(ns) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<VectorEntry> = ns
            .entries
            .values()
            .filter(|entry| matches_queries(entry, queries))
            .filter_map(|entry| {
                let embedding = entry.embedding.as_ref()?;
                let score = cosine_similarity(vector, embedding);
                (score as f64 >= threshold).then(|| {
                    let mut projected = Self::project(entry, select);
                    projected.score = Some(score);
                    projected
                })
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(if limit == 0 { usize::MAX } else { limit });
        Ok(scored)
    }

    async fn delete(&self, namespace: &str, id: &str) -> Result<()> {
        let mut namespaces = self.namespaces.write();
        if let Some(ns) = namespaces.get_mut(namespace) {
            ns.entries.remove(id);
            ns.order.retain(|existing| existing != id);
        }
        Ok(())
    }

    async fn delete_all(&self, namespace: &str, queries: &[Query]) -> Result<Vec<VectorEntry>> {
        let mut namespaces = self.namespaces.write();
        let Some(ns) = namespaces.get_mut(namespace) else {
            return Err(GatewayError::VectorStore(format!(
                "namespace {namespace} not initialised"
            )));
        };
        let removed_ids: Vec<String> = ns
            .entries
            .values()
            .filter(|entry| matches_queries(entry, queries))
            .map(|entry| entry.id.clone())
            .collect();
        let mut removed = Vec::with_capacity(removed_ids.len());
        for id in &removed_ids {
            if let Some(entry) = ns.entries.remove(id) {
                removed.push(entry);
            }
        }
        ns.order.retain(|id| !removed_ids.contains(id));
        Ok(removed)
    }

    async fn close(&self, _namespace: &str) -> Result<()> {
        Ok(())
    }

    fn requires_vectors(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_add_get_delete() {
        let store = MemoryVectorStore::new();
        store.create_namespace("ns", 2, &[]).await.unwrap();
        store
            .add("ns", "a", Some(vec![1.0, 0.0]), metadata(&[("model", json!("m1"))]))
            .await
            .unwrap();

        let fetched = store.get_chunk("ns", "a").await.unwrap().unwrap();
        assert_eq!(fetched.metadata["model"], json!("m1"));

        store.delete("ns", "a").await.unwrap();
        assert!(store.get_chunk("ns", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = MemoryVectorStore::new();
        store.create_namespace("ns", 3, &[]).await.unwrap();
        let result = store
            .add("ns", "a", Some(vec![1.0]), HashMap::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_filtered_scan_with_cursor() {
        let store = MemoryVectorStore::new();
        store.create_namespace("ns", 0, &[]).await.unwrap();
        for i in 0..5 {
            store
                .add(
                    "ns",
                    &format!("id-{i}"),
                    None,
                    metadata(&[("keep", json!(i % 2 == 0))]),
                )
                .await
                .unwrap();
        }

        let first = store
            .get_all("ns", &[Query::eq("keep", true)], &[], None, 2)
            .await
            .unwrap();
        assert_eq!(first.entries.len(), 2);
        let cursor = first.next_cursor.clone().unwrap();

        let second = store
            .get_all("ns", &[Query::eq("keep", true)], &[], Some(cursor), 10)
            .await
            .unwrap();
        assert_eq!(second.entries.len(), 1);
        assert!(second.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_nearest_respects_threshold_and_filters() {
        let store = MemoryVectorStore::new();
        store.create_namespace("ns", 2, &[]).await.unwrap();
        store
            .add("ns", "close", Some(vec![1.0, 0.0]), metadata(&[("p", json!("a"))]))
            .await
            .unwrap();
        store
            .add("ns", "far", Some(vec![0.0, 1.0]), metadata(&[("p", json!("a"))]))
            .await
            .unwrap();
        store
            .add("ns", "filtered", Some(vec![1.0, 0.0]), metadata(&[("p", json!("b"))]))
            .await
            .unwrap();

        let results = store
            .get_nearest("ns", &[1.0, 0.0], &[Query::eq("p", "a")], &[], 0.9, 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "close");
        assert!(results[0].score.unwrap() > 0.99);
    }

    #[tokio::test]
    async fn test_delete_all_on_unknown_namespace_errors() {
        let store = MemoryVectorStore::new();
        let result = store.delete_all("never-created", &[]).await;
        assert!(matches!(result, Err(GatewayError::VectorStore(_))));
    }

    #[tokio::test]
    async fn test_delete_all_returns_removed_entries() {
        let store = MemoryVectorStore::new();
        store.create_namespace("ns", 0, &[]).await.unwrap();
        store
            .add("ns", "x", None, metadata(&[("kind", json!("cache"))]))
            .await
            .unwrap();
        store
            .add("ns", "y", None, metadata(&[("kind", json!("other"))]))
            .await
            .unwrap();

        let removed = store
            .delete_all("ns", &[Query::eq("kind", "cache")])
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "x");
        assert!(store.get_chunk("ns", "y").await.unwrap().is_some());
    }
}
