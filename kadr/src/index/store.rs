use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{KadrError, Result};
use crate::models::SearchHit;

/// Identifier to vector mapping with nearest-neighbour lookup.
///
/// A vector is stored whole or not at all; `upsert` replaces any previous vector for the
/// identifier.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn dimensions(&self) -> usize;

    async fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<()>;

    async fn get(&self, id: &str) -> Option<Vec<f32>>;

    async fn remove(&self, id: &str) -> bool;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Up to `k` entries by descending cosine similarity, ties broken by identifier.
    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;
}

struct Entry {
    vector: Vec<f32>,
    norm: f32,
}

/// Brute-force in-process index.
pub struct InMemoryIndex {
    dimensions: usize,
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn validate(&self, vector: &[f32], what: &str) -> Result<f32> {
        if vector.len() != self.dimensions {
            return Err(KadrError::Validation(format!(
                "{what} has {} dimensions, index expects {}",
                vector.len(),
                self.dimensions
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(KadrError::Validation(format!(
                "{what} contains non-finite values"
            )));
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(KadrError::Validation(format!("{what} is all zeros")));
        }
        Ok(norm)
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>) -> Result<()> {
        if id.trim().is_empty() {
            return Err(KadrError::Validation(
                "Document identifier must not be empty".to_string(),
            ));
        }
        let norm = self.validate(&vector, "Embedding")?;
        self.entries
            .write()
            .await
            .insert(id.to_string(), Entry { vector, norm });
        Ok(())
    }

    async fn get(&self, id: &str) -> Option<Vec<f32>> {
        self.entries
            .read()
            .await
            .get(id)
            .map(|entry| entry.vector.clone())
    }

    async fn remove(&self, id: &str) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_norm = self.validate(query, "Query embedding")?;

        let entries = self.entries.read().await;
        let mut hits: Vec<SearchHit> = entries
            .iter()
            .map(|(id, entry)| {
                let dot: f32 = entry
                    .vector
                    .iter()
                    .zip(query)
                    .map(|(a, b)| a * b)
                    .sum();
                SearchHit {
                    document_id: id.clone(),
                    similarity: (dot / (entry.norm * query_norm)).clamp(-1.0, 1.0),
                }
            })
            .collect();
        drop(entries);

        hits.sort_by(|a, b| match b.similarity.total_cmp(&a.similarity) {
            Ordering::Equal => a.document_id.cmp(&b.document_id),
            other => other,
        });
        hits.truncate(k);
        Ok(hits)
    }
}
