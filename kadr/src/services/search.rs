use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::embeddings::ImageEmbedder;
use crate::error::{KadrError, Result};
use crate::index::VectorIndex;
use crate::models::{SearchHit, SearchQuery};
use crate::ocr::ImageNormalizer;

/// Read path over the embedding index.
#[derive(Clone)]
pub struct SearchService {
    embedder: Arc<dyn ImageEmbedder>,
    index: Arc<dyn VectorIndex>,
    normalizer: ImageNormalizer,
    max_results: usize,
}

impl SearchService {
    pub fn new(
        embedder: Arc<dyn ImageEmbedder>,
        index: Arc<dyn VectorIndex>,
        normalizer: ImageNormalizer,
        max_results: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            normalizer,
            max_results: max_results.max(1),
        }
    }

    /// Top `k` documents by descending similarity. `k` is capped at the configured maximum.
    ///
    /// An empty index answers with no hits before the query is embedded, so searching works
    /// even while the embedding model is unavailable.
    pub async fn search(&self, query: SearchQuery, k: usize) -> Result<Vec<SearchHit>> {
        let start = Instant::now();
        let k = k.min(self.max_results);
        if k == 0 || self.index.is_empty().await {
            return Ok(Vec::new());
        }

        let embedding = self.embed_query(query).await?;
        let hits = self.index.nearest(&embedding, k).await?;

        debug!(
            k,
            hits = hits.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Search finished"
        );
        Ok(hits)
    }

    async fn embed_query(&self, query: SearchQuery) -> Result<Vec<f32>> {
        match query {
            SearchQuery::Embedding(vector) => Ok(vector),
            SearchQuery::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(KadrError::Validation(
                        "Search text must not be empty".to_string(),
                    ));
                }
                self.embedder.embed_text(text).await
            }
            SearchQuery::Image(bytes) => {
                let normalizer = self.normalizer.clone();
                let image = tokio::task::spawn_blocking(move || normalizer.normalize(&bytes))
                    .await
                    .map_err(|e| KadrError::Internal(format!("Normalizer task panicked: {e}")))??;
                self.embedder.embed_image(&image).await
            }
        }
    }
}
