use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::store::VectorIndex;
use crate::embeddings::ImageEmbedder;
use crate::error::{KadrError, Result};
use crate::models::CanonicalImage;

type Slot = Arc<tokio::sync::Mutex<()>>;

/// One async mutex per identifier, dropped again once nobody holds or awaits it.
#[derive(Default)]
struct KeyedLocks {
    slots: Mutex<HashMap<String, Slot>>,
}

impl KeyedLocks {
    fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    fn release(&self, key: &str, slot: Slot) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Map plus ours: no other writer is waiting
        if Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Embeds canonical images and upserts them into the index.
///
/// Writes to one identifier are serialized, so the last caller to take the lock wins.
/// Different identifiers proceed in parallel.
pub struct EmbeddingIndexer {
    embedder: Arc<dyn ImageEmbedder>,
    index: Arc<dyn VectorIndex>,
    locks: KeyedLocks,
}

impl EmbeddingIndexer {
    pub fn new(embedder: Arc<dyn ImageEmbedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            locks: KeyedLocks::default(),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn ImageEmbedder> {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub async fn index_image(&self, document_id: &str, image: &CanonicalImage) -> Result<()> {
        if document_id.trim().is_empty() {
            return Err(KadrError::Validation(
                "Document identifier must not be empty".to_string(),
            ));
        }
        if !self.embedder.is_available() {
            return Err(KadrError::EmbeddingUnavailable(
                "Embedding model is not loaded".to_string(),
            ));
        }

        let slot = self.locks.slot(document_id);
        let result = {
            let _guard = slot.lock().await;
            match self.embedder.embed_image(image).await {
                Ok(vector) => self.index.upsert(document_id, vector).await,
                Err(e) => Err(e),
            }
        };
        self.locks.release(document_id, slot);

        if result.is_ok() {
            debug!(document_id = %document_id, "Indexed document");
        }
        result
    }

    /// Index in the background. Failures are logged, never returned.
    pub fn dispatch(self: &Arc<Self>, document_id: String, image: CanonicalImage) -> JoinHandle<()> {
        let indexer = Arc::clone(self);
        tokio::spawn(async move {
            match indexer.index_image(&document_id, &image).await {
                Ok(()) => {}
                Err(e @ KadrError::EmbeddingUnavailable(_)) => {
                    warn!(document_id = %document_id, error = %e, "Skipping indexing");
                }
                Err(e) => {
                    error!(document_id = %document_id, error = %e, "Background indexing failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::InMemoryIndex;
    use crate::models::{ImageMetadata, Rotation};
    use async_trait::async_trait;
    use image::GrayImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Returns `[n, 1]` for the n-th call, after an optional delay on the first call.
    struct CountingEmbedder {
        calls: AtomicUsize,
        first_delay: Duration,
        available: bool,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                first_delay: Duration::ZERO,
                available: true,
            }
        }
    }

    #[async_trait]
    impl ImageEmbedder for CountingEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn embed_image(&self, _image: &CanonicalImage) -> Result<Vec<f32>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                tokio::time::sleep(self.first_delay).await;
            }
            Ok(vec![n as f32, 1.0])
        }

        async fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 1.0])
        }
    }

    fn image() -> CanonicalImage {
        CanonicalImage::new(
            GrayImage::new(4, 4),
            ImageMetadata {
                source_width: 4,
                source_height: 4,
                width: 4,
                height: 4,
                format: None,
                rotation: Rotation::None,
                skew_degrees: 0.0,
            },
        )
    }

    #[tokio::test]
    async fn test_reindexing_keeps_one_latest_vector() {
        let index = Arc::new(InMemoryIndex::new(2));
        let indexer = EmbeddingIndexer::new(Arc::new(CountingEmbedder::new()), index.clone());

        indexer.index_image("doc", &image()).await.unwrap();
        indexer.index_image("doc", &image()).await.unwrap();

        assert_eq!(index.len().await, 1);
        assert_eq!(index.get("doc").await, Some(vec![2.0, 1.0]));
        assert_eq!(indexer.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_same_identifier_writes_are_serialized() {
        let index = Arc::new(InMemoryIndex::new(2));
        let mut embedder = CountingEmbedder::new();
        embedder.first_delay = Duration::from_millis(50);
        let indexer = Arc::new(EmbeddingIndexer::new(Arc::new(embedder), index.clone()));

        let first = indexer.dispatch("doc".to_string(), image());
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = indexer.dispatch("doc".to_string(), image());
        first.await.unwrap();
        second.await.unwrap();

        // The slow first write cannot land after the second one
        assert_eq!(index.get("doc").await, Some(vec![2.0, 1.0]));
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_unavailable_embedder_leaves_index_empty() {
        let index = Arc::new(InMemoryIndex::new(2));
        let mut embedder = CountingEmbedder::new();
        embedder.available = false;
        let indexer = Arc::new(EmbeddingIndexer::new(Arc::new(embedder), index.clone()));

        let err = indexer.index_image("doc", &image()).await.unwrap_err();
        assert!(matches!(err, KadrError::EmbeddingUnavailable(_)));

        // Background failures are swallowed
        indexer.dispatch("doc".to_string(), image()).await.unwrap();
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_identifier_rejected() {
        let indexer = EmbeddingIndexer::new(
            Arc::new(CountingEmbedder::new()),
            Arc::new(InMemoryIndex::new(2)),
        );
        assert!(matches!(
            indexer.index_image("  ", &image()).await,
            Err(KadrError::Validation(_))
        ));
    }
}
