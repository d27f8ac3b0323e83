//! Entry points the transport layer calls: `recognize`, `index` and `search`.

mod orchestrator;
mod plan;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, RecognitionSettings};
use crate::embeddings::ImageEmbedder;
use crate::error::{KadrError, Result};
use crate::index::{EmbeddingIndexer, VectorIndex};
use crate::models::{CanonicalImage, ImageDocument, RecognitionResult, Script, SearchHit, SearchQuery};
use crate::ocr::{EngineGate, ImageNormalizer, OcrEngine, RecognitionAdapter, ScriptDetector};
use crate::services::SearchService;

pub use orchestrator::{Orchestrator, State};
pub use plan::build_queue;

/// Snapshot of the capabilities behind the pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub engine: String,
    pub installed_languages: Vec<String>,
    pub installed_scripts: Vec<Script>,
    pub embeddings_available: bool,
    pub indexed_documents: usize,
}

pub struct RecognitionPipeline {
    normalizer: ImageNormalizer,
    orchestrator: Orchestrator,
    indexer: Arc<EmbeddingIndexer>,
    search: SearchService,
    workers: Arc<Semaphore>,
}

impl RecognitionPipeline {
    pub fn new(
        config: &Config,
        engine: Arc<dyn OcrEngine>,
        embedder: Arc<dyn ImageEmbedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        let settings = RecognitionSettings::new(&config.ocr, &config.pipeline);
        let normalizer = ImageNormalizer::new(&config.ocr);

        let gate = EngineGate::new(engine, config.ocr.engine_concurrency);
        let detector = ScriptDetector::new(
            gate.clone(),
            settings.scripts.clone(),
            settings.attempt_timeout,
        );
        let adapter = RecognitionAdapter::new(gate, settings.attempt_timeout);
        let orchestrator = Orchestrator::new(detector, adapter, normalizer.clone(), settings);

        let search = SearchService::new(
            Arc::clone(&embedder),
            Arc::clone(&index),
            normalizer.clone(),
            config.embeddings.max_results,
        );

        Self {
            normalizer,
            orchestrator,
            indexer: Arc::new(EmbeddingIndexer::new(embedder, index)),
            search,
            workers: Arc::new(Semaphore::new(config.pipeline.workers.max(1))),
        }
    }

    /// Recognise an image under a fresh identifier.
    pub async fn recognize(&self, image_bytes: Vec<u8>) -> Result<RecognitionResult> {
        self.recognize_document(ImageDocument::new(image_bytes), &CancellationToken::new())
            .await
    }

    /// Returns a result, possibly with empty text, or one of the hard failures: an
    /// unreadable image or every configuration erroring. `Cancelled` when `cancel` fires.
    ///
    /// The pipeline deadline runs from the moment the document arrives, so time spent
    /// queued for a worker or decoding counts against it. `DeadlineExceeded` when it
    /// passes before the image is decoded.
    pub async fn recognize_document(
        &self,
        document: ImageDocument,
        cancel: &CancellationToken,
    ) -> Result<RecognitionResult> {
        let deadline = self.deadline_from_now();
        let (_permit, document_id, image) = self.admit(document, deadline, cancel).await?;
        self.orchestrator
            .run_until(&document_id, image, deadline, cancel)
            .await
    }

    /// Recognise, then index the same canonical bitmap in the background.
    ///
    /// Indexing never delays or alters the recognition result; a cancelled run indexes nothing.
    pub async fn recognize_and_index(
        &self,
        document: ImageDocument,
        cancel: &CancellationToken,
    ) -> Result<RecognitionResult> {
        let deadline = self.deadline_from_now();
        let (_permit, document_id, image) = self.admit(document, deadline, cancel).await?;
        let result = self
            .orchestrator
            .run_until(&document_id, image.clone(), deadline, cancel)
            .await;

        if !matches!(result, Err(KadrError::Cancelled)) {
            self.indexer.dispatch(document_id, image);
        }
        result
    }

    /// Best-effort indexing. Unreadable images are rejected up front; embedding happens in
    /// the background and its failures are only logged.
    pub async fn index(
        &self,
        document_id: impl Into<String>,
        image_bytes: Vec<u8>,
    ) -> Result<JoinHandle<()>> {
        let document = ImageDocument::with_id(document_id, image_bytes);
        if document.id.trim().is_empty() {
            return Err(KadrError::Validation(
                "Document identifier must not be empty".to_string(),
            ));
        }
        let (document_id, image) = self.normalize_document(document).await?;
        Ok(self.indexer.dispatch(document_id, image))
    }

    pub async fn search(&self, query: SearchQuery, k: usize) -> Result<Vec<SearchHit>> {
        self.search.search(query, k).await
    }

    pub async fn status(&self) -> PipelineStatus {
        let detector = self.orchestrator.detector();
        let catalog = detector.catalog();
        PipelineStatus {
            engine: detector.engine_name().to_string(),
            installed_languages: catalog.installed_languages().map(str::to_string).collect(),
            installed_scripts: catalog.installed_scripts(),
            embeddings_available: self.indexer.embedder().is_available(),
            indexed_documents: self.indexer.index().len().await,
        }
    }

    fn deadline_from_now(&self) -> Instant {
        Instant::now() + self.orchestrator.settings().deadline
    }

    /// Wait for a worker, then decode, both bounded by `deadline` and `cancel`.
    async fn admit(
        &self,
        document: ImageDocument,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(OwnedSemaphorePermit, String, CanonicalImage)> {
        let document_id = document.id.clone();
        let admitted = async {
            let permit = Arc::clone(&self.workers)
                .acquire_owned()
                .await
                .map_err(|_| KadrError::Internal("Worker pool closed".to_string()))?;
            let (id, image) = self.normalize_document(document).await?;
            Ok::<_, KadrError>((permit, id, image))
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(KadrError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                warn!(document_id = %document_id, "Pipeline deadline passed before recognition started");
                Err(KadrError::DeadlineExceeded {
                    deadline_ms: self.orchestrator.settings().deadline.as_millis() as u64,
                })
            }
            admitted = admitted => admitted,
        }
    }

    /// Decode off the async runtime. The raw payload is dropped once the bitmap exists.
    async fn normalize_document(&self, document: ImageDocument) -> Result<(String, CanonicalImage)> {
        let ImageDocument { id, payload } = document;
        let normalizer = self.normalizer.clone();
        let image = tokio::task::spawn_blocking(move || normalizer.normalize(&payload))
            .await
            .map_err(|e| KadrError::Internal(format!("Normalizer task panicked: {e}")))?;

        match image {
            Ok(image) => {
                debug!(
                    document_id = %id,
                    width = image.width(),
                    height = image.height(),
                    "Document normalized"
                );
                Ok((id, image))
            }
            Err(e) => {
                info!(document_id = %id, error = %e, "Rejected unreadable image");
                Err(e)
            }
        }
    }
}
