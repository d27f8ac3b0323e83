use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::debug;

use super::engine::{EngineOutput, OcrEngine, OrientationReport};
use crate::error::{KadrError, Result};
use crate::models::CanonicalImage;

/// Shared access to the OCR engine, capped at its safe concurrency.
///
/// Detection passes and recognition attempts draw from the same permits. A permit is held
/// until the engine work itself returns: a call that outlives its timeout keeps running in
/// the background and keeps its permit until then.
#[derive(Clone)]
pub struct EngineGate {
    engine: Arc<dyn OcrEngine>,
    permits: Arc<Semaphore>,
}

impl EngineGate {
    pub fn new(engine: Arc<dyn OcrEngine>, concurrency: usize) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn engine(&self) -> &Arc<dyn OcrEngine> {
        &self.engine
    }

    /// Permits not held by a running engine call.
    pub fn idle_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// `Ok(None)` when the engine did not answer within `timeout`.
    pub async fn recognize(
        &self,
        image: CanonicalImage,
        languages: String,
        timeout: Duration,
    ) -> Result<Option<EngineOutput>> {
        self.call(timeout, move |engine| async move {
            engine.recognize(&image, &languages).await
        })
        .await
    }

    /// `Ok(None)` when the engine did not answer within `timeout`.
    pub async fn detect_orientation(
        &self,
        image: CanonicalImage,
        timeout: Duration,
    ) -> Result<Option<OrientationReport>> {
        self.call(timeout, move |engine| async move {
            engine.detect_orientation(&image).await
        })
        .await
    }

    async fn call<T, F, Fut>(&self, timeout: Duration, work: F) -> Result<Option<T>>
    where
        F: FnOnce(Arc<dyn OcrEngine>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| KadrError::EngineUnavailable("OCR engine is shut down".to_string()))?;

        let work = work(Arc::clone(&self.engine));
        let task = tokio::spawn(async move {
            let result = work.await;
            drop(permit);
            result
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result.map(Some),
            Ok(Err(e)) => Err(KadrError::Ocr(format!("Engine task failed: {e}"))),
            Err(_) => {
                debug!(
                    engine = self.engine.name(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Engine call outlived its timeout, permit held until it returns"
                );
                Ok(None)
            }
        }
    }
}
