use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::catalog::OmdbClient;
use crate::config::Config;
use crate::pipeline::RecognitionPipeline;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<RecognitionPipeline>,
    /// Title lookup, present only when a catalog key is configured.
    pub catalog: Option<OmdbClient>,
    /// Cancelled on shutdown; every request runs under a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: Config,
        pipeline: RecognitionPipeline,
        catalog: Option<OmdbClient>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            catalog,
            shutdown,
        }
    }

    /// Token for one request. Dropping the guard, which happens when the client
    /// disconnects and axum drops the handler future, cancels the recognition.
    pub fn request_token(&self) -> (CancellationToken, tokio_util::sync::DropGuard) {
        let token = self.shutdown.child_token();
        let guard = token.clone().drop_guard();
        (token, guard)
    }
}
