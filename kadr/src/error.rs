use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::api::v1::response::ApiResponse;

#[derive(Error, Debug)]
pub enum KadrError {
    #[error("Unreadable image: {0}")]
    Decode(String),

    #[error("Corrupt image: {0}")]
    CorruptImage(String),

    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Recognition timed out after {timeout_ms} ms")]
    RecognitionTimeout { timeout_ms: u64 },

    #[error("Pipeline deadline of {deadline_ms} ms passed before recognition started")]
    DeadlineExceeded { deadline_ms: u64 },

    #[error("All {attempts} recognition configurations failed")]
    AllConfigurationsFailed { attempts: usize },

    #[error("Embedding model unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("OCR error: {0}")]
    Ocr(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KadrError {
    /// Errors that reach the caller of `recognize` instead of degrading the result.
    pub fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            KadrError::Decode(_)
                | KadrError::CorruptImage(_)
                | KadrError::AllConfigurationsFailed { .. }
        )
    }

    /// Malformed input, reported to users as an unreadable image.
    pub fn is_unreadable_image(&self) -> bool {
        matches!(self, KadrError::Decode(_) | KadrError::CorruptImage(_))
    }
}

impl IntoResponse for KadrError {
    fn into_response(self) -> Response {
        ApiResponse::<()>::from(self).into_response()
    }
}

pub type Result<T> = std::result::Result<T, KadrError>;
