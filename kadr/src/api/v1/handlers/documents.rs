//! v1 Document handlers.
//!
//! Recognition and indexing of raw image bodies. Every request runs under its own
//! cancellation token, so a client that disconnects aborts its recognition.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use tracing::info;

use crate::api::v1::dto::{IndexAccepted, RecognizeParams};
use crate::api::v1::response::{ApiResponse, ErrorCode};
use crate::api::AppState;
use crate::models::{ImageDocument, RecognitionResult};

/// `POST /api/v1/recognize`
///
/// With `?documentId=` the same image is indexed in the background once recognition
/// finishes. Indexing never changes the response.
pub async fn recognize(
    State(state): State<AppState>,
    Query(params): Query<RecognizeParams>,
    body: Bytes,
) -> ApiResponse<RecognitionResult> {
    if body.is_empty() {
        return ApiResponse::error(ErrorCode::InvalidRequest, "Request body must be an image");
    }

    let (cancel, _guard) = state.request_token();
    let result = match params.document_id {
        Some(id) if id.trim().is_empty() => {
            return ApiResponse::error(ErrorCode::InvalidRequest, "documentId cannot be empty");
        }
        Some(id) => {
            state
                .pipeline
                .recognize_and_index(ImageDocument::with_id(id, body.to_vec()), &cancel)
                .await
        }
        None => {
            state
                .pipeline
                .recognize_document(ImageDocument::new(body.to_vec()), &cancel)
                .await
        }
    };

    match result {
        Ok(result) => {
            info!(
                document_id = %result.document_id,
                attempts = result.attempts.len(),
                accepted = result.is_accepted(),
                "Recognition finished"
            );
            ApiResponse::success(result)
        }
        Err(e) => e.into(),
    }
}

/// `PUT /api/v1/index/{documentId}`
///
/// Returns 202 once the image has been decoded; the embedding is computed in the
/// background and a failure there is only logged.
pub async fn index_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    body: Bytes,
) -> ApiResponse<IndexAccepted> {
    if body.is_empty() {
        return ApiResponse::error(ErrorCode::InvalidRequest, "Request body must be an image");
    }

    match state.pipeline.index(document_id.clone(), body.to_vec()).await {
        Ok(_task) => ApiResponse::accepted(IndexAccepted { document_id }),
        Err(e) => e.into(),
    }
}
