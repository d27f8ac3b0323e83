use axum::body::Bytes;
use axum::extract::State;
use tracing::debug;

use crate::api::v1::dto::IdentifyResponse;
use crate::api::v1::response::{ApiResponse, ErrorCode};
use crate::api::AppState;
use crate::models::ImageDocument;

/// `POST /api/v1/identify`
///
/// Recognises the image, derives title queries from the text and returns the first
/// catalog match. `media` is null when nothing matched.
pub async fn identify(State(state): State<AppState>, body: Bytes) -> ApiResponse<IdentifyResponse> {
    let Some(catalog) = state.catalog.clone() else {
        return ApiResponse::error(
            ErrorCode::NotImplemented,
            "Title lookup is not configured (set OMDB_API_KEY)",
        );
    };
    if body.is_empty() {
        return ApiResponse::error(ErrorCode::InvalidRequest, "Request body must be an image");
    }

    let (cancel, _guard) = state.request_token();
    let recognition = match state
        .pipeline
        .recognize_document(ImageDocument::new(body.to_vec()), &cancel)
        .await
    {
        Ok(result) => result,
        Err(e) => return e.into(),
    };

    let queries = recognition.title_queries();
    debug!(document_id = %recognition.document_id, queries = ?queries, "Identifying title");
    let media = catalog.identify(&queries).await;

    ApiResponse::success(IdentifyResponse {
        recognition,
        queries,
        media,
    })
}
