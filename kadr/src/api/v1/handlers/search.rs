//! v1 Search handlers: by embedding or text, and by example image.

use axum::body::Bytes;
use axum::extract::{Query, State};

use crate::api::v1::dto::{ImageSearchParams, SearchRequest, SearchResponse};
use crate::api::v1::response::{ApiResponse, ErrorCode};
use crate::api::AppState;
use crate::models::SearchQuery;

/// `POST /api/v1/search`
pub async fn search(
    State(state): State<AppState>,
    axum::Json(req): axum::Json<SearchRequest>,
) -> ApiResponse<SearchResponse> {
    let (query, k) = match req.into_query() {
        Ok(parsed) => parsed,
        Err(e) => return e.into(),
    };

    match state.pipeline.search(query, k).await {
        Ok(hits) => ApiResponse::success(SearchResponse { hits }),
        Err(e) => e.into(),
    }
}

/// `POST /api/v1/search:image?k=`
pub async fn search_by_image(
    State(state): State<AppState>,
    Query(params): Query<ImageSearchParams>,
    body: Bytes,
) -> ApiResponse<SearchResponse> {
    if body.is_empty() {
        return ApiResponse::error(ErrorCode::InvalidRequest, "Request body must be an image");
    }

    match state
        .pipeline
        .search(SearchQuery::Image(body.to_vec()), params.k)
        .await
    {
        Ok(hits) => ApiResponse::success(SearchResponse { hits }),
        Err(e) => e.into(),
    }
}
