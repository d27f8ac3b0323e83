use axum::{
    routing::{get, post, put},
    Router,
};

use crate::api::state::AppState;

use super::handlers;

pub fn v1_router() -> Router<AppState> {
    let index = Router::new().route("/{documentId}", put(handlers::documents::index_document));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/recognize", post(handlers::documents::recognize))
        .route("/identify", post(handlers::identify::identify))
        .route("/search", post(handlers::search::search))
        .route("/search:image", post(handlers::search::search_by_image))
        .nest("/index", index)
}
