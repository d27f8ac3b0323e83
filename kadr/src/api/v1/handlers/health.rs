use axum::extract::State;

use crate::api::state::AppState;
use crate::api::v1::dto::HealthData;
use crate::api::v1::response::ApiResponse;

/// `GET /api/v1/health`
///
/// Always 200. A missing engine or embedding model shows up in the payload,
/// not as an error, since the pipeline degrades around both.
pub async fn health_check(State(state): State<AppState>) -> ApiResponse<HealthData> {
    let pipeline = state.pipeline.status().await;
    let status = if pipeline.installed_languages.is_empty() {
        "degraded"
    } else {
        "ok"
    };

    ApiResponse::success(HealthData {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pipeline,
        catalog_enabled: state.catalog.is_some(),
    })
}
