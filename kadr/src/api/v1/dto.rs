//! Wire types for the v1 endpoints. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::catalog::MediaInfo;
use crate::error::{KadrError, Result};
use crate::models::{RecognitionResult, SearchHit, SearchQuery};
use crate::pipeline::PipelineStatus;

fn default_k() -> usize {
    10
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthData {
    pub status: String,
    pub version: String,
    pub pipeline: PipelineStatus,
    pub catalog_enabled: bool,
}

/// Query string of `POST /api/v1/recognize`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizeParams {
    /// When set, the image is also indexed under this identifier.
    pub document_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexAccepted {
    pub document_id: String,
}

/// Body of `POST /api/v1/search`. Exactly one of `embedding` or `text` must be set.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub embedding: Option<Vec<f32>>,
    pub text: Option<String>,
    #[serde(default = "default_k")]
    pub k: usize,
}

impl SearchRequest {
    pub fn into_query(self) -> Result<(SearchQuery, usize)> {
        let query = match (self.embedding, self.text) {
            (Some(embedding), None) => SearchQuery::Embedding(embedding),
            (None, Some(text)) => SearchQuery::Text(text),
            (Some(_), Some(_)) => {
                return Err(KadrError::Validation(
                    "Provide either 'embedding' or 'text', not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(KadrError::Validation(
                    "Provide 'embedding' or 'text'".to_string(),
                ))
            }
        };
        Ok((query, self.k))
    }
}

/// Query string of `POST /api/v1/search:image`.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageSearchParams {
    #[serde(default = "default_k")]
    pub k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyResponse {
    pub recognition: RecognitionResult,
    pub queries: Vec<String>,
    pub media: Option<MediaInfo>,
}
