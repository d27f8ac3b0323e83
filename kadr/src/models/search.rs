use serde::{Deserialize, Serialize};

/// What to search the image index with.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchQuery {
    Embedding(Vec<f32>),
    /// Encoded image bytes, normalized and embedded before searching.
    Image(Vec<u8>),
    /// Free text, embedded with the text half of the image model.
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub document_id: String,
    pub similarity: f32,
}
