use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CatalogConfig;
use crate::error::{KadrError, Result};

/// A film or series found by title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub title: String,
    pub year: String,
    pub plot: String,
    pub rating: Option<String>,
    pub poster: Option<String>,
    /// `Movie`, `Series`, `Episode`
    pub media_type: String,
    pub imdb_id: String,
}

#[derive(Debug, Deserialize)]
struct TitleResponse {
    #[serde(rename = "Response")]
    response: String,
    #[serde(rename = "Title", default)]
    title: String,
    #[serde(rename = "Year", default)]
    year: String,
    #[serde(rename = "Plot", default)]
    plot: String,
    #[serde(rename = "imdbRating", default)]
    rating: String,
    #[serde(rename = "Poster", default)]
    poster: String,
    #[serde(rename = "Type", default)]
    media_type: String,
    #[serde(rename = "imdbID", default)]
    imdb_id: String,
    #[serde(rename = "Error")]
    error: Option<String>,
}

impl TitleResponse {
    fn into_media(self) -> MediaInfo {
        MediaInfo {
            title: self.title,
            year: self.year,
            plot: self.plot,
            rating: not_available(self.rating),
            poster: not_available(self.poster),
            media_type: capitalize(&self.media_type),
            imdb_id: self.imdb_id,
        }
    }
}

/// OMDB title lookup client.
#[derive(Clone, Debug)]
pub struct OmdbClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OmdbClient {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KadrError::Catalog(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
        })
    }

    /// Exact-title lookup. `Ok(None)` when the catalog has no match or the query is too short.
    pub async fn lookup(&self, query: &str) -> Result<Option<MediaInfo>> {
        let query = query.trim();
        if query.chars().count() < 2 {
            return Ok(None);
        }

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("t", query),
                ("plot", "full"),
                ("r", "json"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(KadrError::Catalog(format!(
                "Catalog answered {status} for '{query}'"
            )));
        }

        let body: TitleResponse = response.json().await?;
        if body.response != "True" {
            debug!(
                query = %query,
                reason = body.error.as_deref().unwrap_or("no match"),
                "Catalog miss"
            );
            return Ok(None);
        }

        Ok(Some(body.into_media()))
    }

    /// First hit across `queries`, tried in order. Failing lookups are logged and skipped.
    pub async fn identify(&self, queries: &[String]) -> Option<MediaInfo> {
        for query in queries {
            match self.lookup(query).await {
                Ok(Some(media)) => {
                    debug!(query = %query, title = %media.title, "Catalog hit");
                    return Some(media);
                }
                Ok(None) => {}
                Err(e) => warn!(query = %query, error = %e, "Catalog lookup failed"),
            }
        }
        None
    }
}

fn not_available(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty() && value != "N/A").then(|| value.to_string())
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
