use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::models::Script;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse `OCR_SCRIPTS`.
/// Format: comma-separated script names, e.g. `latin,cyrillic`
fn parse_scripts(raw: &str) -> Vec<Script> {
    let mut scripts = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.parse::<Script>() {
            Ok(Script::Unknown) => {
                tracing::warn!("'unknown' is not an installable script in OCR_SCRIPTS, skipping");
            }
            Ok(script) if !scripts.contains(&script) => scripts.push(script),
            Ok(_) => {}
            Err(e) => tracing::warn!("Invalid script in OCR_SCRIPTS: {}, skipping", e),
        }
    }
    if scripts.is_empty() {
        tracing::warn!("OCR_SCRIPTS names no usable script, falling back to latin");
        scripts.push(Script::Latin);
    }
    scripts
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub ocr: OcrConfig,
    pub pipeline: PipelineConfig,
    pub embeddings: EmbeddingsConfig,
    pub catalog: Option<CatalogConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    pub model: String,
    pub tessdata_dir: Option<String>,
    /// Installed-script allowlist.
    pub scripts: Vec<Script>,
    /// Minimum overall confidence (0..1) for an attempt to be accepted.
    pub accept_confidence: f32,
    /// Minimum orientation confidence (0..1) before a detected rotation is applied.
    pub orientation_confidence: f32,
    pub attempt_timeout_ms: u64,
    /// How many recognitions may run on the engine at once.
    pub engine_concurrency: usize,
    /// Images with a side above this are rejected.
    pub max_image_dimension: u32,
    /// Images with a side above this are downscaled before recognition.
    pub target_image_dimension: u32,
    pub min_image_dimension: u32,
    pub max_image_bytes: usize,
    pub deskew: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Outer deadline for one document, across all attempts.
    pub deadline_ms: u64,
    /// Documents processed concurrently.
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub enabled: bool,
    pub model: String,
    pub dimensions: usize,
    pub cache_dir: String,
    pub max_results: usize,
}

/// OMDB title lookup, enabled by setting `OMDB_API_KEY`.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model: "local/tesseract".to_string(),
            tessdata_dir: None,
            scripts: vec![Script::Latin, Script::Cyrillic],
            accept_confidence: 0.6,
            orientation_confidence: 0.8,
            attempt_timeout_ms: 30_000,
            engine_concurrency: 2,
            max_image_dimension: 10_000,
            target_image_dimension: 4096,
            min_image_dimension: 8,
            max_image_bytes: 20 * 1024 * 1024,
            deskew: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 90_000,
            workers: 4,
        }
    }
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "Qdrant/clip-ViT-B-32-vision".to_string(),
            dimensions: 512,
            cache_dir: ".fastembed_cache".to_string(),
            max_results: 50,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let ocr_defaults = OcrConfig::default();
        let pipeline_defaults = PipelineConfig::default();
        let embedding_defaults = EmbeddingsConfig::default();

        Self {
            server: ServerConfig {
                host: env::var("KADR_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env_or("KADR_PORT", 3000),
                max_body_bytes: parse_env_or("KADR_MAX_BODY_BYTES", 20 * 1024 * 1024),
            },
            ocr: OcrConfig {
                model: env::var("OCR_MODEL").unwrap_or(ocr_defaults.model),
                tessdata_dir: env::var("OCR_TESSDATA_DIR")
                    .or_else(|_| env::var("TESSDATA_PREFIX"))
                    .ok(),
                scripts: env::var("OCR_SCRIPTS")
                    .map(|raw| parse_scripts(&raw))
                    .unwrap_or(ocr_defaults.scripts),
                accept_confidence: parse_env_or(
                    "OCR_ACCEPT_CONFIDENCE",
                    ocr_defaults.accept_confidence,
                ),
                orientation_confidence: parse_env_or(
                    "OCR_ORIENTATION_CONFIDENCE",
                    ocr_defaults.orientation_confidence,
                ),
                attempt_timeout_ms: parse_env_or(
                    "OCR_ATTEMPT_TIMEOUT_MS",
                    ocr_defaults.attempt_timeout_ms,
                ),
                engine_concurrency: parse_env_or(
                    "OCR_ENGINE_CONCURRENCY",
                    ocr_defaults.engine_concurrency,
                ),
                max_image_dimension: parse_env_or(
                    "OCR_MAX_DIMENSION",
                    ocr_defaults.max_image_dimension,
                ),
                target_image_dimension: parse_env_or(
                    "OCR_TARGET_DIMENSION",
                    ocr_defaults.target_image_dimension,
                ),
                min_image_dimension: parse_env_or(
                    "OCR_MIN_DIMENSION",
                    ocr_defaults.min_image_dimension,
                ),
                max_image_bytes: parse_env_or("OCR_MAX_IMAGE_BYTES", ocr_defaults.max_image_bytes),
                deskew: parse_env_or("OCR_DESKEW", ocr_defaults.deskew),
            },
            pipeline: PipelineConfig {
                deadline_ms: parse_env_or("PIPELINE_DEADLINE_MS", pipeline_defaults.deadline_ms),
                workers: parse_env_or("PIPELINE_WORKERS", pipeline_defaults.workers),
            },
            embeddings: EmbeddingsConfig {
                enabled: parse_env_or("EMBEDDINGS_ENABLED", embedding_defaults.enabled),
                model: env::var("EMBEDDING_MODEL").unwrap_or(embedding_defaults.model),
                dimensions: parse_env_or("EMBEDDING_DIMENSIONS", embedding_defaults.dimensions),
                cache_dir: env::var("EMBEDDING_CACHE_DIR")
                    .unwrap_or(embedding_defaults.cache_dir),
                max_results: parse_env_or("SEARCH_MAX_RESULTS", embedding_defaults.max_results),
            },
            catalog: env::var("OMDB_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty())
                .map(|api_key| CatalogConfig {
                    api_key,
                    base_url: env::var("OMDB_BASE_URL")
                        .unwrap_or_else(|_| "http://www.omdbapi.com/".to_string()),
                    timeout_secs: parse_env_or("OMDB_TIMEOUT", 10),
                }),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// Immutable knobs the recognition stages read, derived once from [`Config`].
#[derive(Debug, Clone)]
pub struct RecognitionSettings {
    pub accept_confidence: f32,
    pub orientation_confidence: f32,
    pub attempt_timeout: Duration,
    pub deadline: Duration,
    pub scripts: Vec<Script>,
}

impl RecognitionSettings {
    pub fn new(ocr: &OcrConfig, pipeline: &PipelineConfig) -> Self {
        Self {
            accept_confidence: ocr.accept_confidence.clamp(0.0, 1.0),
            orientation_confidence: ocr.orientation_confidence.clamp(0.0, 1.0),
            attempt_timeout: Duration::from_millis(ocr.attempt_timeout_ms.max(1)),
            deadline: Duration::from_millis(pipeline.deadline_ms.max(1)),
            scripts: ocr.scripts.clone(),
        }
    }
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self::new(&OcrConfig::default(), &PipelineConfig::default())
    }
}
