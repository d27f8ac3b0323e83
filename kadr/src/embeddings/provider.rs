use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{
    EmbeddingModel, ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions,
    TextEmbedding,
};
use tracing::{info, warn};

use crate::config::EmbeddingsConfig;
use crate::error::{KadrError, Result};
use crate::models::CanonicalImage;

/// External embedding model capability.
///
/// Vectors from `embed_image` and `embed_text` share one space, so text can search images.
#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    fn dimensions(&self) -> usize;

    fn is_available(&self) -> bool;

    async fn embed_image(&self, image: &CanonicalImage) -> Result<Vec<f32>>;

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

enum EmbeddingBackend {
    Local {
        image_model: Arc<Mutex<ImageEmbedding>>,
        /// Text tower of the same model, when it has one.
        text_model: Option<Arc<Mutex<TextEmbedding>>>,
    },
    Unavailable {
        reason: String,
    },
}

/// fastembed-backed CLIP-style embedder. Degrades to an unavailable backend instead of
/// failing startup when the model cannot be loaded.
pub struct EmbeddingProvider {
    backend: EmbeddingBackend,
    dimensions: usize,
}

impl EmbeddingProvider {
    pub fn new(config: &EmbeddingsConfig) -> Self {
        let spec = resolve_models(&config.model);
        if !config.enabled {
            let dimensions = spec
                .as_ref()
                .map_or(config.dimensions, |spec| model_dimensions(config, spec));
            return Self::unavailable("Embeddings disabled", dimensions);
        }

        let Some(spec) = spec else {
            let reason = format!("Unsupported embedding model '{}'", config.model);
            warn!("{}", reason);
            return Self::unavailable(reason, config.dimensions);
        };
        let dimensions = model_dimensions(config, &spec);
        let ModelSpec {
            image: image_model,
            text: text_model,
            ..
        } = spec;

        let cache_dir = PathBuf::from(&config.cache_dir);
        let image = match ImageEmbedding::try_new(
            ImageInitOptions::new(image_model)
                .with_cache_dir(cache_dir.clone())
                .with_show_download_progress(true),
        ) {
            Ok(model) => model,
            Err(e) => {
                let reason = format!("Image embedding model failed to load: {e}");
                warn!("{}", reason);
                return Self::unavailable(reason, dimensions);
            }
        };

        let text = text_model.and_then(|model| {
            match TextEmbedding::try_new(
                InitOptions::new(model)
                    .with_cache_dir(cache_dir)
                    .with_show_download_progress(true),
            ) {
                Ok(model) => Some(Arc::new(Mutex::new(model))),
                Err(e) => {
                    warn!("Text embedding model failed to load, text search disabled: {e}");
                    None
                }
            }
        });

        info!(
            model = %config.model,
            dimensions,
            text_search = text.is_some(),
            "Embedding model initialized"
        );

        Self {
            backend: EmbeddingBackend::Local {
                image_model: Arc::new(Mutex::new(image)),
                text_model: text,
            },
            dimensions,
        }
    }

    pub fn unavailable(reason: impl Into<String>, dimensions: usize) -> Self {
        Self {
            backend: EmbeddingBackend::Unavailable {
                reason: reason.into(),
            },
            dimensions,
        }
    }

    fn check(&self, mut embeddings: Vec<Vec<f32>>) -> Result<Vec<f32>> {
        let embedding = embeddings
            .pop()
            .ok_or_else(|| KadrError::Embedding("No embedding generated".to_string()))?;
        if embedding.len() != self.dimensions {
            return Err(KadrError::Embedding(format!(
                "Model returned {} dimensions, expected {}",
                embedding.len(),
                self.dimensions
            )));
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(KadrError::Embedding(
                "Model returned a non-finite embedding".to_string(),
            ));
        }
        Ok(embedding)
    }
}

#[async_trait]
impl ImageEmbedder for EmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn is_available(&self) -> bool {
        !matches!(self.backend, EmbeddingBackend::Unavailable { .. })
    }

    async fn embed_image(&self, image: &CanonicalImage) -> Result<Vec<f32>> {
        let model = match &self.backend {
            EmbeddingBackend::Local { image_model, .. } => Arc::clone(image_model),
            EmbeddingBackend::Unavailable { reason } => {
                return Err(KadrError::EmbeddingUnavailable(reason.clone()))
            }
        };
        let png = image.to_png()?;

        let embeddings = tokio::task::spawn_blocking(move || {
            let mut model = model.lock().map_err(|e| {
                KadrError::Embedding(format!("Embedding model lock poisoned: {e}"))
            })?;
            model
                .embed_bytes(&[png.as_slice()], None)
                .map_err(|e| KadrError::Embedding(e.to_string()))
        })
        .await
        .map_err(|e| KadrError::Embedding(format!("Embedding worker failed: {e}")))??;

        self.check(embeddings)
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let model = match &self.backend {
            EmbeddingBackend::Local {
                text_model: Some(text_model),
                ..
            } => Arc::clone(text_model),
            EmbeddingBackend::Local {
                text_model: None, ..
            } => {
                return Err(KadrError::EmbeddingUnavailable(
                    "Embedding model has no text encoder".to_string(),
                ))
            }
            EmbeddingBackend::Unavailable { reason } => {
                return Err(KadrError::EmbeddingUnavailable(reason.clone()))
            }
        };
        let text = text.to_string();

        let embeddings = tokio::task::spawn_blocking(move || {
            let mut model = model.lock().map_err(|e| {
                KadrError::Embedding(format!("Embedding model lock poisoned: {e}"))
            })?;
            model
                .embed(vec![text], None)
                .map_err(|e| KadrError::Embedding(e.to_string()))
        })
        .await
        .map_err(|e| KadrError::Embedding(format!("Embedding worker failed: {e}")))??;

        self.check(embeddings)
    }
}

/// Image model, the matching text model if the family has one, and their vector size.
struct ModelSpec {
    image: ImageEmbeddingModel,
    text: Option<EmbeddingModel>,
    dimensions: usize,
}

fn resolve_models(model_name: &str) -> Option<ModelSpec> {
    let name = model_name.strip_prefix("local/").unwrap_or(model_name);
    let (image, text, dimensions) = match name.to_lowercase().as_str() {
        "qdrant/clip-vit-b-32-vision" | "clip-vit-b-32-vision" | "clip-vit-b-32" => (
            ImageEmbeddingModel::ClipVitB32,
            Some(EmbeddingModel::ClipVitB32),
            512,
        ),
        "nomic-ai/nomic-embed-vision-v1.5" | "nomic-embed-vision-v1.5" => (
            ImageEmbeddingModel::NomicEmbedVisionV15,
            Some(EmbeddingModel::NomicEmbedTextV15),
            768,
        ),
        "qdrant/resnet50-onnx" | "resnet50" => (ImageEmbeddingModel::Resnet50, None, 2048),
        "qdrant/unicom-vit-b-16" | "unicom-vit-b-16" => {
            (ImageEmbeddingModel::UnicomVitB16, None, 768)
        }
        "qdrant/unicom-vit-b-32" | "unicom-vit-b-32" => {
            (ImageEmbeddingModel::UnicomVitB32, None, 512)
        }
        _ => return None,
    };
    Some(ModelSpec {
        image,
        text,
        dimensions,
    })
}

/// The model decides the vector size; a conflicting `EMBEDDING_DIMENSIONS` is overridden.
fn model_dimensions(config: &EmbeddingsConfig, spec: &ModelSpec) -> usize {
    if config.dimensions != spec.dimensions {
        warn!(
            model = %config.model,
            configured = config.dimensions,
            native = spec.dimensions,
            "EMBEDDING_DIMENSIONS does not match the model, using the model's size"
        );
    }
    spec.dimensions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ImageMetadata, Rotation};
    use image::GrayImage;

    fn image() -> CanonicalImage {
        CanonicalImage::new(
            GrayImage::new(8, 8),
            ImageMetadata {
                source_width: 8,
                source_height: 8,
                width: 8,
                height: 8,
                format: None,
                rotation: Rotation::None,
                skew_degrees: 0.0,
            },
        )
    }

    #[test]
    fn test_resolve_models() {
        let clip = resolve_models("Qdrant/clip-ViT-B-32-vision").unwrap();
        assert!(matches!(clip.image, ImageEmbeddingModel::ClipVitB32));
        assert!(matches!(clip.text, Some(EmbeddingModel::ClipVitB32)));
        assert_eq!(clip.dimensions, 512);

        let resnet = resolve_models("local/Qdrant/resnet50-onnx").unwrap();
        assert!(matches!(resnet.image, ImageEmbeddingModel::Resnet50));
        assert!(resnet.text.is_none());

        assert!(resolve_models("openai/text-embedding-3-small").is_none());
    }

    #[test]
    fn test_model_size_wins_over_configured_dimensions() {
        let config = EmbeddingsConfig {
            model: "nomic-ai/nomic-embed-vision-v1.5".to_string(),
            dimensions: 512,
            ..EmbeddingsConfig::default()
        };
        let spec = resolve_models(&config.model).unwrap();
        assert_eq!(model_dimensions(&config, &spec), 768);
    }

    #[test]
    fn test_disabled_provider_reports_model_size() {
        let config = EmbeddingsConfig {
            enabled: false,
            model: "nomic-embed-vision-v1.5".to_string(),
            ..EmbeddingsConfig::default()
        };
        assert_eq!(EmbeddingProvider::new(&config).dimensions(), 768);
    }

    #[tokio::test]
    async fn test_disabled_provider_is_unavailable() {
        let config = EmbeddingsConfig {
            enabled: false,
            ..EmbeddingsConfig::default()
        };
        let provider = EmbeddingProvider::new(&config);
        assert!(!provider.is_available());
        assert_eq!(provider.dimensions(), 512);

        let err = provider.embed_image(&image()).await.unwrap_err();
        assert!(matches!(err, KadrError::EmbeddingUnavailable(_)));
        let err = provider.embed_text("cat").await.unwrap_err();
        assert!(matches!(err, KadrError::EmbeddingUnavailable(_)));
    }

    #[test]
    fn test_unsupported_model_is_unavailable() {
        let config = EmbeddingsConfig {
            model: "mystery/model".to_string(),
            ..EmbeddingsConfig::default()
        };
        assert!(!EmbeddingProvider::new(&config).is_available());
    }

    #[test]
    fn test_check_rejects_wrong_dimensions() {
        let provider = EmbeddingProvider::unavailable("test", 3);
        assert_eq!(provider.check(vec![vec![0.1, 0.2, 0.3]]).unwrap().len(), 3);
        assert!(provider.check(vec![vec![0.1, 0.2]]).is_err());
        assert!(provider.check(vec![vec![0.1, f32::NAN, 0.3]]).is_err());
        assert!(provider.check(Vec::new()).is_err());
    }
}
