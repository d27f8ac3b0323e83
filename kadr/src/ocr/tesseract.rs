use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use image::imageops::FilterType;
use leptess::LepTess;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::engine::{EngineLine, EngineOutput, OcrEngine, OrientationReport};
use super::tessdata;
use crate::config::OcrConfig;
use crate::error::{KadrError, Result};
use crate::models::{CanonicalImage, ImageMetadata, Rotation, Script};

/// Longest side of the copy used for the orientation pass.
const DETECTION_DIMENSION: u32 = 1024;

type Handle = Arc<Mutex<LepTess>>;

enum TesseractBackend {
    Local {
        datapath: Option<String>,
        installed: Vec<String>,
        /// One initialised handle per language string; Tesseract fixes languages at init.
        handles: Arc<Mutex<HashMap<String, Handle>>>,
    },
    Unavailable {
        reason: String,
    },
}

/// Tesseract engine via leptess.
pub struct TesseractEngine {
    backend: TesseractBackend,
}

impl TesseractEngine {
    pub fn new(config: &OcrConfig) -> Self {
        let model_lower = config.model.to_lowercase();
        let provider_prefix = model_lower.split('/').next().unwrap_or("local");
        if provider_prefix != "local" {
            let reason = format!("Unsupported OCR model '{}'", config.model);
            warn!("{}", reason);
            return Self::unavailable(reason);
        }

        let Some(dir) = tessdata::resolve_tessdata_dir(config.tessdata_dir.as_deref()) else {
            let reason = "No tessdata directory with language packs found".to_string();
            warn!("{}", reason);
            return Self::unavailable(reason);
        };

        let installed = tessdata::installed_languages(&dir);
        info!(
            tessdata = %dir.display(),
            languages = %installed.join(","),
            "Tesseract OCR initialized"
        );

        Self {
            backend: TesseractBackend::Local {
                datapath: Some(path_to_string(dir)),
                installed,
                handles: Arc::new(Mutex::new(HashMap::new())),
            },
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            backend: TesseractBackend::Unavailable {
                reason: reason.into(),
            },
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.backend, TesseractBackend::Unavailable { .. })
    }

    async fn handle_for(&self, languages: &str) -> Result<Handle> {
        let (datapath, installed, handles) = match &self.backend {
            TesseractBackend::Local {
                datapath,
                installed,
                handles,
            } => (datapath, installed, handles),
            TesseractBackend::Unavailable { reason } => {
                return Err(KadrError::EngineUnavailable(reason.clone()))
            }
        };

        if let Some(missing) = languages
            .split('+')
            .find(|lang| !installed.iter().any(|i| i == lang))
        {
            return Err(KadrError::EngineUnavailable(format!(
                "Language pack '{missing}' is not installed"
            )));
        }

        let mut handles = handles.lock().await;
        if let Some(handle) = handles.get(languages) {
            return Ok(Arc::clone(handle));
        }

        let datapath = datapath.clone();
        let langs = languages.to_string();
        let lt = tokio::task::spawn_blocking(move || LepTess::new(datapath.as_deref(), &langs))
            .await
            .map_err(|e| KadrError::Ocr(format!("Tesseract init task panicked: {e}")))?
            .map_err(|e| {
                KadrError::EngineUnavailable(format!("Tesseract failed to load '{languages}': {e}"))
            })?;

        debug!(languages = %languages, "Initialised Tesseract handle");
        let handle = Arc::new(Mutex::new(lt));
        handles.insert(languages.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// First installed pack of each known script, e.g. `eng+rus`.
    fn detection_languages(&self) -> Option<String> {
        let TesseractBackend::Local { installed, .. } = &self.backend else {
            return None;
        };
        let languages: Vec<&str> = Script::KNOWN
            .iter()
            .filter_map(|script| {
                script
                    .languages()
                    .iter()
                    .copied()
                    .find(|lang| installed.iter().any(|i| i == lang))
            })
            .collect();
        (!languages.is_empty()).then(|| languages.join("+"))
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn installed_languages(&self) -> Vec<String> {
        match &self.backend {
            TesseractBackend::Local { installed, .. } => installed.clone(),
            TesseractBackend::Unavailable { .. } => Vec::new(),
        }
    }

    async fn detect_orientation(&self, image: &CanonicalImage) -> Result<OrientationReport> {
        let languages = self.detection_languages().ok_or_else(|| {
            KadrError::EngineUnavailable("No script language packs installed".to_string())
        })?;

        let preview = downscale(image, DETECTION_DIMENSION);
        let upright = self.recognize(&preview, &languages).await?;

        let mut readings = vec![(Rotation::None, upright.mean_confidence)];
        for rotation in [Rotation::Clockwise90, Rotation::UpsideDown, Rotation::Clockwise270] {
            let output = self.recognize(&preview.rotated(rotation), &languages).await?;
            readings.push((rotation, output.mean_confidence));
        }
        let (rotation, rotation_confidence) = pick_rotation(&readings);
        debug!(
            readings = ?readings,
            rotation = rotation.degrees(),
            rotation_confidence,
            "Orientation pass finished"
        );

        Ok(OrientationReport {
            scripts: Script::score_text(&upright.text),
            rotation,
            rotation_confidence,
        })
    }

    async fn recognize(&self, image: &CanonicalImage, languages: &str) -> Result<EngineOutput> {
        let handle = self.handle_for(languages).await?;
        let png = image.to_png()?;

        tokio::task::spawn_blocking(move || {
            let mut lt = handle.blocking_lock();
            lt.set_image_from_mem(&png)
                .map_err(|e| KadrError::Ocr(format!("Failed to set image: {e}")))?;
            let hocr = lt
                .get_hocr_text(0)
                .map_err(|e| KadrError::Ocr(format!("Failed to extract hOCR: {e}")))?;
            let text = lt
                .get_utf8_text()
                .map_err(|e| KadrError::Ocr(format!("Failed to extract text: {e}")))?;
            let mean_confidence = (lt.mean_text_conf() as f32).clamp(0.0, 100.0);

            Ok(EngineOutput {
                text: text.trim().to_string(),
                lines: parse_hocr_lines(&hocr),
                mean_confidence,
            })
        })
        .await
        .map_err(|e| KadrError::Ocr(format!("OCR task panicked: {e}")))?
    }
}

/// The rotation read most confidently, scored by its margin over the runner-up.
///
/// Readings are mean confidences on a 0..100 scale. Ties keep the earlier entry, so an
/// undecided page stays upright.
fn pick_rotation(readings: &[(Rotation, f32)]) -> (Rotation, f32) {
    let mut ranked = readings.to_vec();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    match ranked.as_slice() {
        [] => (Rotation::None, 0.0),
        [(rotation, best)] => (*rotation, (best / 100.0).clamp(0.0, 1.0)),
        [(rotation, best), (_, runner_up), ..] if *best > 0.0 => {
            (*rotation, ((best - runner_up) / best).clamp(0.0, 1.0))
        }
        [_, ..] => (Rotation::None, 0.0),
    }
}

fn path_to_string(path: PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

fn downscale(image: &CanonicalImage, max_dim: u32) -> CanonicalImage {
    let (width, height) = (image.width(), image.height());
    if width <= max_dim && height <= max_dim {
        return image.clone();
    }
    let ratio = max_dim as f32 / width.max(height) as f32;
    let new_width = ((width as f32 * ratio) as u32).max(1);
    let new_height = ((height as f32 * ratio) as u32).max(1);
    let bitmap = image::imageops::resize(image.bitmap(), new_width, new_height, FilterType::Triangle);
    CanonicalImage::new(
        bitmap,
        ImageMetadata {
            width: new_width,
            height: new_height,
            ..image.metadata.clone()
        },
    )
}

struct HocrPatterns {
    line: Regex,
    word: Regex,
    tag: Regex,
}

fn hocr_patterns() -> &'static HocrPatterns {
    static PATTERNS: OnceLock<HocrPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| HocrPatterns {
        line: Regex::new(r#"class=['"]ocr_(?:line|caption|header|textfloat)['"]"#)
            .expect("valid hOCR line pattern"),
        word: Regex::new(
            r#"(?s)class=['"]ocrx_word['"][^>]*?x_wconf (\d+)[^>]*>(.*?)</span>"#,
        )
        .expect("valid hOCR word pattern"),
        tag: Regex::new(r"<[^>]+>").expect("valid tag pattern"),
    })
}

/// Lines of an hOCR page with the mean word confidence (0..100) of each.
pub fn parse_hocr_lines(hocr: &str) -> Vec<EngineLine> {
    let patterns = hocr_patterns();
    let mut lines = Vec::new();

    // Everything before the first line marker is page/paragraph markup.
    for chunk in patterns.line.split(hocr).skip(1) {
        let mut words = Vec::new();
        let mut confidence_sum = 0.0f32;

        for caps in patterns.word.captures_iter(chunk) {
            let confidence: f32 = caps[1].parse().unwrap_or(0.0);
            let word = unescape(&patterns.tag.replace_all(&caps[2], ""));
            let word = word.trim();
            if word.is_empty() {
                continue;
            }
            words.push(word.to_string());
            confidence_sum += confidence;
        }

        if !words.is_empty() {
            lines.push(EngineLine {
                confidence: confidence_sum / words.len() as f32,
                text: words.join(" "),
            });
        }
    }

    lines
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
