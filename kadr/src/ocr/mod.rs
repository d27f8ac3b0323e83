//! OCR stages of the recognition pipeline.
//!
//! # Architecture
//!
//! - `OcrEngine` trait is the external engine capability (install list, orientation pass,
//!   recognition with a `+`-joined language string)
//! - `TesseractEngine` implements it locally via leptess, discovering language packs
//!   from the tessdata directory
//! - `ImageNormalizer` turns upload bytes into a grayscale canonical bitmap
//! - `EngineGate` caps concurrent engine work; detection and recognition share its permits
//! - `ScriptDetector` ranks installed scripts and guesses rotation; it never fails
//! - `RecognitionAdapter` runs one attempt configuration with a timeout
//!
//! # Configuration
//!
//! Controlled via `OcrConfig` (see `config.rs`):
//! - `model`: engine selection, `local/tesseract`
//! - `tessdata_dir`: language pack directory, else `TESSDATA_PREFIX` or system paths
//! - `scripts`: installed-script allowlist
//! - `attempt_timeout_ms`, `engine_concurrency`: per-call deadline and parallelism
//! - `max/target/min_image_dimension`, `max_image_bytes`, `deskew`: normalizer limits
//!
//! # Usage
//!
//! ```rust,ignore
//! let engine = ocr::build_engine(&config.ocr);
//! let normalizer = ImageNormalizer::new(&config.ocr);
//! let image = normalizer.normalize(&bytes)?;
//! ```

mod adapter;
mod detector;
mod engine;
mod gate;
mod preprocessing;
mod tessdata;
mod tesseract;

use std::sync::Arc;

use crate::config::OcrConfig;

pub use adapter::{RecognitionAdapter, RecognizedText};
pub use detector::ScriptDetector;
pub use engine::{EngineLine, EngineOutput, OcrEngine, OrientationReport};
pub use gate::EngineGate;
pub use preprocessing::{estimate_skew, ImageNormalizer};
pub use tessdata::{installed_languages, resolve_tessdata_dir};
pub use tesseract::{parse_hocr_lines, TesseractEngine};

/// Engine named by `config.model`. Unsupported models give an engine that reports itself
/// unavailable, so startup never fails on OCR setup.
pub fn build_engine(config: &OcrConfig) -> Arc<dyn OcrEngine> {
    Arc::new(TesseractEngine::new(config))
}
