#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};

use kadr::config::{Config, EmbeddingsConfig, OcrConfig, PipelineConfig, ServerConfig};
use kadr::embeddings::ImageEmbedder;
use kadr::error::{KadrError, Result};
use kadr::index::{InMemoryIndex, VectorIndex};
use kadr::models::{CanonicalImage, Rotation, Script, ScriptScore};
use kadr::ocr::{EngineOutput, OcrEngine, OrientationReport};
use kadr::pipeline::RecognitionPipeline;

pub const DIMENSIONS: usize = 4;

/// Config with short timeouts and deskew off, so fixtures reach the engine pixel-exact.
pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_body_bytes: 1024 * 1024,
        },
        ocr: OcrConfig {
            attempt_timeout_ms: 2_000,
            deskew: false,
            ..OcrConfig::default()
        },
        pipeline: PipelineConfig {
            deadline_ms: 10_000,
            workers: 2,
        },
        embeddings: EmbeddingsConfig {
            dimensions: DIMENSIONS,
            max_results: 10,
            ..EmbeddingsConfig::default()
        },
        catalog: None,
    }
}

pub fn encode_png(bitmap: GrayImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(bitmap)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

/// Black 40x20 page with a single white marker pixel in the top-left corner, or in the
/// bottom-right corner when the page was photographed upside down.
pub fn marked_page(upside_down: bool) -> Vec<u8> {
    let mut bitmap = GrayImage::new(40, 20);
    if upside_down {
        bitmap.put_pixel(39, 19, Luma([255]));
    } else {
        bitmap.put_pixel(0, 0, Luma([255]));
    }
    encode_png(bitmap)
}

/// Black 40x40 image with a white 20x20 block in the given quadrant (0..4, row-major).
pub fn quadrant_image(quadrant: u32) -> Vec<u8> {
    let (qx, qy) = (quadrant % 2 * 20, quadrant / 2 * 20);
    let bitmap = GrayImage::from_fn(40, 40, |x, y| {
        let inside = x >= qx && x < qx + 20 && y >= qy && y < qy + 20;
        Luma([if inside { 255 } else { 0 }])
    });
    encode_png(bitmap)
}

pub fn orientation(scores: &[(Script, f32)], rotation_confidence: f32) -> OrientationReport {
    OrientationReport {
        scripts: scores
            .iter()
            .map(|(script, confidence)| ScriptScore {
                script: *script,
                confidence: *confidence,
            })
            .collect(),
        rotation: Rotation::None,
        rotation_confidence,
    }
}

#[derive(Clone, Debug)]
pub enum Reply {
    /// Text and page confidence on the engine's 0..100 scale.
    Text(&'static str, f32),
    Unavailable,
    Fail,
    Hang,
}

/// Deterministic engine. Replies are keyed by language string and whether the marker
/// pixel is in the top-left corner of the image it was handed.
pub struct ScriptedEngine {
    installed: Vec<String>,
    report: OrientationReport,
    replies: HashMap<(String, bool), Reply>,
    fallback: Reply,
    delay: Duration,
    calls: Mutex<Vec<(String, bool)>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(installed: &[&str], report: OrientationReport) -> Self {
        Self {
            installed: installed.iter().map(|s| s.to_string()).collect(),
            report,
            replies: HashMap::new(),
            fallback: Reply::Text("", 0.0),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn reply(mut self, languages: &str, upright: bool, reply: Reply) -> Self {
        self.replies.insert((languages.to_string(), upright), reply);
        self
    }

    /// Reply for every call without a specific entry.
    pub fn otherwise(mut self, reply: Reply) -> Self {
        self.fallback = reply;
        self
    }

    /// Time every orientation pass and recognition call spends on the engine.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }

    /// Most engine calls, of either kind, that were ever in flight together.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn busy(&self) {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl OcrEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn installed_languages(&self) -> Vec<String> {
        self.installed.clone()
    }

    async fn detect_orientation(&self, _image: &CanonicalImage) -> Result<OrientationReport> {
        self.busy().await;
        Ok(self.report.clone())
    }

    async fn recognize(&self, image: &CanonicalImage, languages: &str) -> Result<EngineOutput> {
        self.busy().await;
        let upright = image.bitmap().get_pixel(0, 0)[0] == 255;
        self.calls
            .lock()
            .unwrap()
            .push((languages.to_string(), upright));

        let reply = self
            .replies
            .get(&(languages.to_string(), upright))
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            Reply::Text(text, confidence) => Ok(EngineOutput {
                text: text.to_string(),
                lines: Vec::new(),
                mean_confidence: confidence,
            }),
            Reply::Unavailable => Err(KadrError::EngineUnavailable(format!(
                "'{languages}' is not installed"
            ))),
            Reply::Fail => Err(KadrError::Ocr("engine crashed".to_string())),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(EngineOutput::default())
            }
        }
    }
}

/// Embeds an image as the share of bright pixels per quadrant, plus a small bias so no
/// vector is all zeros. Text queries resolve through a fixed vocabulary.
pub struct QuadrantEmbedder {
    pub available: bool,
    vocabulary: HashMap<String, Vec<f32>>,
}

impl QuadrantEmbedder {
    pub fn new() -> Self {
        let vocabulary = [
            ("top left", 0usize),
            ("top right", 1),
            ("bottom left", 2),
            ("bottom right", 3),
        ]
        .into_iter()
        .map(|(word, quadrant)| {
            let mut vector = vec![0.01; DIMENSIONS];
            vector[quadrant] = 1.0;
            (word.to_string(), vector)
        })
        .collect();
        Self {
            available: true,
            vocabulary,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }
}

#[async_trait]
impl ImageEmbedder for QuadrantEmbedder {
    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn embed_image(&self, image: &CanonicalImage) -> Result<Vec<f32>> {
        if !self.available {
            return Err(KadrError::EmbeddingUnavailable("stub is off".to_string()));
        }
        let bitmap = image.bitmap();
        let (half_w, half_h) = (bitmap.width() / 2, bitmap.height() / 2);
        let mut bright = [0f32; DIMENSIONS];
        let mut totals = [0f32; DIMENSIONS];
        for (x, y, pixel) in bitmap.enumerate_pixels() {
            let quadrant = usize::from(x >= half_w) + 2 * usize::from(y >= half_h);
            totals[quadrant] += 1.0;
            if pixel[0] >= 128 {
                bright[quadrant] += 1.0;
            }
        }
        Ok(bright
            .iter()
            .zip(totals.iter())
            .map(|(b, t)| b / t.max(1.0) + 0.01)
            .collect())
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.vocabulary
            .get(text)
            .cloned()
            .ok_or_else(|| KadrError::Validation(format!("Unknown phrase '{text}'")))
    }
}

pub struct Harness {
    pub pipeline: RecognitionPipeline,
    pub engine: Arc<ScriptedEngine>,
    pub index: Arc<InMemoryIndex>,
}

pub fn harness(engine: ScriptedEngine) -> Harness {
    harness_with(test_config(), engine, QuadrantEmbedder::new())
}

pub fn harness_with(config: Config, engine: ScriptedEngine, embedder: QuadrantEmbedder) -> Harness {
    let engine = Arc::new(engine);
    let index = Arc::new(InMemoryIndex::new(DIMENSIONS));
    let pipeline = RecognitionPipeline::new(
        &config,
        engine.clone(),
        Arc::new(embedder),
        index.clone(),
    );
    Harness {
        pipeline,
        engine,
        index,
    }
}

/// Wait for a background upsert to land.
pub async fn wait_for_entry(index: &InMemoryIndex, id: &str) -> Option<Vec<f32>> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(vector) = index.get(id).await {
                return vector;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .ok()
}
