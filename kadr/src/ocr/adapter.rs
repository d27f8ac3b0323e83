use std::time::Duration;

use tracing::debug;

use super::engine::EngineOutput;
use super::gate::EngineGate;
use crate::error::{KadrError, Result};
use crate::models::{normalize_whitespace, AttemptConfiguration, CanonicalImage, Rotation, Segment};

/// Text read by one engine call, with confidences rescaled to 0..1.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedText {
    /// Whitespace-normalized.
    pub text: String,
    pub segments: Vec<Segment>,
    pub confidence: f32,
}

/// Runs one [`AttemptConfiguration`] against the OCR engine.
///
/// Engine calls go through the shared [`EngineGate`], and each call carries its own
/// timeout. Empty or low-confidence text comes back as `Ok`.
pub struct RecognitionAdapter {
    gate: EngineGate,
    timeout: Duration,
}

impl RecognitionAdapter {
    pub fn new(gate: EngineGate, timeout: Duration) -> Self {
        Self { gate, timeout }
    }

    pub async fn recognize(
        &self,
        image: &CanonicalImage,
        configuration: &AttemptConfiguration,
    ) -> Result<RecognizedText> {
        if configuration.languages.is_empty() {
            return Err(KadrError::EngineUnavailable(
                "No language requested".to_string(),
            ));
        }
        let installed = self.gate.engine().installed_languages();
        if let Some(missing) = configuration
            .languages
            .iter()
            .find(|lang| !installed.contains(lang))
        {
            return Err(KadrError::EngineUnavailable(format!(
                "Language pack '{missing}' is not installed"
            )));
        }

        let image = if configuration.rotation == Rotation::None {
            image.clone()
        } else {
            let source = image.clone();
            let rotation = configuration.rotation;
            tokio::task::spawn_blocking(move || source.rotated(rotation))
                .await
                .map_err(|e| KadrError::Internal(format!("Rotation task panicked: {e}")))?
        };

        let languages = configuration.language_string();
        let output = self
            .gate
            .recognize(image, languages.clone(), self.timeout)
            .await?
            .ok_or(KadrError::RecognitionTimeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })?;

        let recognized = rescale(output);
        debug!(
            engine = self.gate.engine().name(),
            languages = %languages,
            rotation = configuration.rotation.degrees(),
            confidence = recognized.confidence,
            chars = recognized.text.chars().count(),
            "Engine call finished"
        );
        Ok(recognized)
    }
}

/// Convert 0..100 engine confidences to 0..1 and pick the overall score.
///
/// With line confidences the overall score is their mean weighted by line length,
/// otherwise the engine's page mean.
fn rescale(output: EngineOutput) -> RecognizedText {
    let segments: Vec<Segment> = output
        .lines
        .into_iter()
        .filter_map(|line| {
            let text = normalize_whitespace(&line.text);
            (!text.is_empty()).then(|| Segment {
                text,
                confidence: to_unit(line.confidence),
            })
        })
        .collect();

    let weight: usize = segments.iter().map(|s| s.text.chars().count()).sum();
    let confidence = if weight > 0 {
        segments
            .iter()
            .map(|s| s.confidence * s.text.chars().count() as f32)
            .sum::<f32>()
            / weight as f32
    } else {
        to_unit(output.mean_confidence)
    };

    RecognizedText {
        text: normalize_whitespace(&output.text),
        segments,
        confidence: confidence.clamp(0.0, 1.0),
    }
}

fn to_unit(confidence: f32) -> f32 {
    if confidence.is_finite() {
        (confidence / 100.0).clamp(0.0, 1.0)
    } else {
        0.0
    }
}
