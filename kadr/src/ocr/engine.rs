use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CanonicalImage, Rotation, ScriptScore};

/// Raw engine output for one recognition call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOutput {
    pub text: String,
    /// Per-line confidences on a 0..100 scale.
    pub lines: Vec<EngineLine>,
    /// Whole-page confidence on a 0..100 scale.
    pub mean_confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineLine {
    pub text: String,
    pub confidence: f32,
}

/// Result of a cheap orientation-and-script pass.
#[derive(Debug, Clone, PartialEq)]
pub struct OrientationReport {
    /// Unordered script scores; may include scripts that are not installed.
    pub scripts: Vec<ScriptScore>,
    pub rotation: Rotation,
    /// 0..1
    pub rotation_confidence: f32,
}

/// External OCR capability.
///
/// Implementations must report a missing language or script model as
/// [`KadrError::EngineUnavailable`](crate::error::KadrError::EngineUnavailable), so the
/// orchestrator can skip the configuration. Empty or low-confidence text is a valid output,
/// not an error.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Language packs currently installed, e.g. `["eng", "osd", "rus"]`.
    fn installed_languages(&self) -> Vec<String>;

    /// Guess page orientation and script mix.
    async fn detect_orientation(&self, image: &CanonicalImage) -> Result<OrientationReport>;

    /// Recognise `image` with a `+`-joined language string such as `eng+rus`.
    async fn recognize(&self, image: &CanonicalImage, languages: &str) -> Result<EngineOutput>;
}
