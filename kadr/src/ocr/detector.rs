use std::time::Duration;

use tracing::{debug, warn};

use super::gate::EngineGate;
use crate::models::{CanonicalImage, LanguageCatalog, Script, ScriptHypothesis, ScriptScore};

/// Ranks candidate scripts for an image and guesses its rotation.
///
/// Detection never fails: engine errors and timeouts yield
/// [`ScriptHypothesis::fallback`]. Scripts without an installed language pack are folded
/// into the nearest installed one, and every installed script is ranked, if only at zero.
/// The orientation pass shares the engine permits with recognition attempts.
pub struct ScriptDetector {
    gate: EngineGate,
    allowed: Vec<Script>,
    timeout: Duration,
}

impl ScriptDetector {
    pub fn new(gate: EngineGate, allowed: Vec<Script>, timeout: Duration) -> Self {
        Self {
            gate,
            allowed,
            timeout,
        }
    }

    pub fn engine_name(&self) -> &str {
        self.gate.engine().name()
    }

    /// Installed packs as currently reported by the engine, filtered by the allowlist.
    pub fn catalog(&self) -> LanguageCatalog {
        LanguageCatalog::new(self.gate.engine().installed_languages(), &self.allowed)
    }

    pub async fn detect(&self, image: &CanonicalImage) -> ScriptHypothesis {
        self.detect_with(image, &self.catalog()).await
    }

    pub async fn detect_with(
        &self,
        image: &CanonicalImage,
        catalog: &LanguageCatalog,
    ) -> ScriptHypothesis {
        let report = match self
            .gate
            .detect_orientation(image.clone(), self.timeout)
            .await
        {
            Ok(Some(report)) => report,
            Ok(None) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Script detection timed out, using fallback hypothesis"
                );
                return ScriptHypothesis::fallback();
            }
            Err(e) => {
                warn!(error = %e, "Script detection failed, using fallback hypothesis");
                return ScriptHypothesis::fallback();
            }
        };

        let mut scores: Vec<ScriptScore> = report
            .scripts
            .iter()
            .filter_map(|score| {
                let nearest = catalog.nearest_installed(score.script)?;
                if nearest != score.script {
                    debug!(
                        detected = %score.script,
                        installed = %nearest,
                        "Detected script not installed, downgrading"
                    );
                }
                Some(ScriptScore {
                    script: nearest,
                    confidence: score.confidence,
                })
            })
            .collect();

        for script in catalog.installed_scripts() {
            if !scores.iter().any(|s| s.script == script) {
                scores.push(ScriptScore {
                    script,
                    confidence: 0.0,
                });
            }
        }

        let hypothesis = ScriptHypothesis::new(scores, report.rotation, report.rotation_confidence);
        debug!(
            primary = %hypothesis.primary().script,
            candidates = hypothesis.candidates().len(),
            rotation = hypothesis.rotation.degrees(),
            rotation_confidence = hypothesis.rotation_confidence,
            "Script hypothesis ready"
        );
        hypothesis
    }
}
