use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::{ImageMetadata, Rotation};
use super::script::{Script, ScriptHypothesis};
use crate::catalog::derive_queries;

/// Why a configuration sits where it does in the attempt queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    Primary,
    PrimaryRotated,
    Secondary,
    Combined,
}

/// One language/script/orientation combination to run the engine with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptConfiguration {
    pub kind: PlanKind,
    pub languages: Vec<String>,
    /// `None` for the combined all-languages configuration.
    pub script: Option<Script>,
    pub rotation: Rotation,
}

impl AttemptConfiguration {
    /// Tesseract-style language string, e.g. `eng+rus`.
    pub fn language_string(&self) -> String {
        self.languages.join("+")
    }

    /// Two configurations that would ask the engine the exact same question.
    pub fn same_request(&self, other: &AttemptConfiguration) -> bool {
        self.languages == other.languages && self.rotation == other.rotation
    }
}

/// A recognised line (or word) and the engine's confidence in it, 0..1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum AttemptStatus {
    /// The engine produced output. The text may still be empty or low confidence.
    Completed,
    /// A requested language or script model is not installed.
    EngineUnavailable(String),
    TimedOut(String),
    Failed(String),
}

/// Outcome of running the engine once. Never mutated after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionAttempt {
    pub index: usize,
    pub configuration: AttemptConfiguration,
    /// Whitespace-normalized text.
    pub text: String,
    pub segments: Vec<Segment>,
    /// Overall confidence, 0..1.
    pub confidence: f32,
    #[serde(flatten)]
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl RecognitionAttempt {
    pub fn is_success(&self) -> bool {
        self.status == AttemptStatus::Completed
    }

    pub fn has_text(&self) -> bool {
        self.is_success() && !self.text.is_empty()
    }

    pub fn meets(&self, threshold: f32) -> bool {
        self.has_text() && self.confidence >= threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecognitionOutcome {
    /// The first attempt that met the acceptance threshold.
    Accepted { attempt: usize },
    /// Nothing met the threshold; the most confident attempt with text.
    BestEffort { attempt: usize },
    /// Every attempt that ran produced empty text.
    NoTextFound,
}

/// Final verdict for one image, with the complete attempt history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    pub document_id: String,
    pub outcome: RecognitionOutcome,
    pub attempts: Vec<RecognitionAttempt>,
    pub hypothesis: ScriptHypothesis,
    pub metadata: ImageMetadata,
    /// Set when the outer deadline stopped the queue early.
    pub deadline_exceeded: bool,
    pub completed_at: DateTime<Utc>,
}

impl RecognitionResult {
    pub fn selected(&self) -> Option<&RecognitionAttempt> {
        match self.outcome {
            RecognitionOutcome::Accepted { attempt } | RecognitionOutcome::BestEffort { attempt } => {
                self.attempts.get(attempt)
            }
            RecognitionOutcome::NoTextFound => None,
        }
    }

    pub fn text(&self) -> &str {
        self.selected().map(|a| a.text.as_str()).unwrap_or("")
    }

    pub fn confidence(&self) -> f32 {
        self.selected().map(|a| a.confidence).unwrap_or(0.0)
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.outcome, RecognitionOutcome::Accepted { .. })
    }

    /// Catalog lookup queries: the first line of the selected text, then the short lines
    /// below it as fallback labels (credits, tag lines, subtitles).
    pub fn title_queries(&self) -> Vec<String> {
        let text = self.text();
        let labels: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .skip(1)
            .map(str::to_string)
            .collect();
        derive_queries(text, &labels)
    }
}

/// Collapse runs of whitespace inside lines and drop blank lines.
pub fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
