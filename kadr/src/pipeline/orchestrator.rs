use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::plan::build_queue;
use crate::config::RecognitionSettings;
use crate::error::{KadrError, Result};
use crate::models::{
    AttemptConfiguration, AttemptStatus, CanonicalImage, RecognitionAttempt, RecognitionOutcome,
    RecognitionResult, ScriptHypothesis,
};
use crate::ocr::{ImageNormalizer, RecognitionAdapter, ScriptDetector};

/// Where one document's recognition run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Detecting,
    Attempting(usize),
    Evaluating(usize),
    Succeeded(usize),
    Exhausted,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Succeeded(_) | State::Exhausted)
    }
}

/// Per-document working data the state machine carries between states.
struct Run {
    image: CanonicalImage,
    hypothesis: ScriptHypothesis,
    queue: Vec<AttemptConfiguration>,
    attempts: Vec<RecognitionAttempt>,
    deadline: tokio::time::Instant,
    deadline_exceeded: bool,
}

/// Drives detection and the attempt queue for one image at a time.
///
/// Attempts run strictly one after another in queue order; the first one meeting the
/// acceptance threshold wins. Errors from single attempts are recorded, never returned,
/// unless every configuration in the queue errored.
pub struct Orchestrator {
    detector: ScriptDetector,
    adapter: RecognitionAdapter,
    normalizer: ImageNormalizer,
    settings: RecognitionSettings,
}

impl Orchestrator {
    pub fn new(
        detector: ScriptDetector,
        adapter: RecognitionAdapter,
        normalizer: ImageNormalizer,
        settings: RecognitionSettings,
    ) -> Self {
        Self {
            detector,
            adapter,
            normalizer,
            settings,
        }
    }

    pub fn settings(&self) -> &RecognitionSettings {
        &self.settings
    }

    pub fn detector(&self) -> &ScriptDetector {
        &self.detector
    }

    /// Run with a deadline starting now.
    pub async fn run(
        &self,
        document_id: &str,
        image: CanonicalImage,
        cancel: &CancellationToken,
    ) -> Result<RecognitionResult> {
        let deadline = tokio::time::Instant::now() + self.settings.deadline;
        self.run_until(document_id, image, deadline, cancel).await
    }

    /// Run against a deadline taken by the caller, typically when the document arrived.
    pub async fn run_until(
        &self,
        document_id: &str,
        image: CanonicalImage,
        deadline: tokio::time::Instant,
        cancel: &CancellationToken,
    ) -> Result<RecognitionResult> {
        let mut run = Run {
            image,
            hypothesis: ScriptHypothesis::fallback(),
            queue: Vec::new(),
            attempts: Vec::new(),
            deadline,
            deadline_exceeded: false,
        };

        let mut state = State::Init;
        while !state.is_terminal() {
            if cancel.is_cancelled() {
                debug!(document_id = %document_id, state = ?state, "Recognition cancelled");
                return Err(KadrError::Cancelled);
            }
            let next = self.step(state, &mut run, cancel).await?;
            debug!(document_id = %document_id, from = ?state, to = ?next, "Transition");
            state = next;
        }

        let outcome = match state {
            State::Succeeded(index) => RecognitionOutcome::Accepted { attempt: index },
            _ => exhausted_outcome(&run)?,
        };

        let result = RecognitionResult {
            document_id: document_id.to_string(),
            outcome,
            attempts: run.attempts,
            hypothesis: run.hypothesis,
            metadata: run.image.metadata,
            deadline_exceeded: run.deadline_exceeded,
            completed_at: Utc::now(),
        };

        info!(
            document_id = %document_id,
            outcome = ?result.outcome,
            attempts = result.attempts.len(),
            confidence = result.confidence(),
            deadline_exceeded = result.deadline_exceeded,
            "Recognition finished"
        );
        Ok(result)
    }

    async fn step(
        &self,
        state: State,
        run: &mut Run,
        cancel: &CancellationToken,
    ) -> Result<State> {
        match state {
            State::Init => Ok(State::Detecting),

            State::Detecting => {
                let catalog = self.detector.catalog();
                let detected = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(KadrError::Cancelled),
                    _ = tokio::time::sleep_until(run.deadline) => None,
                    hypothesis = self.detector.detect_with(&run.image, &catalog) => Some(hypothesis),
                };

                let Some(hypothesis) = detected else {
                    warn!("Pipeline deadline passed during script detection");
                    run.deadline_exceeded = true;
                    return Ok(State::Exhausted);
                };

                let source = run.image.clone();
                let normalizer = self.normalizer.clone();
                let for_rotation = hypothesis.clone();
                let threshold = self.settings.orientation_confidence;
                run.image = tokio::task::spawn_blocking(move || {
                    normalizer.correct_orientation(source, &for_rotation, threshold)
                })
                .await
                .map_err(|e| KadrError::Internal(format!("Rotation task panicked: {e}")))?;

                run.queue = build_queue(&hypothesis, &catalog, threshold);
                run.hypothesis = hypothesis;
                debug!(
                    queue = ?run
                        .queue
                        .iter()
                        .map(|c| format!("{}@{}", c.language_string(), c.rotation.degrees()))
                        .collect::<Vec<_>>(),
                    "Attempt queue built"
                );

                Ok(if run.queue.is_empty() {
                    State::Exhausted
                } else {
                    State::Attempting(0)
                })
            }

            State::Attempting(index) => {
                let configuration = run.queue[index].clone();
                let started_at = Utc::now();
                let started = Instant::now();

                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(KadrError::Cancelled),
                    _ = tokio::time::sleep_until(run.deadline) => None,
                    result = self.adapter.recognize(&run.image, &configuration) => Some(result),
                };

                let mut attempt = RecognitionAttempt {
                    index,
                    configuration,
                    text: String::new(),
                    segments: Vec::new(),
                    confidence: 0.0,
                    status: AttemptStatus::Completed,
                    started_at,
                    elapsed_ms: 0,
                };

                match outcome {
                    Some(Ok(recognized)) => {
                        attempt.text = recognized.text;
                        attempt.segments = recognized.segments;
                        attempt.confidence = recognized.confidence;
                    }
                    Some(Err(KadrError::EngineUnavailable(reason))) => {
                        debug!(attempt = index, reason = %reason, "Configuration skipped");
                        attempt.status = AttemptStatus::EngineUnavailable(reason);
                    }
                    Some(Err(e @ KadrError::RecognitionTimeout { .. })) => {
                        warn!(attempt = index, error = %e, "Attempt timed out");
                        attempt.status = AttemptStatus::TimedOut(e.to_string());
                    }
                    Some(Err(e)) => {
                        warn!(attempt = index, error = %e, "Attempt failed");
                        attempt.status = AttemptStatus::Failed(e.to_string());
                    }
                    None => {
                        warn!(attempt = index, "Pipeline deadline passed, abandoning queue");
                        run.deadline_exceeded = true;
                        attempt.status =
                            AttemptStatus::TimedOut("pipeline deadline exceeded".to_string());
                    }
                }
                attempt.elapsed_ms = started.elapsed().as_millis() as u64;

                debug!(
                    attempt = index,
                    languages = %attempt.configuration.language_string(),
                    confidence = attempt.confidence,
                    status = ?attempt.status,
                    "Attempt recorded"
                );
                run.attempts.push(attempt);

                Ok(if run.deadline_exceeded {
                    State::Exhausted
                } else {
                    State::Evaluating(index)
                })
            }

            State::Evaluating(index) => {
                if run.attempts[index].meets(self.settings.accept_confidence) {
                    Ok(State::Succeeded(index))
                } else if index + 1 < run.queue.len() {
                    Ok(State::Attempting(index + 1))
                } else {
                    Ok(State::Exhausted)
                }
            }

            State::Succeeded(_) | State::Exhausted => Ok(state),
        }
    }
}

/// Verdict once the queue ran dry (or the deadline cut it short).
///
/// The most confident attempt with text wins, earliest on ties. Without any text the run
/// found nothing, unless every configuration of a complete queue errored.
fn exhausted_outcome(run: &Run) -> Result<RecognitionOutcome> {
    let best = run
        .attempts
        .iter()
        .filter(|a| a.has_text())
        .fold(None::<&RecognitionAttempt>, |best, a| match best {
            Some(b) if b.confidence >= a.confidence => Some(b),
            _ => Some(a),
        });

    if let Some(best) = best {
        return Ok(RecognitionOutcome::BestEffort {
            attempt: best.index,
        });
    }

    let all_errored = !run.attempts.is_empty() && run.attempts.iter().all(|a| !a.is_success());
    if all_errored && !run.deadline_exceeded {
        return Err(KadrError::AllConfigurationsFailed {
            attempts: run.attempts.len(),
        });
    }

    Ok(RecognitionOutcome::NoTextFound)
}
