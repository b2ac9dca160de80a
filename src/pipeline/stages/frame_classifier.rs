//! Stage 2: label every frame through the external vision model.
//!
//! Output order always matches input order. The default mode is strictly
//! sequential so each call can reference the label just emitted; two-pass
//! mode classifies in parallel without that context first, then refines
//! low-confidence transitions sequentially.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ClassifierSettings, RetrySettings};
use crate::error::PipelineError;
use crate::model::{CircuitBreaker, ModelError, RetryPolicy, VisionModel, VisionRequest, VisionVerdict};
use crate::pipeline::progress::StageProgress;
use crate::pipeline::types::{ActivityLabel, Classification, Frame};
use crate::report::format_mmss;

const STAGE: &str = "frame_classification";
const PROGRESS_EVERY: usize = 10;

pub struct FrameClassifier {
    model: Arc<dyn VisionModel>,
    system_prompt: String,
    retry: RetryPolicy,
    breaker_threshold: u32,
    concurrency: usize,
    two_pass: bool,
    refine_below: f64,
}

impl FrameClassifier {
    pub fn new(
        model: Arc<dyn VisionModel>,
        system_prompt: String,
        classifier: &ClassifierSettings,
        retry: &RetrySettings,
    ) -> Self {
        Self {
            model,
            system_prompt,
            retry: RetryPolicy::from_settings(retry),
            breaker_threshold: retry.breaker_threshold,
            concurrency: classifier.concurrency.max(1),
            two_pass: classifier.two_pass,
            refine_below: classifier.refine_below_confidence,
        }
    }

    /// Classify every frame, emitting exactly one classification per frame
    /// in frame order.
    pub async fn classify(
        &self,
        frames: &[Frame],
        source_id: &str,
        cancel: &CancellationToken,
        progress: &StageProgress,
    ) -> Result<Vec<Classification>, PipelineError> {
        if frames.is_empty() {
            progress.emit(1.0, "no frames to classify");
            return Ok(Vec::new());
        }

        info!(
            "classifying {} frames ({} mode, concurrency {})",
            frames.len(),
            if self.two_pass { "two-pass" } else { "sequential" },
            self.concurrency,
        );

        let classifications = if self.two_pass && self.concurrency > 1 {
            self.classify_two_pass(frames, source_id, cancel, progress)
                .await?
        } else {
            self.classify_sequential(frames, source_id, cancel, progress)
                .await?
        };

        progress.emit(1.0, format!("classified {} frames", frames.len()));
        Ok(classifications)
    }

    async fn classify_sequential(
        &self,
        frames: &[Frame],
        source_id: &str,
        cancel: &CancellationToken,
        progress: &StageProgress,
    ) -> Result<Vec<Classification>, PipelineError> {
        let mut out: Vec<Classification> = Vec::with_capacity(frames.len());
        let mut breaker = CircuitBreaker::new(self.breaker_threshold);
        let mut prev: Option<ActivityLabel> = None;

        for (i, frame) in frames.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let outcome = self.call_model(frame, i, prev, cancel).await?;
            let classification = self.settle(frame, outcome, &mut breaker, source_id)?;
            prev = Some(classification.label);
            out.push(classification);

            if (i + 1) % PROGRESS_EVERY == 0 {
                progress.emit(
                    (i + 1) as f64 / frames.len() as f64,
                    format!("classified {}/{} frames", i + 1, frames.len()),
                );
            }
        }

        Ok(out)
    }

    /// Parallel first pass with ordered emission, then sequential
    /// refinement of uncertain transitions using previous-label context.
    async fn classify_two_pass(
        &self,
        frames: &[Frame],
        source_id: &str,
        cancel: &CancellationToken,
        progress: &StageProgress,
    ) -> Result<Vec<Classification>, PipelineError> {
        let mut out: Vec<Classification> = Vec::with_capacity(frames.len());
        let mut breaker = CircuitBreaker::new(self.breaker_threshold);

        // In-flight calls are bounded at `concurrency`; results surface in
        // frame order regardless of completion order.
        let mut results = stream::iter(frames.iter().enumerate())
            .map(|(i, frame)| self.call_model(frame, i, None, cancel))
            .buffered(self.concurrency);

        while let Some(outcome) = results.next().await {
            let i = out.len();
            let classification = self.settle(&frames[i], outcome?, &mut breaker, source_id)?;
            out.push(classification);
            if (i + 1) % PROGRESS_EVERY == 0 {
                progress.emit(
                    0.8 * (i + 1) as f64 / frames.len() as f64,
                    format!("classified {}/{} frames", i + 1, frames.len()),
                );
            }
        }
        drop(results);

        // Refinement: only transitions the first pass was unsure about.
        let mut refined = 0usize;
        for i in 1..out.len() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if out[i].label == out[i - 1].label || out[i].confidence >= self.refine_below {
                continue;
            }
            let prev = Some(out[i - 1].label);
            match self.call_model(&frames[i], i, prev, cancel).await? {
                Ok(verdict) => {
                    if let Ok(classification) = validate(&frames[i], verdict) {
                        out[i] = classification;
                        refined += 1;
                    }
                }
                Err(e) => debug!("refinement call for frame {i} failed: {e}"),
            }
        }
        if refined > 0 {
            info!("refined {refined} uncertain transitions");
        }

        Ok(out)
    }

    /// One model call with retry. The outer error is pipeline-level
    /// (cancellation); the inner result is the per-frame outcome.
    async fn call_model(
        &self,
        frame: &Frame,
        index: usize,
        prev: Option<ActivityLabel>,
        cancel: &CancellationToken,
    ) -> Result<Result<VisionVerdict, ModelError>, PipelineError> {
        let user_message = user_message(index, frame.timestamp, prev);
        let op = || {
            self.model.classify_frame(VisionRequest {
                image: &frame.image,
                mime_type: frame.encoding.mime_type(),
                system_prompt: &self.system_prompt,
                user_message: user_message.clone(),
            })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            outcome = self.retry.run(cancel, op) => Ok(outcome),
        }
    }

    /// Turn a call outcome into the frame's classification, driving the
    /// circuit breaker. Trips to `ClassifierUnavailable` on the configured
    /// number of consecutive failures.
    fn settle(
        &self,
        frame: &Frame,
        outcome: Result<VisionVerdict, ModelError>,
        breaker: &mut CircuitBreaker,
        source_id: &str,
    ) -> Result<Classification, PipelineError> {
        let (classification, failure) = match outcome {
            Ok(verdict) => match validate(frame, verdict) {
                Ok(c) => (c, None),
                Err((c, cause)) => (c, Some(cause)),
            },
            Err(e) => (
                Classification::failed(
                    frame.index,
                    frame.timestamp,
                    format!("classification failed: {e}"),
                ),
                Some(e.to_string()),
            ),
        };

        match failure {
            None => breaker.record_success(),
            Some(cause) => {
                let consecutive = breaker.record_failure();
                warn!(
                    "frame {} classification failed ({consecutive} consecutive): {cause}",
                    frame.index
                );
                if breaker.is_open() {
                    return Err(PipelineError::ClassifierUnavailable {
                        stage: STAGE,
                        source_id: source_id.to_string(),
                        consecutive_failures: consecutive,
                        cause: PipelineError::truncate_cause(cause),
                    });
                }
            }
        }

        Ok(classification)
    }
}

/// Validate a raw verdict against the fixed label set. A deviation yields
/// the fallback classification plus the cause, so the caller can count it
/// as a failed call.
fn validate(
    frame: &Frame,
    verdict: VisionVerdict,
) -> Result<Classification, (Classification, String)> {
    let Some(confidence) = verdict.confidence else {
        let cause = "response missing confidence".to_string();
        return Err((
            Classification::failed(frame.index, frame.timestamp, cause.clone()),
            cause,
        ));
    };

    match ActivityLabel::parse(&verdict.label) {
        Some(label) => {
            let mut classification =
                Classification::new(frame.index, frame.timestamp, label, confidence.clamp(0.0, 1.0));
            classification.note = verdict.note;
            Ok(classification)
        }
        None => {
            let cause = format!("unknown label '{}' coerced to idle", verdict.label);
            Err((
                Classification::failed(frame.index, frame.timestamp, cause.clone()),
                cause,
            ))
        }
    }
}

/// Short user message carrying temporal context for the model.
fn user_message(index: usize, timestamp: f64, prev: Option<ActivityLabel>) -> String {
    let prev = prev.map_or("(none)", |l| l.as_str());
    format!(
        "Frame {} at timestamp {}.\nPrevious activity: {prev}\n\nClassify this frame into one of the excavation activities.",
        index + 1,
        format_mmss(timestamp),
    )
}
