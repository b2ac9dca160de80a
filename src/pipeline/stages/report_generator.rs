//! Stage 6: compose the report artifact.
//!
//! Deterministic template rendering is the default and the fallback;
//! narrative mode asks the text model for prose and is never allowed to
//! fail the pipeline.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::model::{RetryPolicy, TextModel};
use crate::pipeline::types::{Cycle, CycleStatistics, JoystickRecord, ReportArtifact, TelemetryRecord};
use crate::report::{self, ReportInput};

const STAGE: &str = "report_generation";

pub struct NarrativeMode {
    pub model: Arc<dyn TextModel>,
    pub system_prompt: String,
    pub retry: RetryPolicy,
}

pub struct ReportGenerator {
    template: String,
    narrative: Option<NarrativeMode>,
}

/// Inputs for one report; the generation date is passed in so rendering
/// stays reproducible.
pub struct ReportRequest<'a> {
    pub source_id: &'a str,
    pub generated_on: &'a str,
    pub cycles: &'a [Cycle],
    pub statistics: &'a CycleStatistics,
    pub telemetry: &'a TelemetryRecord,
    pub joystick: &'a JoystickRecord,
}

impl ReportGenerator {
    pub fn new(template: String, narrative: Option<NarrativeMode>) -> Self {
        Self {
            template,
            narrative,
        }
    }

    pub async fn generate(
        &self,
        request: &ReportRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ReportArtifact, PipelineError> {
        if let Some(narrative) = &self.narrative {
            match self.narrative_report(narrative, request, cancel).await {
                Ok(artifact) => return Ok(artifact),
                Err(e) => {
                    warn!("narrative mode failed, falling back to deterministic: {e}");
                    return self.deterministic(
                        request,
                        Some("Narrative analysis was unavailable; deterministic report shown."),
                    );
                }
            }
        }
        self.deterministic(request, None)
    }

    fn deterministic(
        &self,
        request: &ReportRequest<'_>,
        extra_note: Option<&str>,
    ) -> Result<ReportArtifact, PipelineError> {
        let input = ReportInput {
            source_id: request.source_id,
            generated_on: request.generated_on,
            cycles: request.cycles,
            statistics: request.statistics,
            telemetry: request.telemetry,
            joystick: request.joystick,
            extra_note,
        };
        let rendered = report::render(&self.template, &input).map_err(|cause| {
            PipelineError::RenderFailed {
                stage: STAGE,
                source_id: request.source_id.to_string(),
                cause: PipelineError::truncate_cause(cause),
            }
        })?;
        Ok(ReportArtifact::markdown(rendered.into_bytes()))
    }

    async fn narrative_report(
        &self,
        narrative: &NarrativeMode,
        request: &ReportRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ReportArtifact, PipelineError> {
        let payload = structured_payload(request);
        info!("requesting narrative analysis for {}", request.source_id);

        let text = narrative
            .retry
            .run(cancel, || {
                narrative
                    .model
                    .generate(&narrative.system_prompt, payload.to_string())
            })
            .await
            .map_err(|e| PipelineError::RenderFailed {
                stage: STAGE,
                source_id: request.source_id.to_string(),
                cause: PipelineError::truncate_cause(e),
            })?;

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::RenderFailed {
                stage: STAGE,
                source_id: request.source_id.to_string(),
                cause: "empty narrative response".into(),
            });
        }

        // The model may answer with an HTML fragment instead of markdown.
        if trimmed.starts_with('<') {
            Ok(ReportArtifact::html(trimmed.as_bytes().to_vec()))
        } else {
            Ok(ReportArtifact::markdown(trimmed.as_bytes().to_vec()))
        }
    }
}

/// Structured cycle data handed to the text model.
fn structured_payload(request: &ReportRequest<'_>) -> serde_json::Value {
    json!({
        "source": request.source_id,
        "cycles": request.cycles.iter().map(|c| json!({
            "number": c.number,
            "start_secs": c.start,
            "end_secs": c.end,
            "duration_secs": c.duration,
            "phases": {
                "dig": c.phases.dig,
                "swing_to_dump": c.phases.swing_to_dump,
                "dump": c.phases.dump,
                "return": c.phases.return_to_dig,
            },
            "completeness": c.completeness.as_str(),
            "note": c.note,
        })).collect::<Vec<_>>(),
        "statistics": {
            "count": request.statistics.count,
            "specific_average_secs": request.statistics.specific_average,
            "approximate_average_secs": request.statistics.approximate_average,
            "idle_per_cycle_secs": request.statistics.idle_per_cycle,
            "min_secs": request.statistics.min_duration,
            "max_secs": request.statistics.max_duration,
            "std_deviation_secs": request.statistics.std_deviation,
        },
        "telemetry": {
            "found": request.telemetry.found,
            "fuel_burned_litres": request.telemetry.fuel_burned_litres,
            "time_swinging_left_secs": request.telemetry.time_swinging_left_secs,
            "time_swinging_right_secs": request.telemetry.time_swinging_right_secs,
            "productivity_m3_per_hr": request.telemetry.productivity_m3_per_hr,
        },
        "joystick": {
            "found": request.joystick.found,
            "bcs_score": request.joystick.bcs_score,
            "control_usage": {
                "single": request.joystick.control_usage.single_control,
                "dual": request.joystick.control_usage.dual_control,
                "triple": request.joystick.control_usage.triple_control,
                "full": request.joystick.control_usage.full_control,
            },
        },
    })
}
