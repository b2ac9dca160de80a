//! Sequences the six pipeline stages, carries shared context, enforces
//! timeouts and assembles the final result.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::PipelineError;
use crate::model::{ChatClient, RetryPolicy, TextModel, VisionModel};
use crate::pipeline::progress::{ProgressCallback, ProgressScaler};
use crate::pipeline::stages::{
    CycleAssembler, FrameClassifier, FrameExtractor, NarrativeMode, ReportGenerator,
    ReportRequest, TelemetryEnricher, derive_source_id, detect_events,
};
use crate::pipeline::types::PipelineResult;
use crate::prompts::PromptStore;

pub struct Coordinator {
    settings: Settings,
    prompts: PromptStore,
    vision: Arc<dyn VisionModel>,
    text: Option<Arc<dyn TextModel>>,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn builder(settings: Settings) -> CoordinatorBuilder {
        CoordinatorBuilder::new(settings)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the full pipeline over one source. Stages run strictly in order;
    /// a hard failure anywhere returns the error and no partial result.
    pub async fn run(&self, source: &str) -> Result<PipelineResult, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id);

        let total = self.settings.timeouts.total();
        let body = self.run_stages(source);
        async move {
            match tokio::time::timeout(total, body).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::StageTimeout("total")),
            }
        }
        .instrument(span)
        .await
    }

    async fn run_stages(&self, source: &str) -> Result<PipelineResult, PipelineError> {
        let source_id = derive_source_id(source);
        let scaler = ProgressScaler::new(self.progress.clone());
        let timeouts = &self.settings.timeouts;
        info!("starting pipeline for '{source_id}' ({source})");

        // Stage 1: frames out of the video.
        let extractor = FrameExtractor::new(&self.settings.extraction);
        let stage_progress = scaler.for_stage("frame_extraction");
        let frames = self
            .bounded(
                "frame_extraction",
                timeouts.frame_extraction(),
                extractor.extract(source, &source_id, &self.cancel, &stage_progress),
            )
            .await?;
        let frames_extracted = frames.len();

        // Stage 2: one classification per frame, in order.
        let classifier_prompt = self
            .prompts
            .get(&self.settings.prompts.classifier_template)
            .ok_or_else(|| PipelineError::PromptTemplateMissing {
                stage: "frame_classification",
                name: self.settings.prompts.classifier_template.clone(),
            })?
            .content()
            .to_string();
        let classifier = FrameClassifier::new(
            Arc::clone(&self.vision),
            classifier_prompt,
            &self.settings.classifier,
            &self.settings.retry,
        );
        let stage_progress = scaler.for_stage("frame_classification");
        let classifications = self
            .bounded(
                "frame_classification",
                timeouts.frame_classification(),
                classifier.classify(&frames, &source_id, &self.cancel, &stage_progress),
            )
            .await?;
        // Only the classifications need to outlive stage 2.
        drop(frames);

        // Stage 3: sparse events. Pure computation, no suspension.
        let events = detect_events(&classifications);
        scaler.emit(
            "action_detection",
            1.0,
            format!("detected {} events", events.len()),
        );
        drop(classifications);

        // Stage 4: cycles and statistics. Pure computation as well.
        let assembler = CycleAssembler::new(&self.settings.cycles);
        let (cycles, statistics) = assembler.run(&events);
        scaler.emit(
            "cycle_assembly",
            1.0,
            format!("assembled {} cycles", cycles.len()),
        );
        let events_count = events.len();
        drop(events);

        // Stage 5: optional telemetry and joystick statistics. Never a
        // hard failure.
        let enricher = TelemetryEnricher::new(
            &self.settings.telemetry.dir,
            &self.settings.telemetry.joystick_dir,
        );
        let (telemetry, joystick) = match self
            .bounded("telemetry_enrichment", timeouts.telemetry_enrichment(), async {
                Ok((
                    enricher.enrich(&source_id).await,
                    enricher.enrich_joystick(&source_id).await,
                ))
            })
            .await
        {
            Ok(records) => records,
            Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
            // A slow or broken telemetry lookup degrades to "not found".
            Err(e) => {
                tracing::warn!("telemetry enrichment degraded: {e}");
                (
                    crate::pipeline::types::TelemetryRecord::not_found(),
                    crate::pipeline::types::JoystickRecord::not_found(),
                )
            }
        };
        scaler.emit("telemetry_enrichment", 1.0, "telemetry lookup finished");

        // Stage 6: the report artifact.
        let generator = self.report_generator(&source_id)?;
        let generated_on = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let request = ReportRequest {
            source_id: &source_id,
            generated_on: &generated_on,
            cycles: &cycles,
            statistics: &statistics,
            telemetry: &telemetry,
            joystick: &joystick,
        };
        let report = self
            .bounded(
                "report_generation",
                timeouts.report_generation(),
                generator.generate(&request, &self.cancel),
            )
            .await?;
        scaler.emit("report_generation", 1.0, "report rendered");

        info!(
            "pipeline finished: {} frames, {} events, {} cycles",
            frames_extracted,
            events_count,
            cycles.len()
        );

        Ok(PipelineResult {
            source_id,
            frames_extracted,
            max_frames: self.settings.extraction.max_frames,
            events_count,
            cycles,
            statistics,
            telemetry,
            joystick,
            report,
        })
    }

    fn report_generator(&self, source_id: &str) -> Result<ReportGenerator, PipelineError> {
        let template = self
            .prompts
            .get(&self.settings.report.template)
            .ok_or_else(|| PipelineError::TemplateMissing {
                stage: "report_generation",
                name: self.settings.report.template.clone(),
            })?
            .content()
            .to_string();

        let narrative = if self.settings.report.narrative {
            let Some(text) = &self.text else {
                return Err(PipelineError::ConfigInvalid(format!(
                    "narrative mode enabled for '{source_id}' but no text model is configured"
                )));
            };
            let system_prompt = self
                .prompts
                .get(&self.settings.prompts.narrative_template)
                .ok_or_else(|| PipelineError::PromptTemplateMissing {
                    stage: "report_generation",
                    name: self.settings.prompts.narrative_template.clone(),
                })?
                .content()
                .to_string();
            Some(NarrativeMode {
                model: Arc::clone(text),
                system_prompt,
                retry: RetryPolicy::from_settings(&self.settings.retry),
            })
        } else {
            None
        };

        Ok(ReportGenerator::new(template, narrative))
    }

    /// Run one stage under its soft timeout, honoring cancellation.
    async fn bounded<T>(
        &self,
        stage: &'static str,
        limit: Duration,
        fut: impl Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        tokio::select! {
            // Cancellation wins over a stage that happens to be ready.
            biased;
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
            outcome = tokio::time::timeout(limit, fut) => match outcome {
                Ok(result) => result,
                Err(_) => Err(PipelineError::StageTimeout(stage)),
            },
        }
    }
}

pub struct CoordinatorBuilder {
    settings: Settings,
    prompts: Option<PromptStore>,
    vision: Option<Arc<dyn VisionModel>>,
    text: Option<Arc<dyn TextModel>>,
    progress: Option<ProgressCallback>,
    cancel: Option<CancellationToken>,
}

impl CoordinatorBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            prompts: None,
            vision: None,
            text: None,
            progress: None,
            cancel: None,
        }
    }

    /// Use a pre-loaded template store instead of reading the prompts
    /// directory from the settings.
    pub fn prompts(mut self, prompts: PromptStore) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Inject a vision model (tests use a scripted one).
    pub fn vision_model(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.vision = Some(model);
        self
    }

    /// Inject a text model for narrative mode.
    pub fn text_model(mut self, model: Arc<dyn TextModel>) -> Self {
        self.text = Some(model);
        self
    }

    pub fn progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Share a cancellation token with the caller; cancelling it unwinds
    /// the run at the next suspension point.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<Coordinator, PipelineError> {
        self.settings.validate()?;

        let prompts = self
            .prompts
            .unwrap_or_else(|| PromptStore::load(&self.settings.prompts.dir));

        let vision: Arc<dyn VisionModel> = match self.vision {
            Some(model) => model,
            None => Arc::new(Self::chat_client(&self.settings, true)?),
        };

        let text: Option<Arc<dyn TextModel>> = match self.text {
            Some(model) => Some(model),
            None if self.settings.report.narrative => {
                Some(Arc::new(Self::chat_client(&self.settings, false)?))
            }
            None => None,
        };

        Ok(Coordinator {
            settings: self.settings,
            prompts,
            vision,
            text,
            progress: self.progress,
            cancel: self.cancel.unwrap_or_default(),
        })
    }

    /// Build the HTTP client for either the vision or the narrative model,
    /// pulling the key from the configured environment variable.
    fn chat_client(settings: &Settings, vision: bool) -> Result<ChatClient, PipelineError> {
        let api_key = std::env::var(&settings.classifier.api_key_env).map_err(|_| {
            PipelineError::ConfigInvalid(format!(
                "environment variable {} is not set",
                settings.classifier.api_key_env
            ))
        })?;

        let client = if vision {
            ChatClient::new(
                &settings.classifier.api_base,
                api_key,
                &settings.classifier.model,
                settings.classifier.temperature,
                settings.classifier.max_output_tokens,
            )
            .with_json_mode()
        } else {
            ChatClient::new(
                &settings.classifier.api_base,
                api_key,
                &settings.report.narrative_model,
                settings.report.narrative_temperature,
                settings.report.narrative_max_tokens,
            )
        };
        Ok(client)
    }
}
