use std::time::Duration;

use serde::Deserialize;

use crate::error::PipelineError;

/// Sampling rates the extractor accepts.
const ALLOWED_FPS: [u32; 4] = [1, 3, 5, 10];

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub extraction: ExtractionSettings,
    pub classifier: ClassifierSettings,
    pub retry: RetrySettings,
    pub cycles: CycleSettings,
    pub telemetry: TelemetrySettings,
    pub report: ReportSettings,
    pub prompts: PromptSettings,
    pub timeouts: TimeoutSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionSettings {
    pub fps: u32,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default)]
    pub max_frames: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierSettings {
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub concurrency: usize,
    #[serde(default)]
    pub two_pass: bool,
    #[serde(default = "default_refine_confidence")]
    pub refine_below_confidence: f64,
    pub api_base: String,
    pub api_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub initial_backoff_ms: u64,
    pub backoff_factor: u32,
    pub max_attempts: u32,
    pub breaker_threshold: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CycleSettings {
    pub complete_min_secs: f64,
    pub partial_min_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    pub dir: String,
    pub joystick_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportSettings {
    pub template: String,
    #[serde(default)]
    pub narrative: bool,
    pub narrative_model: String,
    pub narrative_max_tokens: u32,
    pub narrative_temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptSettings {
    pub dir: String,
    pub classifier_template: String,
    pub narrative_template: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutSettings {
    pub frame_extraction_secs: u64,
    pub frame_classification_secs: u64,
    pub action_detection_secs: u64,
    pub cycle_assembly_secs: u64,
    pub telemetry_enrichment_secs: u64,
    pub report_generation_secs: u64,
    pub total_secs: u64,
}

fn default_max_dimension() -> u32 {
    1024
}

fn default_jpeg_quality() -> u8 {
    85
}

fn default_refine_confidence() -> f64 {
    0.6
}

impl Settings {
    /// Load settings from `config/default`, then an optional override file.
    pub fn new(override_file: Option<&str>) -> Result<Self, PipelineError> {
        let mut builder =
            config::Config::builder().add_source(config::File::with_name("config/default"));
        if let Some(path) = override_file {
            builder = builder.add_source(config::File::with_name(path));
        }
        let settings: Settings = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| PipelineError::ConfigInvalid(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string. Used by tests and embedders.
    pub fn from_toml(toml: &str) -> Result<Self, PipelineError> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| PipelineError::ConfigInvalid(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !ALLOWED_FPS.contains(&self.extraction.fps) {
            return Err(PipelineError::ConfigInvalid(format!(
                "extraction.fps must be one of {ALLOWED_FPS:?}, got {}",
                self.extraction.fps
            )));
        }
        if self.classifier.concurrency == 0 {
            return Err(PipelineError::ConfigInvalid(
                "classifier.concurrency must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.classifier.refine_below_confidence) {
            return Err(PipelineError::ConfigInvalid(format!(
                "classifier.refine_below_confidence must be within [0, 1], got {}",
                self.classifier.refine_below_confidence
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(PipelineError::ConfigInvalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.breaker_threshold == 0 {
            return Err(PipelineError::ConfigInvalid(
                "retry.breaker_threshold must be at least 1".into(),
            ));
        }
        if self.cycles.partial_min_secs > self.cycles.complete_min_secs {
            return Err(PipelineError::ConfigInvalid(format!(
                "cycles.partial_min_secs ({}) must not exceed cycles.complete_min_secs ({})",
                self.cycles.partial_min_secs, self.cycles.complete_min_secs
            )));
        }
        Ok(())
    }
}

impl TimeoutSettings {
    pub fn frame_extraction(&self) -> Duration {
        Duration::from_secs(self.frame_extraction_secs)
    }

    pub fn frame_classification(&self) -> Duration {
        Duration::from_secs(self.frame_classification_secs)
    }

    pub fn action_detection(&self) -> Duration {
        Duration::from_secs(self.action_detection_secs)
    }

    pub fn cycle_assembly(&self) -> Duration {
        Duration::from_secs(self.cycle_assembly_secs)
    }

    pub fn telemetry_enrichment(&self) -> Duration {
        Duration::from_secs(self.telemetry_enrichment_secs)
    }

    pub fn report_generation(&self) -> Duration {
        Duration::from_secs(self.report_generation_secs)
    }

    pub fn total(&self) -> Duration {
        Duration::from_secs(self.total_secs)
    }
}

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    Settings::from_toml(
        r#"
        [extraction]
        fps = 3

        [classifier]
        model = "gpt-4o"
        temperature = 0.2
        max_output_tokens = 200
        concurrency = 4
        api_base = "https://api.openai.com/v1"
        api_key_env = "OPENAI_API_KEY"

        [retry]
        initial_backoff_ms = 1000
        backoff_factor = 2
        max_attempts = 3
        breaker_threshold = 10

        [cycles]
        complete_min_secs = 5.0
        partial_min_secs = 3.0

        [telemetry]
        dir = "simulation_report"
        joystick_dir = "joystick_data"

        [report]
        template = "cycle_report"
        narrative_model = "gemini-2.0-flash"
        narrative_max_tokens = 2000
        narrative_temperature = 0.3

        [prompts]
        dir = "prompts"
        classifier_template = "frame_classifier"
        narrative_template = "narrative_report"

        [timeouts]
        frame_extraction_secs = 300
        frame_classification_secs = 1800
        action_detection_secs = 30
        cycle_assembly_secs = 30
        telemetry_enrichment_secs = 60
        report_generation_secs = 300
        total_secs = 3600
        "#,
    )
    .expect("test settings parse")
}
