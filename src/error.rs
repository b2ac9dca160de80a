use thiserror::Error;

/// Hard-failure taxonomy of the pipeline.
///
/// Soft failures (a single frame the classifier could not label, a missing
/// telemetry PDF, a narrative render that fell back to the deterministic
/// template) never surface here; they are recorded as notes on the affected
/// record and the run continues.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("[{stage}] source '{source_id}' unavailable: {cause}")]
    SourceUnavailable {
        stage: &'static str,
        source_id: String,
        cause: String,
    },

    #[error("[{stage}] decode failed for '{source_id}': {cause}")]
    DecodeFailed {
        stage: &'static str,
        source_id: String,
        cause: String,
    },

    #[error("[{stage}] no frames extracted from '{source_id}'")]
    NoFramesExtracted {
        stage: &'static str,
        source_id: String,
    },

    #[error("[{stage}] prompt template '{name}' missing")]
    PromptTemplateMissing {
        stage: &'static str,
        name: String,
    },

    #[error("[{stage}] classifier unavailable for '{source_id}' after {consecutive_failures} consecutive failures: {cause}")]
    ClassifierUnavailable {
        stage: &'static str,
        source_id: String,
        consecutive_failures: u32,
        cause: String,
    },

    #[error("stage '{0}' timed out")]
    StageTimeout(&'static str),

    #[error("[{stage}] report template '{name}' missing")]
    TemplateMissing {
        stage: &'static str,
        name: String,
    },

    #[error("[{stage}] report rendering failed for '{source_id}': {cause}")]
    RenderFailed {
        stage: &'static str,
        source_id: String,
        cause: String,
    },

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Longest underlying-cause message attached to a hard failure.
const MAX_CAUSE_LEN: usize = 500;

impl PipelineError {
    /// Truncate an underlying cause message before embedding it in a variant.
    pub fn truncate_cause(cause: impl std::fmt::Display) -> String {
        let mut text = cause.to_string();
        if text.len() > MAX_CAUSE_LEN {
            let mut end = MAX_CAUSE_LEN;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
            text.push_str("...");
        }
        text
    }

    /// Process exit code for the CLI entry point.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::ConfigInvalid(_) => 1,
            PipelineError::SourceUnavailable { .. }
            | PipelineError::DecodeFailed { .. }
            | PipelineError::NoFramesExtracted { .. } => 2,
            PipelineError::ClassifierUnavailable { .. } => 3,
            PipelineError::StageTimeout(_) => 4,
            PipelineError::Cancelled => 5,
            PipelineError::PromptTemplateMissing { .. }
            | PipelineError::TemplateMissing { .. }
            | PipelineError::RenderFailed { .. }
            | PipelineError::Internal(_) => 64,
        }
    }
}
