pub mod chat;
pub mod retry;

pub use chat::{ChatClient, TokenParam};
pub use retry::{CircuitBreaker, RetryPolicy};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors from the external model services. Transience decides whether the
/// retry policy re-attempts a call.
#[derive(Error, Debug, Clone)]
pub enum ModelError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("http status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// Network errors, 5xx and 429 are worth retrying; auth and quota
    /// failures are not, and malformed bodies are a per-record soft failure.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Transport(_) => true,
            ModelError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            ModelError::Auth(_) | ModelError::Quota(_) | ModelError::InvalidResponse(_) => false,
        }
    }
}

/// One frame's worth of input to the vision model.
pub struct VisionRequest<'a> {
    pub image: &'a Bytes,
    pub mime_type: &'static str,
    pub system_prompt: &'a str,
    pub user_message: String,
}

/// Raw verdict as returned over the wire, before label validation.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct VisionVerdict {
    pub label: String,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub note: Option<String>,
}

#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn classify_frame(&self, request: VisionRequest<'_>) -> Result<VisionVerdict, ModelError>;
}

#[async_trait]
pub trait TextModel: Send + Sync {
    /// Generate prose from a system prompt and a structured user payload.
    /// Any non-empty response is accepted.
    async fn generate(&self, system_prompt: &str, user_message: String)
    -> Result<String, ModelError>;
}
