//! Chat-completions client used for both frame classification (vision) and
//! narrative report generation (text).
//!
//! Two model families disagree on the name of the output-length cap:
//! newer reasoning models take `max_completion_tokens` while the rest take
//! `max_tokens`. The family is resolved once from the model name at
//! construction, never per call.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ModelError, TextModel, VisionModel, VisionRequest, VisionVerdict};

/// Which request field carries the output-length cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenParam {
    MaxTokens,
    MaxCompletionTokens,
}

/// Model-name prefixes that take `max_completion_tokens`.
const COMPLETION_TOKEN_PREFIXES: [&str; 4] = ["gpt-5", "o1", "o3", "o4"];

impl TokenParam {
    /// Resolve the parameter family from a model name. Unknown prefixes
    /// default to `max_tokens`.
    pub fn for_model(model: &str) -> Self {
        let lower = model.to_ascii_lowercase();
        if COMPLETION_TOKEN_PREFIXES.iter().any(|p| lower.starts_with(p)) {
            TokenParam::MaxCompletionTokens
        } else {
            TokenParam::MaxTokens
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ContentPart {
    Text { r#type: String, text: String },
    Image { r#type: String, image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// HTTP client for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f64,
    output_token_limit: u32,
    token_param: TokenParam,
    json_mode: bool,
}

impl ChatClient {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f64,
        output_token_limit: u32,
    ) -> Self {
        let model = model.into();
        let token_param = TokenParam::for_model(&model);
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into(),
            api_key: api_key.into(),
            model,
            temperature,
            output_token_limit,
            token_param,
            json_mode: false,
        }
    }

    /// Ask the endpoint for a JSON object response (vision classification).
    pub fn with_json_mode(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn token_param(&self) -> TokenParam {
        self.token_param
    }

    fn build_request(&self, messages: Vec<Message>) -> ChatRequest {
        let (max_tokens, max_completion_tokens) = match self.token_param {
            TokenParam::MaxTokens => (Some(self.output_token_limit), None),
            TokenParam::MaxCompletionTokens => (None, Some(self.output_token_limit)),
        };
        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens,
            max_completion_tokens,
            temperature: self.temperature,
            response_format: self.json_mode.then(|| ResponseFormat {
                r#type: "json_object".to_string(),
            }),
        }
    }

    async fn send(&self, request: ChatRequest) -> Result<String, ModelError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ModelError::InvalidResponse("empty completion".into()))
    }
}

fn classify_status(status: u16, body: String) -> ModelError {
    match status {
        401 | 403 => ModelError::Auth(body),
        429 if body.contains("insufficient_quota") => ModelError::Quota(body),
        _ => ModelError::Status { status, body },
    }
}

#[async_trait]
impl VisionModel for ChatClient {
    async fn classify_frame(&self, request: VisionRequest<'_>) -> Result<VisionVerdict, ModelError> {
        let image_b64 = base64::engine::general_purpose::STANDARD.encode(request.image);
        let data_url = format!("data:{};base64,{image_b64}", request.mime_type);

        let messages = vec![
            Message {
                role: "system".to_string(),
                content: MessageContent::Text(request.system_prompt.to_string()),
            },
            Message {
                role: "user".to_string(),
                content: MessageContent::Parts(vec![
                    ContentPart::Text {
                        r#type: "text".to_string(),
                        text: request.user_message,
                    },
                    ContentPart::Image {
                        r#type: "image_url".to_string(),
                        image_url: ImageUrl { url: data_url },
                    },
                ]),
            },
        ];

        let content = self.send(self.build_request(messages)).await?;
        debug!("vision model returned {} bytes", content.len());

        let json = extract_json(&content);
        serde_json::from_str(&json)
            .map_err(|e| ModelError::InvalidResponse(format!("verdict parse: {e}")))
    }
}

#[async_trait]
impl TextModel for ChatClient {
    async fn generate(
        &self,
        system_prompt: &str,
        user_message: String,
    ) -> Result<String, ModelError> {
        let messages = vec![
            Message {
                role: "system".to_string(),
                content: MessageContent::Text(system_prompt.to_string()),
            },
            Message {
                role: "user".to_string(),
                content: MessageContent::Text(user_message),
            },
        ];
        self.send(self.build_request(messages)).await
    }
}

/// Pull a JSON object out of a completion, tolerating markdown fences.
fn extract_json(text: &str) -> String {
    let text = text.trim();

    if text.starts_with("```") {
        if let Some(start) = text.find('\n') {
            let inner = &text[start + 1..];
            if let Some(end) = inner.rfind("```") {
                return inner[..end].trim().to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return text[start..=end].to_string();
        }
    }

    text.to_string()
}
