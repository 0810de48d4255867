//! Chat-completions client for Groq's OpenAI-compatible API.

use crate::error::LlmError;
use crate::traits::{ChatModel, CompletionRequest};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

pub const DEFAULT_API_BASE_URL: &str = "https://api.groq.com/openai/v1/";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

/// Model identifiers the deployment has been verified against.
pub const KNOWN_MODELS: [&str; 3] = [
    "llama-3.3-70b-versatile",
    "llama-3.1-8b-instant",
    "gemma2-9b-it",
];

pub fn is_known_model(model: &str) -> bool {
    KNOWN_MODELS.contains(&model)
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
}

pub struct GroqClient {
    client: Client,
    endpoint: Url,
    api_key: String,
}

impl GroqClient {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, LlmError> {
        let base = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{base_url}/"))?
        };

        Ok(Self {
            client: Client::new(),
            endpoint: base.join("chat/completions")?,
            api_key: api_key.into(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ChatModel for GroqClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(error_from_response(status, &body));
        }

        let parsed: CompletionResponse =
            serde_json::from_str(&body).map_err(|error| LlmError::Api {
                status: status.as_u16(),
                message: format!("unreadable completion body: {error}"),
            })?;

        // No choices reads as an empty completion, not a failure.
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

/// Maps a failed response onto a structured error, preferring the status
/// code and the provider's `error.code` over the message text.
fn error_from_response(status: StatusCode, body: &str) -> LlmError {
    let (message, code) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.message, envelope.error.code),
        Err(_) => (body.trim().to_string(), None),
    };

    match (status, code.as_deref()) {
        (StatusCode::UNAUTHORIZED, _) | (_, Some("invalid_api_key")) => {
            LlmError::Unauthorized(message)
        }
        (StatusCode::TOO_MANY_REQUESTS, _) | (_, Some("rate_limit_exceeded")) => {
            LlmError::RateLimited(message)
        }
        (_, Some("model_decommissioned" | "model_not_found")) => LlmError::UnknownModel(message),
        (StatusCode::NOT_FOUND, _) if message.contains("model") => LlmError::UnknownModel(message),
        _ => LlmError::Api {
            status: status.as_u16(),
            message,
        },
    }
}
