use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::catalog::ModelId;
use crate::constants::{CHAT_COMPLETIONS_PATH, DEFAULT_GROQ_BASE_URL, DEFAULT_TIMEOUT_SECS};

// Structures matching the OpenAI-compatible /chat/completions endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: ModelId,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Deserialize, Debug)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Error)]
pub enum GroqError {
    #[error("no Groq API key configured; set GROQ_API_KEY or enter a key")]
    MissingApiKey,
    #[error("the Groq API key contains characters that cannot be sent in an HTTP header")]
    InvalidApiKey,
    #[error("request to the Groq API failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Groq API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Groq API returned no answer")]
    EmptyResponse,
    #[error("could not decode the Groq API response: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Anything that can turn a chat request into an answer.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, GroqError>;
}

/// Connection settings shared by every client the process builds.
#[derive(Debug, Clone)]
pub struct GroqSettings {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for GroqSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GROQ_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone)]
pub struct GroqClient {
    http: Client,
    endpoint: String,
}

impl fmt::Debug for GroqClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroqClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl GroqClient {
    pub fn new(api_key: &str, settings: &GroqSettings) -> Result<Self, GroqError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(GroqError::MissingApiKey);
        }

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|_| GroqError::InvalidApiKey)?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(GroqError::Transport)?;

        Ok(Self {
            http,
            endpoint: format!(
                "{}{}",
                settings.base_url.trim_end_matches('/'),
                CHAT_COMPLETIONS_PATH
            ),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatBackend for GroqClient {
    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: &ChatRequest) -> Result<String, GroqError> {
        debug!(endpoint = %self.endpoint, "Sending chat completion request");

        let response = self
            .http
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(GroqError::Transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Groq API request failed");
            return Err(GroqError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let completion = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(GroqError::Decode)?;

        let answer = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(GroqError::EmptyResponse)?;

        debug!(answer_len = answer.len(), "Received Groq answer");
        Ok(answer)
    }
}
