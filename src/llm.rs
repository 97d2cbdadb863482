/// Chat-completion client for OpenRouter and other OpenAI-compatible APIs
///
/// Failures are returned as a typed `CompletionError` so front ends can show
/// the patient a readable message while the log keeps the details.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::session::ChatMessage;

const NO_ERROR_DETAILS: &str = "No detailed error message.";

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("OPENROUTER_API_KEY is missing or empty")]
    MissingApiKey,

    #[error("unauthorized (401): {0}")]
    Unauthorized(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("connection error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl CompletionError {
    /// HTTP status of the failed call, if the API answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            CompletionError::Unauthorized(_) => Some(401),
            CompletionError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message shown to the patient in place of an answer
    pub fn user_message(&self) -> String {
        match self {
            CompletionError::MissingApiKey => {
                "❌ Configuration Error: The AI service API key (OPENROUTER_API_KEY) is missing. Please check your setup.".to_string()
            }
            CompletionError::Unauthorized(_) | CompletionError::Api { .. } => format!(
                "❌ I'm having technical difficulties. Please try again later. (Error: {})",
                self.status().unwrap_or_default()
            ),
            CompletionError::Transport(e) => {
                format!("❌ Connection error. Please try again. Error: {}", e)
            }
            CompletionError::MalformedResponse(_) => {
                "❌ I'm having technical difficulties. Please try again later. (Error: unreadable response)".to_string()
            }
        }
    }
}

/// Everything needed to talk to the completion endpoint
#[derive(Debug, Clone)]
pub struct CompletionSettings {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub referer: String,
    pub title: String,
}

impl From<&Config> for CompletionSettings {
    fn from(config: &Config) -> Self {
        Self {
            api_key: config.openrouter_api_key.clone(),
            api_base: config.llm_api_base.clone(),
            model: config.chat_model.clone(),
            temperature: config.chat_temperature,
            max_tokens: config.chat_max_tokens,
            timeout: config.llm_timeout,
            referer: config.app_referer.clone(),
            title: config.app_title.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// A model advertised by `GET /models`
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

/// Pull `error.message` out of an error body, if there is one
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .and_then(|error| error.message)
        .unwrap_or_else(|| NO_ERROR_DETAILS.to_string())
}

pub struct CompletionClient {
    settings: CompletionSettings,
    http_client: reqwest::Client,
}

impl CompletionClient {
    pub fn new(settings: CompletionSettings) -> Result<Self, CompletionError> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            settings: CompletionSettings {
                api_base: settings.api_base.trim_end_matches('/').to_string(),
                ..settings
            },
            http_client,
        })
    }

    fn api_key(&self) -> Result<&str, CompletionError> {
        match self.settings.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => {
                log::error!("OPENROUTER_API_KEY is missing or empty during the completion call");
                Err(CompletionError::MissingApiKey)
            }
        }
    }

    /// Complete a conversation with the configured model and sampling settings
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        self.complete_with(
            &self.settings.model,
            messages,
            self.settings.temperature,
            self.settings.max_tokens,
        )
        .await
    }

    /// Complete a conversation with an explicit model and sampling settings
    pub async fn complete_with(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, CompletionError> {
        let api_key = self.api_key()?;

        let request = ChatRequest {
            model,
            messages,
            temperature,
            max_tokens,
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.settings.api_base))
            .bearer_auth(api_key)
            .header("HTTP-Referer", &self.settings.referer)
            .header("X-Title", &self.settings.title)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                log::error!("Connection error: {}", e);
                CompletionError::Transport(e)
            })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = error_message(&body);

            if status == reqwest::StatusCode::UNAUTHORIZED {
                log::error!("API error 401 Unauthorized: the OPENROUTER_API_KEY is likely invalid or missing. Please check your .env file.");
                return Err(CompletionError::Unauthorized(message));
            }

            log::error!("Completion API error {}: {}", status.as_u16(), message);
            return Err(CompletionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| CompletionError::MalformedResponse(format!("{}: {}", e, body)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CompletionError::MalformedResponse("response had no choices".to_string()))
    }

    /// List the models the endpoint advertises
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, CompletionError> {
        let api_key = self.api_key()?;

        let response = self
            .http_client
            .get(format!("{}/models", self.settings.api_base))
            .bearer_auth(api_key)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = error_message(&body);
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Err(CompletionError::Unauthorized(message));
            }
            return Err(CompletionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let list: ModelList = serde_json::from_str(&body)
            .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;
        Ok(list.data)
    }
}
