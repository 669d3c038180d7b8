//! Completion gateway: forwards a message list to the LLM provider.
//!
//! Provides a `CompletionBackend` trait with one implementation:
//! - **Groq** via its OpenAI-compatible `/chat/completions` endpoint
//!
//! Logical model names (`ModelName`) are mapped to provider model ids through
//! a static table. There is no retry and no streaming.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CompletionConfig;
use crate::models::{ChatMessage, ModelName};

/// Provider model ids for each logical model name.
const MODEL_TABLE: [(ModelName, &str); 3] = [
    (ModelName::Llama3, "llama-3.3-70b-versatile"),
    (ModelName::Mixtral, "mistral-saba-24b"),
    (ModelName::Gemma, "gemma2-9b-it"),
];

pub fn provider_model_id(model: ModelName) -> &'static str {
    MODEL_TABLE
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, id)| *id)
        .unwrap_or_default()
}

// ============================================================================
// CompletionBackend trait
// ============================================================================

/// Abstraction over chat-completion providers.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Send the full message list and return the text of the first choice.
    async fn complete(
        &self,
        model: ModelName,
        messages: &[ChatMessage],
    ) -> Result<String, CompletionError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Response contained no completion text")]
    MissingContent,

    #[error("Missing API key")]
    MissingApiKey,
}

// ============================================================================
// Provider API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
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
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorResponse {
    error: Option<ProviderErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorDetail {
    message: String,
}

// ============================================================================
// GroqClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GroqClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GroqClient {
    pub fn new(config: &CompletionConfig) -> Result<Self, CompletionError> {
        Self::with_base_url(config, config.base_url.clone())
    }

    /// Create a client with a custom base URL (for testing / self-hosted gateways)
    pub fn with_base_url(
        config: &CompletionConfig,
        base_url: String,
    ) -> Result<Self, CompletionError> {
        if config.api_key.trim().is_empty() {
            return Err(CompletionError::MissingApiKey);
        }

        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
            api_key: config.api_key.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CompletionBackend for GroqClient {
    async fn complete(
        &self,
        model: ModelName,
        messages: &[ChatMessage],
    ) -> Result<String, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = CompletionRequest {
            model: provider_model_id(model),
            messages,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ProviderErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error)
                .map(|e| e.message)
                .unwrap_or(error_body);

            tracing::error!(code = status.as_u16(), message = %message, "Completion API error");

            return Err(CompletionError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let completion: CompletionResponse = response.json().await?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(CompletionError::MissingContent)
    }

    fn name(&self) -> &str {
        "groq"
    }
}

// ============================================================================
// TESTS
// ============================================================================
