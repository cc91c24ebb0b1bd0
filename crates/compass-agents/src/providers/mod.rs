use async_trait::async_trait;
use compass_common::Result;
use serde::{Deserialize, Serialize};

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// Trait for hosted LLM integrations (OpenAI-compatible, Anthropic).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier matching the `models.<id>` config key.
    fn provider_id(&self) -> &str;

    /// Send a completion request and return the response.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Check if the provider is reachable with the configured credentials.
    async fn health_check(&self) -> Result<bool>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<LlmMessage>,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    #[serde(default)]
    pub response_format: ResponseFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: ChatRole,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Ask the model for a single JSON object.
    JsonObject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub model: String,
    pub usage: Option<Usage>,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Describe a transport failure so the retry classifier can recognise it.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> compass_common::Error {
    let message = if err.is_timeout() {
        format!("{provider} request timed out: {err}")
    } else if err.is_connect() {
        format!("{provider} network error: {err}")
    } else {
        format!("{provider} request failed: {err}")
    };
    compass_common::Error::Agent(message)
}

/// Non-2xx responses carry the status in a `status=<code>` form.
pub(crate) async fn status_error(provider: &str, response: reqwest::Response) -> compass_common::Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    compass_common::Error::Agent(format!(
        "{provider} API error: status={status}, body={body}"
    ))
}
