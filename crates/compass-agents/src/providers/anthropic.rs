use super::{
    ChatRole, LlmProvider, LlmRequest, LlmResponse, ResponseFormat, Usage, status_error,
    transport_error,
};
use async_trait::async_trait;
use compass_common::{Error, Result};
use reqwest::Client;
use serde_json::json;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Appended to the system prompt when the caller asks for JSON; the messages
/// API has no response-format switch.
const JSON_INSTRUCTION: &str =
    "Respond with a single valid JSON object and nothing else. Do not wrap it in code fences.";

pub struct AnthropicProvider {
    api_key: String,
    client: Client,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn create_request_body(&self, request: &LlmRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|msg| {
                json!({
                    "role": match msg.role {
                        ChatRole::User => "user",
                        ChatRole::Assistant => "assistant",
                    },
                    "content": msg.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });

        let system = match (request.system.as_deref(), request.response_format) {
            (Some(system), ResponseFormat::JsonObject) => {
                Some(format!("{system}\n\n{JSON_INSTRUCTION}"))
            }
            (None, ResponseFormat::JsonObject) => Some(JSON_INSTRUCTION.to_string()),
            (Some(system), ResponseFormat::Text) => Some(system.to_string()),
            (None, ResponseFormat::Text) => None,
        };
        if let Some(system) = system {
            body["system"] = json!(system);
        }

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }

        body
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = self.create_request_body(request);

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error("Anthropic", e))?;

        if !response.status().is_success() {
            return Err(status_error("Anthropic", response).await);
        }

        let raw_response: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Agent(format!("Failed to parse Anthropic response: {e}")))?;

        let blocks = raw_response["content"]
            .as_array()
            .ok_or_else(|| Error::Agent("Missing content in Anthropic response".to_string()))?;
        let text = blocks
            .iter()
            .filter(|block| block["type"].as_str() == Some("text"))
            .filter_map(|block| block["text"].as_str())
            .collect::<Vec<_>>()
            .join("");

        let usage = raw_response["usage"].as_object().map(|u| Usage {
            input_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
            output_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
        });

        Ok(LlmResponse {
            text,
            model: raw_response["model"].as_str().unwrap_or_default().to_string(),
            usage,
            stop_reason: raw_response["stop_reason"].as_str().map(str::to_string),
        })
    }

    async fn health_check(&self) -> Result<bool> {
        // The messages API has no cheap probe; treat a configured key as healthy.
        Ok(!self.api_key.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::LlmMessage;

    fn request(system: Option<&str>, format: ResponseFormat) -> LlmRequest {
        LlmRequest {
            model: "claude-3-5-sonnet-latest".into(),
            messages: vec![LlmMessage::user("hello")],
            system: system.map(str::to_string),
            max_tokens: None,
            temperature: Some(0.5),
            response_format: format,
        }
    }

    #[test]
    fn max_tokens_defaults_to_1024() {
        let provider = AnthropicProvider::new("k".into());
        let body = provider.create_request_body(&request(None, ResponseFormat::Text));
        assert_eq!(body["max_tokens"], 1024);
        assert!(body.get("system").is_none());
    }

    #[test]
    fn json_mode_appends_instruction_to_system_prompt() {
        let provider = AnthropicProvider::new("k".into());
        let body =
            provider.create_request_body(&request(Some("You are a counselor."), ResponseFormat::JsonObject));
        let system = body["system"].as_str().unwrap();
        assert!(system.starts_with("You are a counselor."));
        assert!(system.ends_with(JSON_INSTRUCTION));
    }

    #[tokio::test]
    async fn health_requires_an_api_key() {
        assert!(!AnthropicProvider::new(String::new()).health_check().await.unwrap());
        assert!(AnthropicProvider::new("k".into()).health_check().await.unwrap());
    }
}
