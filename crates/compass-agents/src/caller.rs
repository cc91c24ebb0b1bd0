use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use compass_common::{Error, Result};
use compass_config::{AgentConfig, AppConfig, ModelSpec, ProviderConfig};
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::providers::{
    AnthropicProvider, LlmMessage, LlmProvider, LlmRequest, OpenAiProvider, ResponseFormat,
};

/// Providers keyed by id, each with its own retry settings.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    settings: HashMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build clients for every provider section in the config. Unknown ids are skipped.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();
        for (id, settings) in &config.models {
            let provider: Arc<dyn LlmProvider> = match id.as_str() {
                "openai" => Arc::new(OpenAiProvider::new(
                    settings.api_key.clone(),
                    settings.base_url.clone(),
                )),
                "anthropic" => {
                    let provider = AnthropicProvider::new(settings.api_key.clone());
                    match &settings.base_url {
                        Some(url) => Arc::new(provider.with_base_url(url.clone())),
                        None => Arc::new(provider),
                    }
                }
                other => {
                    warn!("unsupported provider '{}' in config; skipping", other);
                    continue;
                }
            };
            if settings.api_key.is_empty() {
                warn!("provider '{}' has no API key configured", id);
            }
            registry.register(provider, settings.clone());
        }
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>, settings: ProviderConfig) {
        let id = provider.provider_id().to_string();
        info!("registered LLM provider '{}'", id);
        self.settings.insert(id.clone(), settings);
        self.providers.insert(id, provider);
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    pub fn settings(&self, provider_id: &str) -> ProviderConfig {
        self.settings.get(provider_id).cloned().unwrap_or_default()
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Probe every provider concurrently.
    pub async fn health_check_all(&self) -> Vec<(String, bool)> {
        let checks = self.providers.iter().map(|(id, provider)| async move {
            let ok = provider.health_check().await.unwrap_or(false);
            (id.clone(), ok)
        });
        let mut results = join_all(checks).await;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

/// Everything an agent sends for one completion apart from the model choice.
#[derive(Debug, Clone)]
pub struct CallInput {
    pub system: Option<String>,
    pub messages: Vec<LlmMessage>,
    pub response_format: ResponseFormat,
}

impl CallInput {
    pub fn new(messages: Vec<LlmMessage>) -> Self {
        Self {
            system: None,
            messages,
            response_format: ResponseFormat::Text,
        }
    }

    /// Single user-turn prompt.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self::new(vec![LlmMessage::user(text)])
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        let system = system.into();
        self.system = (!system.trim().is_empty()).then_some(system);
        self
    }

    /// Request a JSON object response.
    pub fn json(mut self) -> Self {
        self.response_format = ResponseFormat::JsonObject;
        self
    }
}

/// Runs agent calls through the retry ladder and the optional fallback model.
#[derive(Clone)]
pub struct AgentCaller {
    registry: Arc<ProviderRegistry>,
}

impl AgentCaller {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Call the agent's primary model, then its fallback model once if the
    /// primary ladder fails. Errors name the agent by its prompt template.
    pub async fn call(&self, config: &AgentConfig, input: &CallInput) -> Result<String> {
        let agent = config.system_prompt_template.as_str();

        let primary_err = match self.run_ladder(&config.model, input).await {
            Ok(text) => return Ok(text),
            Err(err) => err,
        };

        if let Some(fallback) = &config.fallback {
            warn!(
                "agent '{}' primary model {}/{} failed ({}); trying fallback {}/{}",
                agent,
                config.model.provider,
                config.model.model_name,
                primary_err,
                fallback.provider,
                fallback.model_name
            );
            match self.run_ladder(fallback, input).await {
                Ok(text) => {
                    info!("agent '{}' answered by fallback model {}", agent, fallback.model_name);
                    return Ok(text);
                }
                Err(fallback_err) => {
                    error!("agent '{}' fallback failed: {}", agent, fallback_err);
                }
            }
        }

        error!("agent '{}' call failed: {}", agent, primary_err);
        Err(Error::Agent(format!(
            "Failed to get response from {agent}: {primary_err}"
        )))
    }

    async fn run_ladder(&self, model: &ModelSpec, input: &CallInput) -> Result<String> {
        let provider = self.registry.get(&model.provider).ok_or_else(|| {
            Error::Agent(format!("provider '{}' is not configured", model.provider))
        })?;
        let settings = self.registry.settings(&model.provider);
        let attempts = settings.retry_attempts.max(1);

        let request = LlmRequest {
            model: model.model_name.clone(),
            messages: input.messages.clone(),
            system: input.system.clone(),
            max_tokens: model.max_tokens,
            temperature: Some(model.temperature),
            response_format: input.response_format,
        };

        let mut attempt = 1;
        loop {
            match provider.complete(&request).await {
                Ok(response) => return Ok(response.text),
                Err(err) => {
                    let retryable = is_retryable_provider_error(&err);
                    warn!(
                        "{} call attempt {}/{} failed ({}): {}",
                        model.provider,
                        attempt,
                        attempts,
                        if retryable { "retryable" } else { "not retryable" },
                        err
                    );
                    if !retryable || attempt >= attempts {
                        return Err(err);
                    }
                    tokio::time::sleep(backoff_delay(settings.retry_backoff_ms, attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Delay after the `attempt`-th failure: `base * 2^(attempt - 1)`.
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

pub(crate) fn is_retryable_provider_error(error: &Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();

    if let Some(status) = extract_status_code(&message) {
        return matches!(status, 429 | 500 | 502 | 503);
    }

    let retryable_fragments = [
        "timed out",
        "timeout",
        "connection refused",
        "connection reset",
        "connection aborted",
        "temporarily unavailable",
        "dns error",
        "network error",
    ];

    retryable_fragments
        .iter()
        .any(|fragment| message.contains(fragment))
}

fn extract_status_code(message: &str) -> Option<u16> {
    for marker in ["status=", "status:", "status code"] {
        let mut search_start = 0usize;
        while let Some(offset) = message[search_start..].find(marker) {
            let after_marker = search_start + offset + marker.len();
            let digits: String = message[after_marker..]
                .trim_start()
                .chars()
                .take_while(|ch| ch.is_ascii_digit())
                .collect();

            if digits.len() >= 3 {
                if let Ok(status) = digits[..3].parse::<u16>() {
                    return Some(status);
                }
            }
            search_start = after_marker;
        }
    }
    None
}
