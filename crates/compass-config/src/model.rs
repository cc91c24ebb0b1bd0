use std::collections::HashMap;
use std::path::PathBuf;

use compass_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Fully resolved configuration for one environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// API settings keyed by provider id (`openai`, `anthropic`).
    #[serde(default)]
    pub models: HashMap<String, ProviderConfig>,
    /// Model selection keyed by agent name.
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    /// Prompt templates keyed by template name.
    #[serde(default)]
    pub prompts: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins. Empty means same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

/// How actionable-item metadata is treated when the model omits it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Drop items that have no metadata instead of filling in defaults.
    #[serde(default)]
    pub strict_metadata: bool,
    /// Render item text in bold in the display string.
    #[serde(default)]
    pub emphasize_items: bool,
}

/// Connection settings for one hosted LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Provider + model + sampling parameters for a single completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider: String,
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Per-agent model selection with an optional fallback model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(flatten)]
    pub model: ModelSpec,
    pub system_prompt_template: String,
    #[serde(default)]
    pub fallback: Option<ModelSpec>,
}

impl AppConfig {
    /// Reject values the providers would refuse at call time.
    pub fn validate(&self) -> Result<()> {
        for (name, agent) in &self.agents {
            check_model(name, &agent.model)?;
            if let Some(fallback) = &agent.fallback {
                check_model(&format!("{name}.fallback"), fallback)?;
            }
        }
        for (provider, cfg) in &self.models {
            if cfg.retry_attempts == 0 {
                return Err(Error::Config(format!(
                    "models.{provider}.retry_attempts must be at least 1"
                )));
            }
        }
        Ok(())
    }

    pub fn agent(&self, name: &str) -> Result<&AgentConfig> {
        self.agents
            .get(name)
            .ok_or_else(|| Error::Config(format!("no configuration found for agent type: {name}")))
    }

    pub fn provider(&self, provider: &str) -> ProviderConfig {
        self.models.get(provider).cloned().unwrap_or_default()
    }

    /// Prompt text for a template name. Unknown templates resolve to an empty prompt.
    pub fn prompt(&self, template: &str) -> &str {
        match self.prompts.get(template) {
            Some(prompt) => prompt.as_str(),
            None => {
                tracing::warn!("prompt template '{}' not found; using empty prompt", template);
                ""
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut agents = HashMap::new();
        for (name, max_tokens) in [
            ("primary_counselor", 1500),
            ("strategic_planning", 2000),
            ("college_research", 2500),
        ] {
            agents.insert(
                name.to_string(),
                AgentConfig {
                    model: ModelSpec {
                        provider: "openai".to_string(),
                        model_name: "gpt-4o".to_string(),
                        temperature: default_temperature(),
                        max_tokens: Some(max_tokens),
                    },
                    system_prompt_template: name.to_string(),
                    fallback: None,
                },
            );
        }

        Self {
            environment: default_environment(),
            database: DatabaseConfig::default(),
            gateway: GatewayConfig::default(),
            extraction: ExtractionConfig::default(),
            models: HashMap::new(),
            agents,
            prompts: HashMap::new(),
        }
    }
}

fn check_model(label: &str, model: &ModelSpec) -> Result<()> {
    if !(0.0..=1.0).contains(&model.temperature) {
        return Err(Error::Config(format!(
            "agents.{label}.temperature must be between 0.0 and 1.0, got {}",
            model.temperature
        )));
    }
    if model.provider.trim().is_empty() {
        return Err(Error::Config(format!("agents.{label}.provider is required")));
    }
    if model.model_name.trim().is_empty() {
        return Err(Error::Config(format!("agents.{label}.model_name is required")));
    }
    Ok(())
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("compass.db")
}

fn default_pool_size() -> u32 {
    8
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_temperature() -> f64 {
    0.7
}
