use std::collections::HashMap;
use std::path::{Path, PathBuf};

use compass_common::{Error, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::model::{
    AgentConfig, AppConfig, DatabaseConfig, ExtractionConfig, GatewayConfig, ProviderConfig,
};

const MODELS_FILE: &str = "models.yaml";
const PROMPTS_FILE: &str = "prompts.yaml";

#[derive(Debug, Deserialize)]
struct ModelsFile {
    environments: HashMap<String, EnvironmentSection>,
}

#[derive(Debug, Default, Deserialize)]
struct EnvironmentSection {
    #[serde(default)]
    database: DatabaseConfig,
    #[serde(default)]
    gateway: GatewayConfig,
    #[serde(default)]
    extraction: ExtractionConfig,
    #[serde(default)]
    models: HashMap<String, ProviderConfig>,
    #[serde(default)]
    agents: HashMap<String, AgentConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptsFile {
    #[serde(default)]
    templates: HashMap<String, PromptTemplate>,
}

#[derive(Debug, Deserialize)]
struct PromptTemplate {
    #[serde(default)]
    base_prompt: String,
}

/// Loads `models.yaml` and `prompts.yaml` from a config directory.
pub struct ConfigLoader {
    config_dir: PathBuf,
    environment: String,
}

impl ConfigLoader {
    /// Use `APP_ENV` to pick the environment, defaulting to `development`.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        let environment =
            std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        Self {
            config_dir: config_dir.into(),
            environment,
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn load(&self) -> Result<AppConfig> {
        self.load_with(|name| std::env::var(name).ok())
    }

    /// Load using a custom lookup for `${VAR}` placeholders.
    pub fn load_with<F>(&self, lookup: F) -> Result<AppConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let models_path = self.config_dir.join(MODELS_FILE);
        let raw = std::fs::read_to_string(&models_path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", models_path.display()))
        })?;
        let mut value: serde_yaml::Value = serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid {MODELS_FILE}: {e}")))?;
        resolve_env_vars(&mut value, &lookup);

        let mut models: ModelsFile = serde_yaml::from_value(value)
            .map_err(|e| Error::Config(format!("invalid {MODELS_FILE}: {e}")))?;
        let section = models
            .environments
            .remove(&self.environment)
            .ok_or_else(|| {
                Error::Config(format!(
                    "environment '{}' not defined in {MODELS_FILE}",
                    self.environment
                ))
            })?;

        let prompts = self.load_prompts()?;

        let config = AppConfig {
            environment: self.environment.clone(),
            database: section.database,
            gateway: section.gateway,
            extraction: section.extraction,
            models: section.models,
            agents: section.agents,
            prompts,
        };
        config.validate()?;

        info!(
            "loaded configuration for environment '{}' ({} agents, {} prompt templates)",
            config.environment,
            config.agents.len(),
            config.prompts.len()
        );
        Ok(config)
    }

    fn load_prompts(&self) -> Result<HashMap<String, String>> {
        let path = self.config_dir.join(PROMPTS_FILE);
        if !path.exists() {
            warn!("{} not found; agents will run without system prompts", path.display());
            return Ok(HashMap::new());
        }

        let raw = std::fs::read_to_string(&path)?;
        let file: PromptsFile = serde_yaml::from_str(&raw)
            .map_err(|e| Error::Config(format!("invalid {PROMPTS_FILE}: {e}")))?;
        Ok(file
            .templates
            .into_iter()
            .map(|(name, template)| (name, template.base_prompt))
            .collect())
    }
}

/// Replace whole-string `${VAR}` values with the looked-up value (empty if unset).
fn resolve_env_vars<F>(value: &mut serde_yaml::Value, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        serde_yaml::Value::String(s) => {
            if let Some(name) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
                *s = lookup(name).unwrap_or_default();
            }
        }
        serde_yaml::Value::Sequence(items) => {
            for item in items {
                resolve_env_vars(item, lookup);
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                resolve_env_vars(item, lookup);
            }
        }
        _ => {}
    }
}
