use compass_common::{Error, Result};
use compass_config::{AgentConfig, AppConfig};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::caller::{AgentCaller, CallInput};
use crate::providers::LlmMessage;

pub mod counselor;
pub mod research;
pub mod strategic;

pub use counselor::CounselorAgent;
pub use research::CollegeResearchAgent;
pub use strategic::{MilestoneSuggestion, ProfileGap, StrategicPlanningAgent};

/// An agent's name, model configuration and resolved system prompt.
#[derive(Clone)]
pub struct AgentHandle {
    name: String,
    config: AgentConfig,
    system_prompt: String,
    caller: AgentCaller,
}

impl AgentHandle {
    pub fn from_config(name: &str, app: &AppConfig, caller: AgentCaller) -> Result<Self> {
        let config = app.agent(name)?.clone();
        let system_prompt = app.prompt(&config.system_prompt_template).to_string();
        Ok(Self {
            name: name.to_string(),
            config,
            system_prompt,
            caller,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn caller(&self) -> &AgentCaller {
        &self.caller
    }

    /// Conversational reply with the user's context appended to the system prompt.
    pub async fn respond(&self, message: &str, context: &Value) -> Result<String> {
        debug!("agent '{}' generating response", self.name);
        let input = CallInput::new(vec![LlmMessage::user(message)])
            .with_system(build_system_prompt(&self.system_prompt, context));
        self.caller.call(&self.config, &input).await
    }

    /// One-shot task prompt answered under the agent's system prompt.
    pub async fn ask(&self, prompt: String) -> Result<String> {
        let input = CallInput::prompt(prompt).with_system(self.system_prompt.clone());
        self.caller.call(&self.config, &input).await
    }

    /// Like [`ask`](Self::ask) but in JSON mode, parsed into `T`.
    pub async fn ask_json<T: DeserializeOwned>(&self, prompt: String) -> Result<T> {
        let input = CallInput::prompt(prompt)
            .with_system(self.system_prompt.clone())
            .json();
        let raw = self.caller.call(&self.config, &input).await?;
        parse_json_reply(&raw)
    }
}

fn build_system_prompt(base: &str, context: &Value) -> String {
    let mut parts = Vec::new();
    if !base.trim().is_empty() {
        parts.push(base.to_string());
    }
    if !context.is_null() {
        parts.push(format!("Context: {context}"));
    }
    parts.join("\n\n")
}

/// Parse a model's JSON reply, tolerating code fences and surrounding prose.
pub(crate) fn parse_json_reply<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let trimmed = raw.trim();
    let body = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => {
            return Err(Error::Agent(format!(
                "expected a JSON object in model reply, got: {}",
                truncate(trimmed, 120)
            )));
        }
    };
    serde_json::from_str(body).map_err(|e| Error::Agent(format!("invalid JSON in model reply: {e}")))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
