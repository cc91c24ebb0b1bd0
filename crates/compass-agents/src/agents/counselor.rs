use compass_common::{ChatMessage, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

use super::AgentHandle;

pub const SUMMARY_UNAVAILABLE: &str = "Session summary unavailable";

/// The student's main point of contact.
#[derive(Clone)]
pub struct CounselorAgent {
    handle: AgentHandle,
}

#[derive(Deserialize)]
struct FollowupReply {
    #[serde(default)]
    questions: Vec<String>,
}

impl CounselorAgent {
    pub fn new(handle: AgentHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    pub async fn respond(&self, message: &str, context: &Value) -> Result<String> {
        self.handle.respond(message, context).await
    }

    /// Three questions to learn more about the student. Empty on failure.
    pub async fn generate_followup_questions(&self, context: &Value) -> Vec<String> {
        let context_text = serde_json::to_string_pretty(context).unwrap_or_default();
        let prompt = format!(
            r#"Based on the student's profile and conversation history, generate 3 relevant
follow-up questions to gather more information or provide better guidance.

Current Context:
{context_text}

Respond in JSON format:
{{
    "questions": [string, string, string]
}}"#
        );

        match self.handle.ask_json::<FollowupReply>(prompt).await {
            Ok(reply) => reply
                .questions
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .collect(),
            Err(e) => {
                error!("error generating follow-up questions: {e}");
                Vec::new()
            }
        }
    }

    /// Plain-text recap of a session. Falls back to [`SUMMARY_UNAVAILABLE`].
    pub async fn summarize_session(&self, messages: &[ChatMessage]) -> String {
        let transcript = messages
            .iter()
            .filter(|m| m.is_conversational())
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        if transcript.is_empty() {
            return SUMMARY_UNAVAILABLE.to_string();
        }

        let prompt = format!(
            r#"Summarize this counseling session, highlighting:
1. Key topics discussed
2. Advice given
3. Action items for the student
4. Areas needing follow-up

Session transcript:
{transcript}"#
        );

        match self.handle.ask(prompt).await {
            Ok(summary) if !summary.trim().is_empty() => {
                info!("summarized session with {} messages", messages.len());
                summary.trim().to_string()
            }
            Ok(_) => SUMMARY_UNAVAILABLE.to_string(),
            Err(e) => {
                error!("error summarizing session: {e}");
                SUMMARY_UNAVAILABLE.to_string()
            }
        }
    }
}
