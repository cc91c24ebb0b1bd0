use chrono::NaiveDate;
use compass_common::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use super::AgentHandle;

/// Long-range application planning: strategy, profile gaps and milestones.
#[derive(Clone)]
pub struct StrategicPlanningAgent {
    handle: AgentHandle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileGap {
    pub area: String,
    #[serde(default)]
    pub current_status: String,
    #[serde(default)]
    pub target_status: String,
    #[serde(default)]
    pub improvement_actions: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default)]
    pub timeline: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneSuggestion {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// `YYYY-MM-DD`; suggestions with an unparsable date are dropped.
    pub due_date: NaiveDate,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_priority")]
    pub priority: String,
}

#[derive(Deserialize)]
struct GapsReply {
    #[serde(default)]
    gaps: Vec<Value>,
}

#[derive(Deserialize)]
struct MilestonesReply {
    #[serde(default)]
    milestones: Vec<Value>,
}

fn default_priority() -> String {
    "medium".to_string()
}

fn default_category() -> String {
    "general".to_string()
}

impl StrategicPlanningAgent {
    pub fn new(handle: AgentHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    /// Full application strategy as a JSON object.
    pub async fn generate_strategy(&self, profile_data: &Value) -> Result<Value> {
        let prompt = format!(
            r#"Based on the student's profile, develop a comprehensive college application strategy.

Student Profile:
{profile}

Respond in JSON format:
{{
    "immediate_actions": [string],
    "short_term_goals": [string],
    "long_term_goals": [string],
    "profile_gaps": [string],
    "recommended_timeline": {{
        "next_30_days": [string],
        "next_90_days": [string],
        "next_6_months": [string],
        "next_year": [string]
    }},
    "test_prep_strategy": {{
        "recommended_tests": [string],
        "preparation_timeline": string,
        "target_scores": {{}}
    }}
}}"#,
            profile = pretty(profile_data)
        );

        let strategy: Value = self.handle.ask_json(prompt).await?;
        info!("generated application strategy");
        Ok(strategy)
    }

    /// Weak areas in the profile. Empty on failure; malformed entries are skipped.
    pub async fn identify_profile_gaps(&self, profile_data: &Value) -> Vec<ProfileGap> {
        let prompt = format!(
            r#"Analyze the student's profile and identify areas that need improvement.

Student Profile:
{profile}

Consider academic performance, extracurricular involvement, leadership,
community service, test scores and special talents.

Respond in JSON format:
{{
    "gaps": [
        {{
            "area": string,
            "current_status": string,
            "target_status": string,
            "improvement_actions": [string],
            "priority": "high" | "medium" | "low",
            "timeline": string
        }}
    ]
}}"#,
            profile = pretty(profile_data)
        );

        match self.handle.ask_json::<GapsReply>(prompt).await {
            Ok(reply) => keep_valid(reply.gaps),
            Err(e) => {
                error!("error identifying profile gaps: {e}");
                Vec::new()
            }
        }
    }

    /// Dated milestones between `today` and application season. Empty on failure.
    pub async fn recommend_milestones(
        &self,
        profile_data: &Value,
        today: NaiveDate,
    ) -> Vec<MilestoneSuggestion> {
        let prompt = format!(
            r#"Create a timeline of key milestones for the student's college application journey.
Today's date is {today}. Use dates in YYYY-MM-DD format, none earlier than today.

Student Profile:
{profile}

Respond in JSON format:
{{
    "milestones": [
        {{
            "title": string,
            "description": string,
            "due_date": "YYYY-MM-DD",
            "category": string,
            "priority": "high" | "medium" | "low"
        }}
    ]
}}"#,
            today = today.format("%Y-%m-%d"),
            profile = pretty(profile_data)
        );

        match self.handle.ask_json::<MilestonesReply>(prompt).await {
            Ok(reply) => {
                let mut milestones: Vec<MilestoneSuggestion> = keep_valid(reply.milestones);
                milestones.sort_by_key(|m| m.due_date);
                milestones
            }
            Err(e) => {
                error!("error recommending milestones: {e}");
                Vec::new()
            }
        }
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn keep_valid<T: DeserializeOwned>(entries: Vec<Value>) -> Vec<T> {
    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("skipping malformed entry in model reply: {e}");
                None
            }
        })
        .collect()
}
