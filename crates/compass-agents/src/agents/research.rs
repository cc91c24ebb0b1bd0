use async_trait::async_trait;
use compass_common::Result;
use compass_db::Profile;
use serde::Deserialize;
use tracing::{info, warn};

use super::AgentHandle;
use crate::matches::{CollegeMatch, MatchGenerator};

/// Produces college match lists for the recommendation cache.
#[derive(Clone)]
pub struct CollegeResearchAgent {
    handle: AgentHandle,
}

#[derive(Deserialize)]
struct MatchesReply {
    #[serde(default)]
    colleges: Vec<serde_json::Value>,
}

impl CollegeResearchAgent {
    pub fn new(handle: AgentHandle) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> &AgentHandle {
        &self.handle
    }
}

fn matches_prompt(profile: &Profile) -> String {
    let list = |items: &[String]| {
        if items.is_empty() {
            "none listed".to_string()
        } else {
            items.join(", ")
        }
    };
    let gpa = profile
        .gpa
        .map(|gpa| format!("{gpa:.2}"))
        .unwrap_or_else(|| "not provided".to_string());

    format!(
        r#"Based on the following student profile, suggest 5-7 colleges that would be good fits.

GPA: {gpa}
Interests: {interests}
Activities: {activities}
Target Majors: {majors}
Schools Already Considered: {schools}

Respond in JSON format:
{{
    "colleges": [
        {{
            "name": string,
            "match_score": number between 0 and 1,
            "why_good_fit": string,
            "program_strengths": [string],
            "academic_fit": string,
            "admission_stats": {{
                "acceptance_rate": number between 0 and 1,
                "gpa_range": {{"min": number, "max": number}}
            }},
            "extracurricular_matches": [string]
        }}
    ]
}}"#,
        interests = list(&profile.interests),
        activities = list(&profile.activities),
        majors = list(&profile.target_majors),
        schools = list(&profile.target_schools),
    )
}

#[async_trait]
impl MatchGenerator for CollegeResearchAgent {
    async fn generate_matches(&self, profile: &Profile) -> Result<Vec<CollegeMatch>> {
        let reply: MatchesReply = self.handle.ask_json(matches_prompt(profile)).await?;
        let total = reply.colleges.len();
        let colleges: Vec<CollegeMatch> = reply
            .colleges
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<CollegeMatch>(entry) {
                Ok(college) if !college.name.trim().is_empty() => Some(college),
                Ok(_) => None,
                Err(e) => {
                    warn!("skipping malformed college match: {e}");
                    None
                }
            })
            .collect();

        info!(
            "generated {} college matches for user {} ({} returned)",
            colleges.len(),
            profile.user_id,
            total
        );
        Ok(colleges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caller::{AgentCaller, ProviderRegistry};
    use crate::testing::ScriptedProvider;
    use compass_config::{AppConfig, ProviderConfig};
    use std::sync::Arc;

    fn researcher(provider: ScriptedProvider) -> CollegeResearchAgent {
        let mut app = AppConfig::default();
        app.agents
            .get_mut("college_research")
            .unwrap()
            .model
            .provider = "mock".into();

        let mut registry = ProviderRegistry::new();
        registry.register(
            Arc::new(provider),
            ProviderConfig {
                retry_attempts: 1,
                retry_backoff_ms: 0,
                ..ProviderConfig::default()
            },
        );
        let caller = AgentCaller::new(Arc::new(registry));
        CollegeResearchAgent::new(AgentHandle::from_config("college_research", &app, caller).unwrap())
    }

    fn profile() -> Profile {
        Profile {
            user_id: 7,
            gpa: Some(3.8),
            interests: vec!["robotics".into()],
            target_majors: vec!["Mechanical Engineering".into()],
            ..Profile::default()
        }
    }

    #[test]
    fn prompt_lists_profile_fields() {
        let prompt = matches_prompt(&profile());
        assert!(prompt.contains("GPA: 3.80"));
        assert!(prompt.contains("Interests: robotics"));
        assert!(prompt.contains("Activities: none listed"));
    }

    #[tokio::test]
    async fn parses_colleges_and_skips_unnamed() {
        let provider = ScriptedProvider::new("mock").reply(
            r#"{"colleges": [
                {"name": "Purdue University", "match_score": 0.86,
                 "admission_stats": {"acceptance_rate": 0.53, "gpa_range": {"min": 3.5, "max": 4.0}}},
                {"name": "  ", "match_score": 0.5},
                {"match_score": 0.4}
            ]}"#,
        );
        let requests = provider.requests();
        let colleges = researcher(provider).generate_matches(&profile()).await.unwrap();

        assert_eq!(colleges.len(), 1);
        assert_eq!(colleges[0].name, "Purdue University");
        assert_eq!(colleges[0].admission_stats.acceptance_rate, Some(0.53));
        assert_eq!(
            requests.lock().unwrap()[0].response_format,
            crate::providers::ResponseFormat::JsonObject
        );
    }

    #[tokio::test]
    async fn unparsable_reply_is_an_error() {
        let provider = ScriptedProvider::new("mock").reply("Here are some colleges: MIT, CMU");
        assert!(researcher(provider).generate_matches(&profile()).await.is_err());
    }
}
