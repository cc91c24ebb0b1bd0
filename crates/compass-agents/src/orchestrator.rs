use chrono::NaiveDate;
use compass_common::{Error, MessageRole, Result};
use compass_config::AppConfig;
use compass_db::{
    AchievementStore, ChatStore, Database, NewPlanItem, PlanItem, PlanStore, UserStore,
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::actionable::{ActionableItem, ExtractOptions, MetadataPolicy, extract_with};
use crate::agents::{
    AgentHandle, CollegeResearchAgent, CounselorAgent, MilestoneSuggestion, ProfileGap,
    StrategicPlanningAgent,
};
use crate::caller::AgentCaller;
use crate::routing::{COLLEGE_RESEARCH, PRIMARY_COUNSELOR, STRATEGIC_PLANNING, route_query};

/// Messages of recent history handed to the agent as context.
pub const CONTEXT_HISTORY_LIMIT: usize = 10;

/// Who is asking, resolved once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: i64,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub session_id: i64,
    pub agent: String,
    /// Display text: tags replaced by their text, metadata removed.
    pub content: String,
    pub actionable_items: Vec<ActionableItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyReport {
    pub strategy: Value,
    pub gaps: Vec<ProfileGap>,
}

/// Routes chat turns to agents and persists the conversation.
pub struct Orchestrator {
    counselor: CounselorAgent,
    strategic: Option<StrategicPlanningAgent>,
    research: Option<CollegeResearchAgent>,
    extraction: ExtractOptions,
    users: UserStore,
    chats: ChatStore,
    achievements: AchievementStore,
    plan: PlanStore,
}

impl Orchestrator {
    /// The counselor must be configured; specialists are optional.
    pub fn new(config: &AppConfig, caller: AgentCaller, db: Database) -> Result<Self> {
        let counselor = CounselorAgent::new(AgentHandle::from_config(
            PRIMARY_COUNSELOR,
            config,
            caller.clone(),
        )?);
        let specialist = |name: &str| -> Option<AgentHandle> {
            if config.agents.contains_key(name) {
                AgentHandle::from_config(name, config, caller.clone()).ok()
            } else {
                warn!("agent '{}' is not configured; its queries stay with the counselor", name);
                None
            }
        };
        let strategic = specialist(STRATEGIC_PLANNING).map(StrategicPlanningAgent::new);
        let research = specialist(COLLEGE_RESEARCH).map(CollegeResearchAgent::new);

        let extraction = ExtractOptions {
            policy: if config.extraction.strict_metadata {
                MetadataPolicy::Strict
            } else {
                MetadataPolicy::Lenient
            },
            emphasize: config.extraction.emphasize_items,
        };

        let orchestrator = Self {
            counselor,
            strategic,
            research,
            extraction,
            users: UserStore::new(db.clone()),
            chats: ChatStore::new(db.clone()),
            achievements: AchievementStore::new(db.clone()),
            plan: PlanStore::new(db),
        };
        info!("orchestrator ready with agents: {}", orchestrator.agent_names().join(", "));
        Ok(orchestrator)
    }

    pub fn agent_names(&self) -> Vec<String> {
        let mut names = vec![PRIMARY_COUNSELOR.to_string()];
        if self.strategic.is_some() {
            names.push(STRATEGIC_PLANNING.to_string());
        }
        if self.research.is_some() {
            names.push(COLLEGE_RESEARCH.to_string());
        }
        names
    }

    pub fn extraction_options(&self) -> ExtractOptions {
        self.extraction
    }

    pub fn counselor(&self) -> &CounselorAgent {
        &self.counselor
    }

    pub fn strategic(&self) -> Option<&StrategicPlanningAgent> {
        self.strategic.as_ref()
    }

    pub fn research(&self) -> Option<&CollegeResearchAgent> {
        self.research.as_ref()
    }

    fn agent(&self, name: &str) -> Option<&AgentHandle> {
        match name {
            PRIMARY_COUNSELOR => Some(self.counselor.handle()),
            STRATEGIC_PLANNING => self.strategic.as_ref().map(|a| a.handle()),
            COLLEGE_RESEARCH => self.research.as_ref().map(|a| a.handle()),
            _ => None,
        }
    }

    /// Profile, recent conversation and achievement progress as one JSON object.
    pub fn load_context(&self, user_id: i64) -> Result<Value> {
        let profile = self.users.profile(user_id)?;
        let recent: Vec<Value> = self
            .chats
            .recent_messages_for_user(user_id, CONTEXT_HISTORY_LIMIT)?
            .into_iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        let achievements: Vec<Value> = self
            .achievements
            .user_progress(user_id)?
            .into_iter()
            .map(|p| {
                json!({
                    "name": p.achievement.name,
                    "completed": p.completed,
                    "progress": p.progress,
                })
            })
            .collect();

        Ok(json!({
            "profile": profile,
            "recent_messages": recent,
            "achievements": achievements,
            "total_points": self.achievements.total_points(user_id)?,
        }))
    }

    /// Handle one chat turn: route, answer, extract, persist.
    #[instrument(skip(self, ctx, message), fields(user_id = ctx.user_id, request_id = %ctx.request_id))]
    pub async fn process_message(
        &self,
        ctx: &RequestContext,
        session_id: Option<i64>,
        message: &str,
    ) -> Result<ChatReply> {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::Validation("Message cannot be empty".into()));
        }
        // Reject a foreign session before spending a model call on it.
        if let Some(id) = session_id {
            self.chats.session(id, ctx.user_id)?;
        }

        let context = self.load_context(ctx.user_id)?;

        let decision = route_query(
            self.counselor.handle().caller(),
            self.counselor.handle().config(),
            message,
        )
        .await;
        let agent = match decision.target() {
            Some(target) => match self.agent(&target) {
                Some(handle) => handle,
                None => {
                    warn!("routing target '{}' is not available; using counselor", target);
                    self.counselor.handle()
                }
            },
            None => self.counselor.handle(),
        };

        let raw = agent.respond(message, &context).await?;
        let extraction = extract_with(&raw, &self.extraction);

        let session = self.chats.ensure_session(ctx.user_id, session_id, message)?;
        self.chats
            .append_message(session.id, MessageRole::User, message)?;
        self.chats
            .append_message(session.id, MessageRole::Assistant, &raw)?;
        let trace = json!({"routing": decision, "agent": agent.name()});
        self.chats
            .append_message(session.id, MessageRole::Debug, &trace.to_string())?;

        info!(
            "agent '{}' answered in session {} with {} actionable items",
            agent.name(),
            session.id,
            extraction.items.len()
        );
        Ok(ChatReply {
            session_id: session.id,
            agent: agent.name().to_string(),
            content: extraction.display,
            actionable_items: extraction.items,
        })
    }

    /// Add a recommended item to the student's plan.
    pub fn accept_item(&self, user_id: i64, item: &ActionableItem) -> Result<PlanItem> {
        let plan_item = self.plan.add(
            user_id,
            &NewPlanItem {
                activity_text: item.text.clone(),
                category: item.category.clone(),
                grade_year: item.year.clone(),
                url: item.url.clone(),
                metadata: json!({"source": "chat_recommendation", "item_id": item.id}),
            },
        )?;
        info!("user {} accepted actionable item '{}'", user_id, item.id);
        Ok(plan_item)
    }

    pub async fn followup_questions(&self, user_id: i64) -> Result<Vec<String>> {
        let context = self.load_context(user_id)?;
        Ok(self.counselor.generate_followup_questions(&context).await)
    }

    /// Summary of a session the user owns.
    pub async fn summarize_session(&self, user_id: i64, session_id: i64) -> Result<String> {
        self.chats.session(session_id, user_id)?;
        let messages = self.chats.messages(session_id)?;
        Ok(self.counselor.summarize_session(&messages).await)
    }

    fn planner(&self) -> Result<&StrategicPlanningAgent> {
        self.strategic
            .as_ref()
            .ok_or_else(|| Error::Config(format!("agent '{STRATEGIC_PLANNING}' is not configured")))
    }

    pub async fn strategy(&self, user_id: i64) -> Result<StrategyReport> {
        let planner = self.planner()?;
        let profile = serde_json::to_value(self.users.profile_or_default(user_id)?)?;

        let (strategy, gaps) = tokio::join!(
            planner.generate_strategy(&profile),
            planner.identify_profile_gaps(&profile)
        );
        Ok(StrategyReport {
            strategy: strategy?,
            gaps,
        })
    }

    /// Dated milestones the planner suggests, soonest first.
    pub async fn milestone_suggestions(
        &self,
        user_id: i64,
        today: NaiveDate,
    ) -> Result<Vec<MilestoneSuggestion>> {
        let planner = self.planner()?;
        let profile = serde_json::to_value(self.users.profile_or_default(user_id)?)?;
        Ok(planner.recommend_milestones(&profile, today).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caller::ProviderRegistry;
    use crate::testing::ScriptedProvider;
    use compass_config::ProviderConfig;
    use std::sync::Arc;

    const NO_ROUTING: &str = r#"{"needs_routing": false, "target_agent": null, "reason": "general"}"#;

    struct Fixture {
        orchestrator: Orchestrator,
        db: Database,
        user_id: i64,
    }

    fn fixture(provider: ScriptedProvider, configure: impl FnOnce(&mut AppConfig)) -> Fixture {
        let mut config = AppConfig::default();
        for agent in config.agents.values_mut() {
            agent.model.provider = "mock".into();
        }
        configure(&mut config);

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

        let db = Database::in_memory().unwrap();
        db.migrate().unwrap();
        let user_id = UserStore::new(db.clone())
            .get_or_create("student@example.com", "Student")
            .unwrap()
            .id;
        let orchestrator = Orchestrator::new(&config, caller, db.clone()).unwrap();
        Fixture {
            orchestrator,
            db,
            user_id,
        }
    }

    fn ctx(user_id: i64) -> RequestContext {
        RequestContext {
            user_id,
            request_id: "req-1".into(),
        }
    }

    #[tokio::test]
    async fn chat_turn_is_extracted_and_persisted() {
        let reply = "Try <actionable id=\"1\">joining robotics club</actionable>.\n\
                     [system]\nactionable:\n[1]\ncategory: Extracurricular\nyear: 10th\nurl: none\n[/system]";
        let provider = ScriptedProvider::new("mock").reply(NO_ROUTING).reply(reply);
        let f = fixture(provider, |_| {});

        let out = f
            .orchestrator
            .process_message(&ctx(f.user_id), None, "What clubs should I join?")
            .await
            .unwrap();

        assert_eq!(out.agent, PRIMARY_COUNSELOR);
        assert_eq!(out.content, "Try joining robotics club.");
        assert_eq!(out.actionable_items.len(), 1);
        assert_eq!(out.actionable_items[0].category, "Extracurricular");

        let messages = ChatStore::new(f.db.clone()).messages(out.session_id).unwrap();
        let roles: Vec<MessageRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::User, MessageRole::Assistant, MessageRole::Debug]
        );
        assert_eq!(messages[1].content, reply);
        assert!(messages[2].content.contains("general"));
    }

    #[tokio::test]
    async fn routed_query_is_answered_by_specialist() {
        let provider = ScriptedProvider::new("mock")
            .reply(r#"{"needs_routing": true, "target_agent": "strategic planning agent", "reason": "plan"}"#)
            .reply("Here is your plan.");
        let requests = provider.requests();
        let f = fixture(provider, |config| {
            config
                .prompts
                .insert(STRATEGIC_PLANNING.into(), "You are a strategist.".into());
        });

        let out = f
            .orchestrator
            .process_message(&ctx(f.user_id), None, "Plan my junior year")
            .await
            .unwrap();

        assert_eq!(out.agent, STRATEGIC_PLANNING);
        let requests = requests.lock().unwrap();
        let system = requests[1].system.as_deref().unwrap();
        assert!(system.starts_with("You are a strategist."));
        assert!(system.contains("Context: {"));
    }

    #[tokio::test]
    async fn unknown_target_falls_back_to_counselor() {
        let provider = ScriptedProvider::new("mock")
            .reply(r#"{"needs_routing": true, "target_agent": "essay_development", "reason": "essay"}"#)
            .reply("Let's brainstorm.");
        let f = fixture(provider, |_| {});

        let out = f
            .orchestrator
            .process_message(&ctx(f.user_id), None, "Help with my essay")
            .await
            .unwrap();
        assert_eq!(out.agent, PRIMARY_COUNSELOR);
    }

    #[tokio::test]
    async fn unconfigured_specialist_falls_back_to_counselor() {
        let provider = ScriptedProvider::new("mock")
            .reply(r#"{"needs_routing": true, "target_agent": "college_research", "reason": "match"}"#)
            .reply("Consider state schools.");
        let f = fixture(provider, |config| {
            config.agents.remove(COLLEGE_RESEARCH);
        });

        assert!(f.orchestrator.research().is_none());
        let out = f
            .orchestrator
            .process_message(&ctx(f.user_id), None, "Which colleges fit me?")
            .await
            .unwrap();
        assert_eq!(out.agent, PRIMARY_COUNSELOR);
    }

    #[tokio::test]
    async fn second_turn_reuses_session() {
        let provider = ScriptedProvider::new("mock")
            .reply(NO_ROUTING)
            .reply("First answer.")
            .reply(NO_ROUTING)
            .reply("Second answer.");
        let f = fixture(provider, |_| {});

        let first = f
            .orchestrator
            .process_message(&ctx(f.user_id), None, "Hello")
            .await
            .unwrap();
        let second = f
            .orchestrator
            .process_message(&ctx(f.user_id), Some(first.session_id), "Again")
            .await
            .unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(ChatStore::new(f.db.clone()).messages(first.session_id).unwrap().len(), 6);
    }

    #[tokio::test]
    async fn foreign_session_is_rejected_before_calling_model() {
        let provider = ScriptedProvider::new("mock").otherwise(NO_ROUTING);
        let calls = provider.calls();
        let f = fixture(provider, |_| {});
        let other = UserStore::new(f.db.clone())
            .get_or_create("other@example.com", "Other")
            .unwrap();
        let session = ChatStore::new(f.db.clone())
            .create_session(other.id, "private")
            .unwrap();

        let err = f
            .orchestrator
            .process_message(&ctx(f.user_id), Some(session.id), "peek")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(calls.get(), 0);
    }

    #[tokio::test]
    async fn agent_failure_persists_nothing() {
        let provider = ScriptedProvider::new("mock")
            .reply(NO_ROUTING)
            .fail("OpenAI API error: status=400, body=bad request");
        let f = fixture(provider, |_| {});

        let err = f
            .orchestrator
            .process_message(&ctx(f.user_id), None, "Hello")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Agent(_)));
        assert!(ChatStore::new(f.db.clone()).list_sessions(f.user_id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_a_validation_error() {
        let f = fixture(ScriptedProvider::new("mock"), |_| {});
        let err = f
            .orchestrator
            .process_message(&ctx(f.user_id), None, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn accepted_item_lands_in_plan() {
        let f = fixture(ScriptedProvider::new("mock"), |_| {});
        let item = ActionableItem {
            id: "3".into(),
            text: "Volunteer at the library".into(),
            category: "Community Service".into(),
            year: "9th".into(),
            url: None,
        };

        let plan_item = f.orchestrator.accept_item(f.user_id, &item).unwrap();
        assert_eq!(plan_item.activity_text, "Volunteer at the library");
        assert_eq!(plan_item.status, "pending");
        assert_eq!(plan_item.metadata["source"], "chat_recommendation");
        assert_eq!(plan_item.metadata["item_id"], "3");
    }

    #[test]
    fn context_includes_profile_and_achievements() {
        let f = fixture(ScriptedProvider::new("mock"), |_| {});
        let context = f.orchestrator.load_context(f.user_id).unwrap();
        assert!(context["profile"].is_null());
        assert_eq!(context["achievements"].as_array().unwrap().len(), 3);
        assert_eq!(context["total_points"], 0);
    }

    #[tokio::test]
    async fn strategy_combines_plan_and_gaps() {
        let provider = ScriptedProvider::new("mock")
            .reply(r#"{"immediate_actions": ["Meet your counselor"]}"#)
            .reply(r#"{"gaps": [{"area": "Testing"}]}"#);
        let f = fixture(provider, |_| {});

        let report = f.orchestrator.strategy(f.user_id).await.unwrap();
        assert_eq!(report.strategy["immediate_actions"][0], "Meet your counselor");
        assert_eq!(report.gaps[0].area, "Testing");
    }
}
