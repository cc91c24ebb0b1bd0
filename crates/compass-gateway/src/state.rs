use std::sync::Arc;

use compass_agents::{AgentCaller, MatchCache, MatchGenerator, Orchestrator, ProviderRegistry};
use compass_common::Result;
use compass_config::AppConfig;
use compass_db::{
    AchievementCheck, AchievementStore, ChatStore, Database, InstitutionStore, InternshipStore,
    MatchStore, PlanStore, TimelineStore, UserStore,
};
use serde_json::json;
use tracing::warn;

/// Shared state handed to every handler.
pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub registry: Arc<ProviderRegistry>,
    pub orchestrator: Orchestrator,
    /// `None` when no college research agent is configured.
    pub matches: Option<MatchCache>,
    pub users: UserStore,
    pub chats: ChatStore,
    pub plan: PlanStore,
    pub timeline: TimelineStore,
    pub achievements: AchievementStore,
    pub institutions: InstitutionStore,
    pub internships: InternshipStore,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire stores and agents around an already migrated database.
    pub fn new(config: AppConfig, db: Database, registry: Arc<ProviderRegistry>) -> Result<Self> {
        let caller = AgentCaller::new(Arc::clone(&registry));
        let orchestrator = Orchestrator::new(&config, caller, db.clone())?;
        let matches = orchestrator.research().map(|research| {
            let generator: Arc<dyn MatchGenerator> = Arc::new(research.clone());
            MatchCache::new(MatchStore::new(db.clone()), generator)
        });

        Ok(Self {
            orchestrator,
            matches,
            users: UserStore::new(db.clone()),
            chats: ChatStore::new(db.clone()),
            plan: PlanStore::new(db.clone()),
            timeline: TimelineStore::new(db.clone()),
            achievements: AchievementStore::new(db.clone()),
            institutions: InstitutionStore::new(db.clone()),
            internships: InternshipStore::new(db.clone()),
            config,
            db,
            registry,
            started_at: chrono::Utc::now(),
        })
    }

    /// Re-evaluate achievements against the user's current activity.
    /// Failures are logged and yield no results.
    pub fn refresh_achievements(&self, user_id: i64) -> Vec<AchievementCheck> {
        let snapshot = || -> Result<serde_json::Value> {
            let profile = self.users.profile_or_default(user_id)?;
            Ok(json!({
                "profile_fields": profile.filled_fields(),
                "chat_sessions": self.chats.count_sessions(user_id)?,
                "goals_set": self.timeline.count_goals(user_id)?,
                "plan_items": self.plan.count(user_id)?,
            }))
        };

        match snapshot().and_then(|state| self.achievements.check(user_id, &state)) {
            Ok(checks) => checks,
            Err(e) => {
                warn!("achievement refresh failed for user {}: {e}", user_id);
                Vec::new()
            }
        }
    }
}
