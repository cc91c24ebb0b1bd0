pub mod achievements;
pub mod chat;
pub mod institutions;
pub mod internships;
pub mod match_store;
pub mod migrations;
pub mod plan;
pub mod pool;
pub mod timeline;
pub mod users;

pub use achievements::{
    Achievement, AchievementCheck, AchievementOutcome, AchievementProgress, AchievementStore,
};
pub use chat::{ChatSession, ChatStore};
pub use institutions::{Institution, InstitutionStore, NewInstitution};
pub use internships::{
    ApplicationStatus, InternshipApplication, InternshipProgram, InternshipStore, NewProgram,
};
pub use match_store::{MatchStore, StoredMatches};
pub use plan::{NewPlanItem, PlanItem, PlanStore};
pub use pool::Database;
pub use timeline::{
    Deadline, MAX_REMINDER_WINDOW_DAYS, Milestone, NewDeadline, NewMilestone, Reminder,
    TimelineStatus, TimelineStore,
};
pub use users::{Profile, ProfileUpdate, User, UserStore};

pub(crate) fn parse_timestamp(value: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|e| {
            tracing::warn!(
                "failed to parse timestamp '{}': {e}, falling back to now",
                value
            );
            chrono::Utc::now()
        })
}

pub(crate) fn parse_date(value: &str) -> compass_common::Result<chrono::NaiveDate> {
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| {
        compass_common::Error::Database(format!("invalid date '{value}' in database: {e}"))
    })
}

pub(crate) fn json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}
