use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use compass_agents::{
    ActionableItem, ChatReply, CollegeMatchesDocument, MilestoneSuggestion, StrategyReport,
    extract_with,
};
use compass_common::{Error, MessageRole};
use compass_db::{
    AchievementCheck, AchievementProgress, ApplicationStatus, ChatSession, Deadline, Institution,
    InternshipApplication, InternshipProgram, Milestone, NewDeadline, NewMilestone, PlanItem,
    Profile, ProfileUpdate, Reminder, TimelineStatus, User,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::context::UserContext;
use crate::error::ApiResult;
use crate::state::SharedState;

/// Default look-ahead for `/api/reminders`.
pub const DEFAULT_REMINDER_DAYS: i64 = 7;

// --- users & profile ---

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// POST /api/users: demo login: find or create a user by email.
pub async fn login(
    State(state): State<SharedState>,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Json<User>> {
    let user = state
        .users
        .get_or_create(&body.email, body.name.as_deref().unwrap_or_default())?;
    Ok(Json(user))
}

pub async fn get_profile(
    State(state): State<SharedState>,
    user: UserContext,
) -> ApiResult<Json<Profile>> {
    Ok(Json(state.users.profile_or_default(user.user_id())?))
}

#[derive(Serialize)]
pub struct ProfileSaved {
    pub profile: Profile,
    pub achievements: Vec<AchievementCheck>,
}

/// PUT /api/profile: replace the profile and re-check achievements.
pub async fn put_profile(
    State(state): State<SharedState>,
    user: UserContext,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<Json<ProfileSaved>> {
    let profile = state.users.save_profile(user.user_id(), &update)?;
    let achievements = state.refresh_achievements(user.user_id());
    Ok(Json(ProfileSaved {
        profile,
        achievements,
    }))
}

// --- chat ---

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<i64>,
}

/// POST /api/chat
pub async fn chat(
    State(state): State<SharedState>,
    user: UserContext,
    Json(body): Json<ChatRequest>,
) -> ApiResult<Json<ChatReply>> {
    let reply = state
        .orchestrator
        .process_message(&user.0, body.session_id, &body.message)
        .await?;
    state.refresh_achievements(user.user_id());
    Ok(Json(reply))
}

pub async fn list_sessions(
    State(state): State<SharedState>,
    user: UserContext,
) -> ApiResult<Json<Vec<ChatSession>>> {
    Ok(Json(state.chats.list_sessions(user.user_id())?))
}

#[derive(Deserialize, Default)]
pub struct HistoryQuery {
    #[serde(default)]
    pub debug: bool,
}

#[derive(Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actionable_items: Vec<ActionableItem>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// GET /api/sessions/{id}/messages: assistant rows are re-extracted for display.
pub async fn session_messages(
    State(state): State<SharedState>,
    user: UserContext,
    Path(session_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    state.chats.session(session_id, user.user_id())?;
    let options = state.orchestrator.extraction_options();

    let entries = state
        .chats
        .messages(session_id)?
        .into_iter()
        .filter(|m| query.debug || m.is_conversational())
        .map(|m| {
            let (content, actionable_items) = match m.role {
                MessageRole::Assistant => {
                    let extraction = extract_with(&m.content, &options);
                    (extraction.display, extraction.items)
                }
                _ => (m.content, Vec::new()),
            };
            HistoryEntry {
                id: m.id,
                role: m.role,
                content,
                actionable_items,
                timestamp: m.timestamp,
            }
        })
        .collect();
    Ok(Json(entries))
}

pub async fn session_summary(
    State(state): State<SharedState>,
    user: UserContext,
    Path(session_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let summary = state
        .orchestrator
        .summarize_session(user.user_id(), session_id)
        .await?;
    Ok(Json(json!({"session_id": session_id, "summary": summary})))
}

pub async fn followups(
    State(state): State<SharedState>,
    user: UserContext,
) -> ApiResult<Json<Value>> {
    let questions = state.orchestrator.followup_questions(user.user_id()).await?;
    Ok(Json(json!({"questions": questions})))
}

// --- plan ---

pub async fn list_plan(
    State(state): State<SharedState>,
    user: UserContext,
) -> ApiResult<Json<Vec<PlanItem>>> {
    Ok(Json(state.plan.list(user.user_id())?))
}

/// POST /api/plan: accept an actionable item from a chat reply.
pub async fn accept_item(
    State(state): State<SharedState>,
    user: UserContext,
    Json(item): Json<ActionableItem>,
) -> ApiResult<(StatusCode, Json<PlanItem>)> {
    let plan_item = state.orchestrator.accept_item(user.user_id(), &item)?;
    state.refresh_achievements(user.user_id());
    Ok((StatusCode::CREATED, Json(plan_item)))
}

// --- matches & strategy ---

#[derive(Deserialize, Default)]
pub struct MatchesQuery {
    #[serde(default)]
    pub refresh: bool,
}

pub async fn matches(
    State(state): State<SharedState>,
    user: UserContext,
    Query(query): Query<MatchesQuery>,
) -> ApiResult<Json<CollegeMatchesDocument>> {
    let cache = state
        .matches
        .as_ref()
        .ok_or_else(|| Error::Config("college research agent is not configured".into()))?;
    let profile = state.users.profile(user.user_id())?.ok_or_else(|| {
        Error::Validation("Complete your profile to get college matches.".into())
    })?;

    let doc = cache.fetch(user.user_id(), &profile, query.refresh).await?;
    Ok(Json(doc))
}

pub async fn strategy(
    State(state): State<SharedState>,
    user: UserContext,
) -> ApiResult<Json<StrategyReport>> {
    Ok(Json(state.orchestrator.strategy(user.user_id()).await?))
}

// --- timeline ---

#[derive(Deserialize)]
pub struct StatusUpdate {
    pub status: TimelineStatus,
}

pub async fn list_deadlines(
    State(state): State<SharedState>,
    user: UserContext,
) -> ApiResult<Json<Vec<Deadline>>> {
    Ok(Json(state.timeline.deadlines(user.user_id())?))
}

pub async fn add_deadline(
    State(state): State<SharedState>,
    user: UserContext,
    Json(body): Json<NewDeadline>,
) -> ApiResult<(StatusCode, Json<Deadline>)> {
    let deadline = state.timeline.add_deadline(user.user_id(), &body)?;
    state.refresh_achievements(user.user_id());
    Ok((StatusCode::CREATED, Json(deadline)))
}

pub async fn update_deadline_status(
    State(state): State<SharedState>,
    user: UserContext,
    Path(deadline_id): Path<i64>,
    Json(body): Json<StatusUpdate>,
) -> ApiResult<Json<Deadline>> {
    let deadline = state
        .timeline
        .update_deadline_status(user.user_id(), deadline_id, body.status)?;
    Ok(Json(deadline))
}

pub async fn list_milestones(
    State(state): State<SharedState>,
    user: UserContext,
) -> ApiResult<Json<Vec<Milestone>>> {
    Ok(Json(state.timeline.milestones(user.user_id())?))
}

pub async fn add_milestone(
    State(state): State<SharedState>,
    user: UserContext,
    Json(body): Json<NewMilestone>,
) -> ApiResult<(StatusCode, Json<Milestone>)> {
    let milestone = state.timeline.add_milestone(user.user_id(), &body)?;
    state.refresh_achievements(user.user_id());
    Ok((StatusCode::CREATED, Json(milestone)))
}

pub async fn update_milestone_status(
    State(state): State<SharedState>,
    user: UserContext,
    Path(milestone_id): Path<i64>,
    Json(body): Json<StatusUpdate>,
) -> ApiResult<Json<Milestone>> {
    let milestone = state
        .timeline
        .update_milestone_status(user.user_id(), milestone_id, body.status)?;
    Ok(Json(milestone))
}

/// GET /api/milestones/suggestions: planner-proposed milestones, not yet saved.
pub async fn milestone_suggestions(
    State(state): State<SharedState>,
    user: UserContext,
) -> ApiResult<Json<Vec<MilestoneSuggestion>>> {
    let today = chrono::Utc::now().date_naive();
    let suggestions = state
        .orchestrator
        .milestone_suggestions(user.user_id(), today)
        .await?;
    Ok(Json(suggestions))
}

#[derive(Deserialize, Default)]
pub struct RemindersQuery {
    #[serde(default)]
    pub days: Option<i64>,
}

pub async fn reminders(
    State(state): State<SharedState>,
    user: UserContext,
    Query(query): Query<RemindersQuery>,
) -> ApiResult<Json<Vec<Reminder>>> {
    let today = chrono::Utc::now().date_naive();
    let days = query.days.unwrap_or(DEFAULT_REMINDER_DAYS);
    Ok(Json(state.timeline.upcoming_reminders(user.user_id(), today, days)?))
}

/// POST /api/reminders/{id}/sent
pub async fn mark_reminder_sent(
    State(state): State<SharedState>,
    user: UserContext,
    Path(reminder_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let marked = state.timeline.mark_reminder_sent(user.user_id(), reminder_id)?;
    if !marked {
        return Err(Error::NotFound(format!("Reminder {reminder_id}")).into());
    }
    Ok(Json(json!({"id": reminder_id, "sent": true})))
}

// --- achievements ---

#[derive(Serialize)]
pub struct AchievementsView {
    pub total_points: i64,
    pub achievements: Vec<AchievementProgress>,
}

pub async fn achievements(
    State(state): State<SharedState>,
    user: UserContext,
) -> ApiResult<Json<AchievementsView>> {
    Ok(Json(AchievementsView {
        total_points: state.achievements.total_points(user.user_id())?,
        achievements: state.achievements.user_progress(user.user_id())?,
    }))
}

/// POST /api/achievements/check: evaluate an explicit state snapshot.
pub async fn check_achievements(
    State(state): State<SharedState>,
    user: UserContext,
    Json(snapshot): Json<Value>,
) -> ApiResult<Json<Vec<AchievementCheck>>> {
    if !snapshot.is_object() {
        return Err(Error::Validation("Achievement state must be a JSON object".into()).into());
    }
    Ok(Json(state.achievements.check(user.user_id(), &snapshot)?))
}

// --- explorer ---

#[derive(Deserialize, Default)]
pub struct InstitutionQuery {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

pub async fn search_institutions(
    State(state): State<SharedState>,
    user: UserContext,
    Query(query): Query<InstitutionQuery>,
) -> ApiResult<Json<Vec<Institution>>> {
    let results = state.institutions.search(
        user.user_id(),
        query.q.as_deref(),
        query.state.as_deref(),
        query.limit,
    )?;
    Ok(Json(results))
}

pub async fn toggle_favorite(
    State(state): State<SharedState>,
    user: UserContext,
    Path(institution_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let favorite = state
        .institutions
        .toggle_favorite(user.user_id(), institution_id)?;
    Ok(Json(json!({"institution_id": institution_id, "favorite": favorite})))
}

pub async fn list_favorites(
    State(state): State<SharedState>,
    user: UserContext,
) -> ApiResult<Json<Vec<Institution>>> {
    Ok(Json(state.institutions.favorites(user.user_id())?))
}

// --- internships ---

#[derive(Deserialize, Default)]
pub struct InternshipQuery {
    #[serde(default)]
    pub subject: Option<String>,
}

pub async fn list_internships(
    State(state): State<SharedState>,
    _user: UserContext,
    Query(query): Query<InternshipQuery>,
) -> ApiResult<Json<Vec<InternshipProgram>>> {
    Ok(Json(state.internships.list_programs(query.subject.as_deref())?))
}

pub async fn mark_interested(
    State(state): State<SharedState>,
    user: UserContext,
    Path(program_id): Path<i64>,
) -> ApiResult<Json<InternshipApplication>> {
    let application = state.internships.mark_interested(user.user_id(), program_id)?;
    info!("user {} interested in program {}", user.user_id(), program_id);
    Ok(Json(application))
}

pub async fn list_applications(
    State(state): State<SharedState>,
    user: UserContext,
) -> ApiResult<Json<Vec<InternshipApplication>>> {
    Ok(Json(state.internships.list_applications(user.user_id())?))
}

#[derive(Deserialize)]
pub struct ApplicationUpdate {
    pub status: ApplicationStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn update_application(
    State(state): State<SharedState>,
    user: UserContext,
    Path(application_id): Path<i64>,
    Json(body): Json<ApplicationUpdate>,
) -> ApiResult<Json<InternshipApplication>> {
    let application = state.internships.update_application(
        user.user_id(),
        application_id,
        body.status,
        body.notes.as_deref(),
    )?;
    Ok(Json(application))
}
