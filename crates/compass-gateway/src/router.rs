use axum::extract::State;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::{Json, Router, middleware};
use serde_json::{Value, json};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::api;
use crate::context::{self, REQUEST_ID_HEADER, USER_ID_HEADER};
use crate::state::SharedState;

/// Build the application router with all routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = cors_layer(&state.config.gateway.cors_origins);

    let router = Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/users", post(api::login))
        .route("/api/profile", get(api::get_profile).put(api::put_profile))
        .route("/api/chat", post(api::chat))
        .route("/api/chat/followups", get(api::followups))
        .route("/api/sessions", get(api::list_sessions))
        .route("/api/sessions/{id}/messages", get(api::session_messages))
        .route("/api/sessions/{id}/summary", get(api::session_summary))
        .route("/api/plan", get(api::list_plan).post(api::accept_item))
        .route("/api/matches", get(api::matches))
        .route("/api/strategy", get(api::strategy))
        .route(
            "/api/deadlines",
            get(api::list_deadlines).post(api::add_deadline),
        )
        .route("/api/deadlines/{id}/status", put(api::update_deadline_status))
        .route(
            "/api/milestones",
            get(api::list_milestones).post(api::add_milestone),
        )
        .route(
            "/api/milestones/suggestions",
            get(api::milestone_suggestions),
        )
        .route(
            "/api/milestones/{id}/status",
            put(api::update_milestone_status),
        )
        .route("/api/reminders", get(api::reminders))
        .route("/api/reminders/{id}/sent", post(api::mark_reminder_sent))
        .route("/api/achievements", get(api::achievements))
        .route("/api/achievements/check", post(api::check_achievements))
        .route("/api/institutions", get(api::search_institutions))
        .route("/api/institutions/favorites", get(api::list_favorites))
        .route(
            "/api/institutions/{id}/favorite",
            post(api::toggle_favorite),
        )
        .route("/api/internships", get(api::list_internships))
        .route(
            "/api/internships/applications",
            get(api::list_applications),
        )
        .route(
            "/api/internships/applications/{id}",
            put(api::update_application),
        )
        .route("/api/internships/{id}/interest", post(api::mark_interested))
        .with_state(state)
        .layer(middleware::from_fn(context::request_id))
        .layer(TraceLayer::new_for_http());

    match cors {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            USER_ID_HEADER,
            REQUEST_ID_HEADER,
        ])
        .expose_headers([REQUEST_ID_HEADER]);

    if origins.iter().any(|origin| origin == "*") {
        return Some(layer.allow_origin(Any));
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    Some(layer.allow_origin(AllowOrigin::list(parsed)))
}

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<SharedState>) -> Json<Value> {
    let providers: Vec<Value> = state
        .registry
        .health_check_all()
        .await
        .into_iter()
        .map(|(id, healthy)| json!({"id": id, "healthy": healthy}))
        .collect();
    let (connections, idle) = state.db.pool_state();

    Json(json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "started_at": state.started_at,
        "agents": state.orchestrator.agent_names(),
        "providers": providers,
        "database": {"connections": connections, "idle": idle},
    }))
}
