//! HTTP surface of the gate.
//!
//! All bodies are JSON. A DENY or STOP decision is a normal 200 response;
//! HTTP errors are reserved for malformed input (400), missing entities
//! (404), and unexpected faults (500, recovered by the catch-panic layer so
//! a broken handler never takes the daemon down).

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use ctrldot_core::DAEMON_VERSION;
use ctrldot_core::domain::{ActionProposal, AgentMode};
use ctrldot_core::service::ServiceError;

use crate::state::AppState;

/// Request-level error taxonomy mapped onto HTTP statuses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed input.
    Validation(String),
    /// Entity missing.
    NotFound(String),
    /// Unexpected fault.
    Internal(String),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Validation(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Internal(message) => {
                error!(error = %message, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            },
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Builds the daemon router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/capabilities", get(capabilities))
        .route("/v1/agents/register", post(register_agent))
        .route("/v1/agents", get(list_agents))
        .route("/v1/agents/:agent_id", get(get_agent))
        .route("/v1/agents/:agent_id/halt", post(halt_agent))
        .route("/v1/agents/:agent_id/resume", post(resume_agent))
        .route("/v1/agents/:agent_id/limits", get(agent_limits))
        .route("/v1/sessions/start", post(start_session))
        .route("/v1/sessions/:session_id/end", post(end_session))
        .route("/v1/actions/propose", post(propose_action))
        .route("/v1/events", get(list_events))
        .route("/v1/panic", get(panic_status))
        .route("/v1/panic/on", post(panic_on))
        .route("/v1/panic/off", post(panic_off))
        .route("/v1/autobundle", get(autobundle_status))
        .route("/v1/autobundle/test", post(autobundle_test))
        .route("/v1/limits/config", get(limits_config))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "version": DAEMON_VERSION }))
}

async fn capabilities(State(state): State<AppState>) -> Result<Response, ApiError> {
    let caps = state.service.get_capabilities(DAEMON_VERSION)?;
    Ok(Json(caps).into_response())
}

#[derive(Debug, Deserialize)]
struct RegisterAgentRequest {
    agent_id: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    default_mode: Option<AgentMode>,
}

async fn register_agent(
    State(state): State<AppState>,
    Json(req): Json<RegisterAgentRequest>,
) -> Result<Response, ApiError> {
    if req.agent_id.is_empty() {
        return Err(ApiError::Validation("agent_id is required".to_string()));
    }
    let agent = state
        .service
        .register_agent(&req.agent_id, &req.display_name, req.default_mode)?;
    Ok(Json(agent).into_response())
}

async fn list_agents(State(state): State<AppState>) -> Result<Response, ApiError> {
    let agents = state.service.list_agents()?;
    Ok(Json(agents).into_response())
}

async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.service.get_agent(&agent_id)? {
        Some(agent) => Ok(Json(agent).into_response()),
        None => Err(ApiError::NotFound("Agent not found".to_string())),
    }
}

#[derive(Debug, Default, Deserialize)]
struct HaltRequest {
    #[serde(default)]
    reason: String,
}

async fn halt_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    body: Option<Json<HaltRequest>>,
) -> Result<Response, ApiError> {
    let mut reason = body.map(|Json(b)| b.reason).unwrap_or_default();
    if reason.is_empty() {
        reason = "Halted via API".to_string();
    }
    state.service.halt_agent(&agent_id, &reason)?;
    Ok(Json(json!({ "status": "halted" })).into_response())
}

async fn resume_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Response, ApiError> {
    state.service.resume_agent(&agent_id)?;
    Ok(Json(json!({ "status": "resumed" })).into_response())
}

async fn agent_limits(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Response, ApiError> {
    let limits = state.service.get_agent_limits(&agent_id)?;
    Ok(Json(limits).into_response())
}

#[derive(Debug, Deserialize)]
struct StartSessionRequest {
    agent_id: String,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSessionRequest>,
) -> Result<Response, ApiError> {
    if req.agent_id.is_empty() {
        return Err(ApiError::Validation("agent_id is required".to_string()));
    }
    let session = state.service.start_session(&req.agent_id, req.metadata)?;
    Ok(Json(session).into_response())
}

async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    state.service.end_session(&session_id)?;
    Ok(Json(json!({ "status": "ended" })).into_response())
}

async fn propose_action(
    State(state): State<AppState>,
    Json(proposal): Json<ActionProposal>,
) -> Result<Response, ApiError> {
    if proposal.agent_id.is_empty() {
        return Err(ApiError::Validation("agent_id is required".to_string()));
    }
    let decision = state.service.propose_action(&proposal).await?;
    Ok(Json(decision).into_response())
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    since_ts: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Response, ApiError> {
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(50);
    let events = state
        .service
        .get_events(query.agent_id, query.since_ts, limit)?;
    Ok(Json(events).into_response())
}

async fn panic_status(State(state): State<AppState>) -> Result<Response, ApiError> {
    let panic_state = state.service.get_panic_state()?;
    Ok(Json(panic_state).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct PanicOnRequest {
    #[serde(default)]
    ttl_seconds: i64,
    #[serde(default)]
    reason: String,
}

async fn panic_on(
    State(state): State<AppState>,
    body: Option<Json<PanicOnRequest>>,
) -> Result<Response, ApiError> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let panic_state = state.service.enable_panic(req.ttl_seconds, &req.reason)?;
    if let Some(manager) = &state.autobundle {
        match manager.maybe_bundle_on_panic_toggle(true) {
            Ok(Some(path)) => info!(path, "panic-on bundle written"),
            Ok(None) => {},
            Err(err) => error!(error = %err, "autobundle on panic_on failed"),
        }
    }
    Ok(Json(panic_state).into_response())
}

async fn panic_off(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.service.disable_panic()?;
    if let Some(manager) = &state.autobundle {
        match manager.maybe_bundle_on_panic_toggle(false) {
            Ok(Some(path)) => info!(path, "panic-off bundle written"),
            Ok(None) => {},
            Err(err) => error!(error = %err, "autobundle on panic_off failed"),
        }
    }
    Ok(Json(json!({ "enabled": false })).into_response())
}

async fn autobundle_status(State(state): State<AppState>) -> Response {
    Json(state.config.autobundle.clone()).into_response()
}

async fn autobundle_test(State(state): State<AppState>) -> Result<Response, ApiError> {
    let Some(manager) = &state.autobundle else {
        return Err(ApiError::Validation(
            "autobundle not configured".to_string(),
        ));
    };
    match manager.maybe_bundle_test() {
        Ok(Some(path)) => Ok(Json(json!({ "path": path })).into_response()),
        Ok(None) => Ok(Json(json!({ "message": "autobundle disabled" })).into_response()),
        Err(err) => Err(ApiError::Internal(err.to_string())),
    }
}

async fn limits_config(State(state): State<AppState>) -> Response {
    Json(state.service.get_limits_config()).into_response()
}
