//! HTTP route definitions

use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{ActionRequest, MatchError, StartMatch, StartedMatch, StateView};
use crate::http::middleware::{require_actor, require_start_secret, AuthenticatedActor};
use crate::lobby::Room;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Upper bound for plain request handling
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.client_origin);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/matches/:match_id/state", get(state_handler))
        .route("/matches/:match_id/ws", get(ws_handler))
        .route("/rooms", get(list_rooms_handler))
        .route("/rooms/:room_id", get(get_room_handler));

    // Privileged start (shared secret unless open mode)
    let start_routes = Router::new()
        .route("/matches", post(start_match_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_start_secret));

    // Actor routes (bearer credential is the actor id)
    let actor_routes = Router::new()
        .route("/matches/:match_id/queue", post(queue_action_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_actor));

    Router::new()
        .merge(public_routes)
        .merge(start_routes)
        .merge(actor_routes)
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
fn cors_layer(client_origin: &str) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if client_origin.trim() == "*" || client_origin.trim().is_empty() {
        return base.allow_origin(AllowOrigin::any());
    }

    let allowed_origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();

    base.allow_origin(allowed_origins).allow_credentials(true)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_matches: usize,
    total_matches: usize,
    open_start: bool,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_matches: state.match_registry.active_matches(),
        total_matches: state.match_registry.total_matches(),
        open_start: state.auth.is_open(),
    })
}

// ============================================================================
// Match endpoints
// ============================================================================

async fn start_match_handler(
    State(state): State<AppState>,
    payload: Result<Json<StartMatch>, JsonRejection>,
) -> Result<Json<StartedMatch>, AppError> {
    let Json(req) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    req.validate()?;

    let match_id = req.match_id.unwrap_or_else(Uuid::new_v4);
    let actor_ids = req.actors.iter().map(|a| a.id.clone()).collect();

    let started = state
        .match_registry
        .get_or_spawn(match_id)
        .start(req)
        .await?;

    state.rooms.create(Room::new(match_id, actor_ids));
    info!(match_id = %match_id, seed = started.seed, "Start request accepted");

    Ok(Json(started))
}

#[derive(Serialize)]
struct QueueResponse {
    queue_depth: usize,
}

async fn queue_action_handler(
    State(state): State<AppState>,
    Extension(actor): Extension<AuthenticatedActor>,
    Path(match_id): Path<Uuid>,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<QueueResponse>, AppError> {
    let Json(action) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let handle = state
        .match_registry
        .get(&match_id)
        .ok_or(MatchError::NotRunning)?;
    let queue_depth = handle.submit(actor.actor_id, action).await?;

    Ok(Json(QueueResponse { queue_depth }))
}

async fn state_handler(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
) -> Result<Json<StateView>, AppError> {
    let handle = state
        .match_registry
        .get(&match_id)
        .ok_or(MatchError::NotFound)?;
    let view = handle.view().await?.ok_or(MatchError::NotFound)?;
    Ok(Json(view))
}

// ============================================================================
// Room endpoints
// ============================================================================

async fn list_rooms_handler(State(state): State<AppState>) -> Json<Vec<Room>> {
    Json(state.rooms.list())
}

async fn get_room_handler(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<Room>, AppError> {
    state
        .rooms
        .get(room_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Room not found".to_string()))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<MatchError> for AppError {
    fn from(e: MatchError) -> Self {
        let msg = e.to_string();
        match e {
            MatchError::Conflict => AppError::Conflict(msg),
            MatchError::NotRunning | MatchError::Validation(_) => AppError::BadRequest(msg),
            MatchError::NotFound => AppError::NotFound(msg),
            MatchError::UnknownActor(_) => AppError::Forbidden(msg),
            MatchError::QueueFull { .. } => AppError::TooManyRequests(msg),
            MatchError::Unavailable => AppError::Internal(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
