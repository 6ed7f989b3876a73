//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tokio_util::sync::CancellationToken;

use super::types::*;
use crate::ai::{TurnRequest, TurnResponse, TurnService};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Application state shared across all handlers
pub struct AppState {
    pub service: Arc<TurnService>,
    /// Shutdown token for graceful server shutdown
    pub shutdown_token: CancellationToken,
}

impl AppState {
    pub fn new(service: Arc<TurnService>) -> (Arc<Self>, CancellationToken) {
        let shutdown_token = CancellationToken::new();
        let state = Arc::new(Self {
            service,
            shutdown_token: shutdown_token.clone(),
        });
        (state, shutdown_token)
    }
}

fn not_found(session_id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::with_code(
            format!("Session '{}' not found", session_id),
            "SESSION_NOT_FOUND",
        )),
    )
}

fn internal(message: impl Into<String>) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::with_code(message, "INTERNAL")),
    )
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Run one turn in a session, creating the session on first use.
///
/// - `200 OK`: the turn response, including failed turns (their `error` is set)
/// - `400 Bad Request`: empty question or scope
/// - `409 Conflict`: a turn is already running in this session
pub async fn post_turn(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(body): Json<TurnBody>,
) -> Result<Json<TurnResponse>, ApiError> {
    if body.question.trim().is_empty() || body.scope_id.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::with_code(
                "question and scope_id must not be empty",
                "INVALID_REQUEST",
            )),
        ));
    }

    let response = state
        .service
        .run_turn(TurnRequest::new(body.question, body.scope_id, session_id))
        .await;

    if let Some(error) = &response.error {
        if error.code == "session_busy" {
            return Err((
                StatusCode::CONFLICT,
                Json(ErrorResponse::with_code(
                    response.response_text.clone(),
                    error.code.clone(),
                )),
            ));
        }
    }

    Ok(Json(response))
}

/// Last checkpointed state of a session.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    match state.service.engine().snapshot(&session_id).await {
        Ok(Some(conversation)) => Ok(Json(SessionSnapshot {
            session_id,
            state: conversation,
        })),
        Ok(None) => Err(not_found(&session_id)),
        Err(e) => Err(internal(e.to_string())),
    }
}

/// Forget a session. Deleting an unknown session is not an error.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .service
        .engine()
        .forget(&session_id)
        .await
        .map_err(|e| internal(e.to_string()))?;
    tracing::info!("Deleted session {}", session_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Store a known-good question, optionally with its SQL.
pub async fn post_known_good(
    State(state): State<Arc<AppState>>,
    Json(body): Json<KnownGoodBody>,
) -> Result<StatusCode, ApiError> {
    if body.question.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::with_code(
                "question must not be empty",
                "INVALID_REQUEST",
            )),
        ));
    }

    state
        .service
        .store_known_good(&body.question, body.sql.as_deref())
        .await
        .map_err(|e| {
            tracing::warn!("[retrieval] Failed to store known-good question: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse::with_code(e.to_string(), "STORE_FAILED")),
            )
        })?;

    Ok(StatusCode::CREATED)
}
