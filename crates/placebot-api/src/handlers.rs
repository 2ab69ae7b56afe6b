//! Route handler functions for all API endpoints.
//!
//! Each handler extracts its parameters via axum extractors, works through
//! the session registry, and returns a JSON response.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use placebot_chat::{SessionSummary, TurnStatus};
use placebot_core::types::HistoryTurn;

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Session to continue; a new one is opened when absent or expired.
    pub session_id: Option<Uuid>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SchemaResponse {
    pub schema: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: Uuid,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    pub status: TurnStatus,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: Uuid,
    pub turns: Vec<HistoryTurn>,
}

// =============================================================================
// Handler functions
// =============================================================================

/// GET /health - liveness plus session count.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_sessions: state.sessions.len(),
    })
}

/// GET /schema - the schema text prompts are built from.
pub async fn schema(State(state): State<AppState>) -> Result<Json<SchemaResponse>, ApiError> {
    let schema = state.sessions.schema().await?;
    Ok(Json(SchemaResponse { schema }))
}

/// POST /chat - answer one question, opening a session if needed.
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message cannot be empty".to_string()));
    }

    let session = state.sessions.get_or_create(body.session_id)?;
    let reply = session.submit(&body.message).await?;
    info!(session_id = %session.id(), status = ?reply.status, "Chat turn served");

    Ok(Json(ChatResponse {
        session_id: session.id(),
        answer: reply.answer,
        sql: reply.sql,
        status: reply.status,
    }))
}

/// GET /sessions - live sessions, oldest first.
pub async fn list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.sessions.list(),
    })
}

/// GET /sessions/{id}/history - every turn of one session.
pub async fn session_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let id = parse_session_id(&id)?;
    let turns = state.sessions.history(id)?;
    Ok(Json(HistoryResponse {
        session_id: id,
        turns,
    }))
}

/// DELETE /sessions/{id} - end a session and close its connection.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_session_id(&id)?;
    state.sessions.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_session_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid session id: {}", raw)))
}
