//! Session management HTTP handlers.

use axum::Json;
use axum::extract::{Path as PathExtract, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::error;

use crate::api::{
    CreateSessionRequest, CreateSessionResponse, GetMessagesResponse, GetSessionResponse,
    MessageResponse, SendMessageRequest, SendMessageResponse,
};
use crate::handlers::problem_details;
use crate::server::AppState;
use crate::session::{EnqueueOutcome, SessionError, TerminationReason};

// ============================================================================
// Query Types
// ============================================================================

#[derive(Deserialize)]
pub struct GetMessagesQuery {
    /// Return only messages with a sequence number greater than this.
    after: Option<u64>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Response {
    let session_id = match state.engine.start_session(&req.user_id).await {
        Ok(id) => id,
        Err(SessionError::AlreadyActive(user_id)) => {
            return problem_details::conflict(format!(
                "user '{user_id}' already has an active session"
            ));
        }
        Err(SessionError::QuotaExhausted(user_id)) => {
            return problem_details::quota_exhausted(format!(
                "no session quota left for user '{user_id}'"
            ));
        }
        Err(e) => {
            error!(error = %e, "failed to create session");
            return problem_details::internal_error("failed to create session");
        }
    };

    state.directory.record(&session_id, &req.user_id);

    let expires_at = state
        .engine
        .registry()
        .get(&session_id)
        .map(|entry| entry.state.with(|s| s.expires_at.to_rfc3339()))
        .unwrap_or_default();

    (
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            user_id: req.user_id,
            expires_at,
        }),
    )
        .into_response()
}

/// POST /api/v1/sessions/{session_id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    PathExtract(session_id): PathExtract<String>,
    Json(req): Json<SendMessageRequest>,
) -> Response {
    match state.engine.on_operator_message(&session_id, &req.text).await {
        Ok(EnqueueOutcome::Enqueued) => (
            StatusCode::ACCEPTED,
            Json(SendMessageResponse { accepted: true }),
        )
            .into_response(),
        Ok(EnqueueOutcome::Rejected) => {
            problem_details::rate_limited("message buffer full, slow down")
        }
        Err(SessionError::NotFound(_)) => problem_details::not_found("session not found"),
        Err(SessionError::Ended(_)) => problem_details::gone("session has ended"),
        Err(e) => {
            error!(session_id = %session_id, error = %e, "failed to accept message");
            problem_details::internal_error("failed to accept message")
        }
    }
}

/// GET /api/v1/sessions/{session_id}/messages
pub async fn get_messages(
    State(state): State<AppState>,
    PathExtract(session_id): PathExtract<String>,
    Query(query): Query<GetMessagesQuery>,
) -> Response {
    let live_user = state
        .engine
        .registry()
        .get(&session_id)
        .map(|entry| entry.user_id.clone());
    let Some(user_id) = live_user
        .clone()
        .or_else(|| state.directory.user_for(&session_id))
    else {
        return problem_details::not_found("session not found");
    };

    let messages: Vec<MessageResponse> = state
        .outbox
        .messages_after(&user_id, query.after.unwrap_or(0))
        .into_iter()
        .map(|m| MessageResponse {
            seq: m.seq,
            text: m.text,
            sent_at: m.sent_at.to_rfc3339(),
        })
        .collect();

    // Once an ended session's outbox has been read empty, release it. The
    // outbox is per operator, so a newer live session keeps it untouched.
    if live_user.is_none()
        && messages.is_empty()
        && state.engine.registry().find_by_user(&user_id).is_none()
    {
        state.outbox.clear(&user_id);
        state.directory.forget(&session_id);
    }

    (StatusCode::OK, Json(GetMessagesResponse { messages })).into_response()
}

/// GET /api/v1/sessions/{session_id}
pub async fn get_session(
    State(state): State<AppState>,
    PathExtract(session_id): PathExtract<String>,
) -> Response {
    let Some(entry) = state.engine.registry().get(&session_id) else {
        return problem_details::not_found("session not found");
    };

    let response = entry.state.with(|s| GetSessionResponse {
        session_id: s.session_id.clone(),
        user_id: s.user_id.clone(),
        phase: format!("{:?}", s.phase).to_lowercase(),
        started_at: s.started_at.to_rfc3339(),
        expires_at: s.expires_at.to_rfc3339(),
        cost_units: s.token_budget_used,
    });

    (StatusCode::OK, Json(response)).into_response()
}

/// DELETE /api/v1/sessions/{session_id}
pub async fn delete_session(
    State(state): State<AppState>,
    PathExtract(session_id): PathExtract<String>,
) -> Response {
    match state
        .engine
        .terminate(&session_id, TerminationReason::OperatorEnded)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(SessionError::NotFound(_)) => problem_details::not_found("session not found"),
        Err(e) => {
            error!(session_id = %session_id, error = %e, "failed to end session");
            problem_details::internal_error("failed to end session")
        }
    }
}
