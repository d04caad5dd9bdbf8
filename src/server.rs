use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use dashmap::DashMap;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::handlers;
use crate::session::SessionEngine;
use crate::transport::OutboxTransport;

// ============================================================================
// Application State
// ============================================================================

/// Session-to-operator index for outbox reads.
///
/// The registry entry disappears when a session ends, but its last
/// messages (parting words, end notice) must stay readable until the
/// operator drains them. The messages handler forgets an entry once an
/// ended session's outbox has been read empty.
#[derive(Default)]
pub struct SessionDirectory {
    entries: DashMap<String, String>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, session_id: &str, user_id: &str) {
        self.entries
            .insert(session_id.to_string(), user_id.to_string());
    }

    pub fn user_for(&self, session_id: &str) -> Option<String> {
        self.entries.get(session_id).map(|u| u.value().clone())
    }

    pub fn forget(&self, session_id: &str) {
        self.entries.remove(session_id);
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SessionEngine>,
    /// The concrete transport, so handlers can drain per-user outboxes.
    pub outbox: Arc<OutboxTransport>,
    /// Outlives registry entries so ended sessions stay readable.
    pub directory: Arc<SessionDirectory>,
}

// ============================================================================
// Server Setup
// ============================================================================

pub fn build_app(state: AppState, request_timeout_seconds: u64, max_concurrency: usize) -> Router {
    let api_routes = Router::new()
        .route("/sessions", post(handlers::v1::create_session))
        .route(
            "/sessions/{session_id}",
            get(handlers::v1::get_session).delete(handlers::v1::delete_session),
        )
        .route(
            "/sessions/{session_id}/messages",
            get(handlers::v1::get_messages).post(handlers::v1::send_message),
        )
        .with_state(state.clone())
        .layer(TimeoutLayer::new(Duration::from_secs(request_timeout_seconds)))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(ConcurrencyLimitLayer::new(max_concurrency));

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .with_state(state)
        .nest("/api/v1", api_routes)
}
