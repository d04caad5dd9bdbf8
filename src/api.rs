//! Request/response types for the HTTP API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub user_id: String,
    pub expires_at: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub seq: u64,
    pub text: String,
    pub sent_at: String,
}

#[derive(Debug, Serialize)]
pub struct GetMessagesResponse {
    pub messages: Vec<MessageResponse>,
}

#[derive(Debug, Serialize)]
pub struct GetSessionResponse {
    pub session_id: String,
    pub user_id: String,
    pub phase: String,
    pub started_at: String,
    pub expires_at: String,
    pub cost_units: u32,
}
