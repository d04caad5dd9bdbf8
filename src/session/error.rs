//! Session error types.

use thiserror::Error;

use crate::store::StorageError;

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session not found (or already ended and cleaned up).
    #[error("session not found: {0}")]
    NotFound(String),

    /// The user already has an active session.
    #[error("user {0} already has an active session")]
    AlreadyActive(String),

    /// No quota or bonus units left for this user.
    #[error("quota exhausted for user {0}")]
    QuotaExhausted(String),

    /// The session has ended and no longer accepts messages.
    #[error("session {0} has ended")]
    Ended(String),

    /// Storage failure during an operation that cannot proceed without it.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
