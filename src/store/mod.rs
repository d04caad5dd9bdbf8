//! Session storage interface and backends.
//!
//! Persistence is an external collaborator; the engine consumes the narrow
//! [`SessionStorage`] trait. Two backends ship with the crate: a file-based
//! store (JSONL history plus a state marker) and an in-memory store used by
//! tests and by `serve` when no sessions path is configured.

mod error;
mod file;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use error::{StorageError, StorageResult};
pub use file::FileSessionStorage;
pub use memory::MemorySessionStorage;

/// Storage interface for session persistence.
///
/// `is_session_still_active` is the authoritative source of truth the
/// lifecycle manager re-checks before acting on watchdog triggers, so a
/// process restart cannot resurrect a closed session.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Create a session record and return its id.
    async fn create_session(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<String>;

    /// Append one history entry (operator or persona) with its cost units.
    async fn append_history(
        &self,
        session_id: &str,
        text: &str,
        is_operator: bool,
        cost_units: u32,
    ) -> StorageResult<()>;

    /// Close a session, persisting the transcript, report, and total cost.
    async fn close_session(
        &self,
        session_id: &str,
        transcript: &str,
        report: Option<&str>,
        cost_units: u32,
    ) -> StorageResult<()>;

    /// Whether the session is still open according to durable state.
    async fn is_session_still_active(&self, session_id: &str) -> StorageResult<bool>;
}

/// One persisted history entry.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HistoryEntry {
    pub text: String,
    pub is_operator: bool,
    pub cost_units: u32,
    pub at: DateTime<Utc>,
}
