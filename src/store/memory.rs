//! In-memory session storage.
//!
//! Used by tests and by `serve` when no sessions path is configured.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ulid::Ulid;

use super::error::{StorageError, StorageResult};
use super::file::SESSION_ID_PREFIX;
use super::{HistoryEntry, SessionStorage};

#[derive(Debug, Clone)]
struct MemoryRecord {
    #[allow(dead_code)]
    user_id: String,
    #[allow(dead_code)]
    expires_at: DateTime<Utc>,
    active: bool,
    history: Vec<HistoryEntry>,
    transcript: Option<String>,
    report: Option<String>,
    cost_units: u32,
}

/// In-memory implementation of [`SessionStorage`].
#[derive(Default)]
pub struct MemorySessionStorage {
    records: DashMap<String, MemoryRecord>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// History entries for a session (test inspection).
    pub fn history(&self, session_id: &str) -> Vec<HistoryEntry> {
        self.records
            .get(session_id)
            .map(|r| r.history.clone())
            .unwrap_or_default()
    }

    /// Closed-session transcript, if the session has been closed.
    pub fn transcript(&self, session_id: &str) -> Option<String> {
        self.records.get(session_id).and_then(|r| r.transcript.clone())
    }

    /// Closed-session report, if one was persisted.
    pub fn report(&self, session_id: &str) -> Option<String> {
        self.records.get(session_id).and_then(|r| r.report.clone())
    }

    /// Total cost units persisted at close.
    pub fn cost_units(&self, session_id: &str) -> u32 {
        self.records.get(session_id).map(|r| r.cost_units).unwrap_or(0)
    }
}

#[async_trait]
impl SessionStorage for MemorySessionStorage {
    async fn create_session(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<String> {
        let session_id = format!("{}{}", SESSION_ID_PREFIX, Ulid::new());
        self.records.insert(
            session_id.clone(),
            MemoryRecord {
                user_id: user_id.to_string(),
                expires_at,
                active: true,
                history: Vec::new(),
                transcript: None,
                report: None,
                cost_units: 0,
            },
        );
        Ok(session_id)
    }

    async fn append_history(
        &self,
        session_id: &str,
        text: &str,
        is_operator: bool,
        cost_units: u32,
    ) -> StorageResult<()> {
        let mut record = self
            .records
            .get_mut(session_id)
            .ok_or_else(|| StorageError::NotFound(session_id.to_string()))?;
        record.history.push(HistoryEntry {
            text: text.to_string(),
            is_operator,
            cost_units,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn close_session(
        &self,
        session_id: &str,
        transcript: &str,
        report: Option<&str>,
        cost_units: u32,
    ) -> StorageResult<()> {
        let mut record = self
            .records
            .get_mut(session_id)
            .ok_or_else(|| StorageError::NotFound(session_id.to_string()))?;
        record.active = false;
        record.transcript = Some(transcript.to_string());
        record.report = report.map(str::to_string);
        record.cost_units = cost_units;
        Ok(())
    }

    async fn is_session_still_active(&self, session_id: &str) -> StorageResult<bool> {
        Ok(self
            .records
            .get(session_id)
            .map(|r| r.active)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_is_visible_to_activity_check() {
        let storage = MemorySessionStorage::new();
        let id = storage
            .create_session("op1", Utc::now() + chrono::Duration::minutes(20))
            .await
            .unwrap();

        assert!(storage.is_session_still_active(&id).await.unwrap());
        storage.close_session(&id, "t", None, 5).await.unwrap();
        assert!(!storage.is_session_still_active(&id).await.unwrap());
        assert_eq!(storage.cost_units(&id), 5);
    }

    #[tokio::test]
    async fn append_to_unknown_session_is_not_found() {
        let storage = MemorySessionStorage::new();
        let err = storage
            .append_history("session_missing", "x", true, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
