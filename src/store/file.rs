//! File-based session storage implementation.
//!
//! Directory structure:
//! ```text
//! {sessions_dir}/
//!   {session_id}/
//!     meta.json          # Session record (user, bounds, status, totals)
//!     history.jsonl      # Append-only history log
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

use super::error::{StorageError, StorageResult};
use super::{HistoryEntry, SessionStorage};

/// Session id prefix shared with the in-memory backend.
pub(crate) const SESSION_ID_PREFIX: &str = "session_";

/// File-based implementation of [`SessionStorage`].
#[derive(Debug, Clone)]
pub struct FileSessionStorage {
    sessions_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionMeta {
    session_id: String,
    user_id: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    status: SessionMetaStatus,
    #[serde(default)]
    cost_units: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum SessionMetaStatus {
    Active,
    Closed,
}

impl FileSessionStorage {
    /// Create a new file session storage.
    ///
    /// The sessions directory is created when the first session is stored.
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(session_id)
    }

    fn meta_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("meta.json")
    }

    fn history_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("history.jsonl")
    }

    async fn load_meta(&self, session_id: &str) -> StorageResult<SessionMeta> {
        let path = self.meta_path(session_id);
        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(session_id.to_string()));
            }
            Err(e) => return Err(StorageError::file_io(&path, e)),
        };
        serde_json::from_str(&contents).map_err(StorageError::serialization)
    }

    /// Write meta atomically via a temp file rename.
    async fn save_meta(&self, meta: &SessionMeta) -> StorageResult<()> {
        let dir = self.session_dir(&meta.session_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::file_io(&dir, e))?;

        let path = self.meta_path(&meta.session_id);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(meta).map_err(StorageError::serialization)?;
        fs::write(&tmp, contents)
            .await
            .map_err(|e| StorageError::file_io(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| StorageError::file_io(&path, e))
    }

    /// Read back all history entries (used by tests and the report path).
    pub async fn load_history(&self, session_id: &str) -> StorageResult<Vec<HistoryEntry>> {
        let path = self.history_path(session_id);
        let contents = match fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(&path, e)),
        };

        let mut entries = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(line).map_err(StorageError::serialization)?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl SessionStorage for FileSessionStorage {
    async fn create_session(
        &self,
        user_id: &str,
        expires_at: DateTime<Utc>,
    ) -> StorageResult<String> {
        let session_id = format!("{}{}", SESSION_ID_PREFIX, Ulid::new());
        let meta = SessionMeta {
            session_id: session_id.clone(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            expires_at,
            status: SessionMetaStatus::Active,
            cost_units: 0,
            report: None,
            transcript: None,
            closed_at: None,
        };
        self.save_meta(&meta).await?;
        Ok(session_id)
    }

    async fn append_history(
        &self,
        session_id: &str,
        text: &str,
        is_operator: bool,
        cost_units: u32,
    ) -> StorageResult<()> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::file_io(&dir, e))?;

        let entry = HistoryEntry {
            text: text.to_string(),
            is_operator,
            cost_units,
            at: Utc::now(),
        };
        let mut line = serde_json::to_string(&entry).map_err(StorageError::serialization)?;
        line.push('\n');

        let path = self.history_path(session_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::file_io(&path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StorageError::file_io(&path, e))?;
        file.flush()
            .await
            .map_err(|e| StorageError::file_io(&path, e))
    }

    async fn close_session(
        &self,
        session_id: &str,
        transcript: &str,
        report: Option<&str>,
        cost_units: u32,
    ) -> StorageResult<()> {
        let mut meta = self.load_meta(session_id).await?;
        meta.status = SessionMetaStatus::Closed;
        meta.cost_units = cost_units;
        meta.transcript = Some(transcript.to_string());
        meta.report = report.map(str::to_string);
        meta.closed_at = Some(Utc::now());
        self.save_meta(&meta).await
    }

    async fn is_session_still_active(&self, session_id: &str) -> StorageResult<bool> {
        match self.load_meta(session_id).await {
            Ok(meta) => Ok(meta.status == SessionMetaStatus::Active),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> FileSessionStorage {
        FileSessionStorage::new(tmp.path().join("sessions"))
    }

    #[tokio::test]
    async fn create_then_close_flips_active_flag() {
        let tmp = TempDir::new().unwrap();
        let storage = store(&tmp);

        let id = storage
            .create_session("op1", Utc::now() + chrono::Duration::minutes(20))
            .await
            .unwrap();
        assert!(id.starts_with(SESSION_ID_PREFIX));
        assert!(storage.is_session_still_active(&id).await.unwrap());

        storage
            .close_session(&id, "Operator: hi\nPatient: hello", Some("report"), 42)
            .await
            .unwrap();
        assert!(!storage.is_session_still_active(&id).await.unwrap());

        let meta = storage.load_meta(&id).await.unwrap();
        assert_eq!(meta.cost_units, 42);
        assert_eq!(meta.report.as_deref(), Some("report"));
    }

    #[tokio::test]
    async fn history_appends_in_order() {
        let tmp = TempDir::new().unwrap();
        let storage = store(&tmp);
        let id = storage
            .create_session("op1", Utc::now() + chrono::Duration::minutes(20))
            .await
            .unwrap();

        storage.append_history(&id, "hello", true, 0).await.unwrap();
        storage
            .append_history(&id, "hi there", false, 17)
            .await
            .unwrap();

        let entries = storage.load_history(&id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_operator);
        assert_eq!(entries[1].text, "hi there");
        assert_eq!(entries[1].cost_units, 17);
    }

    #[tokio::test]
    async fn unknown_session_is_not_active() {
        let tmp = TempDir::new().unwrap();
        let storage = store(&tmp);
        assert!(
            !storage
                .is_session_still_active("session_missing")
                .await
                .unwrap()
        );
    }
}
