//! Per-session turn serialization with a bounded wait.
//!
//! At most one turn runs against a session at a time. Callers wait up to
//! a configured bound for the lock; on timeout the engine logs and
//! proceeds anyway rather than stalling the operator, accepting that two
//! turns may briefly interleave. Session data stays consistent because
//! all state mutation happens under the separate short-lived state mutex.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::error;

#[derive(Debug, Clone)]
pub struct SessionLock {
    inner: Arc<Mutex<()>>,
    max_wait: Duration,
}

impl SessionLock {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
            max_wait,
        }
    }

    /// Acquire the turn lock, waiting at most the configured bound.
    ///
    /// Returns `None` when the wait elapses; the caller should proceed
    /// without serialization rather than fail the turn.
    pub async fn acquire(&self, session_id: &str) -> Option<OwnedMutexGuard<()>> {
        match tokio::time::timeout(self.max_wait, self.inner.clone().lock_owned()).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                error!(
                    session_id = %session_id,
                    wait_secs = self.max_wait.as_secs_f64(),
                    "session lock wait elapsed, proceeding without serialization"
                );
                None
            }
        }
    }
}
