//! Session lifecycle: creation, termination, finalization.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{debug, error, info, warn};

use crate::quota::QuotaOutcome;
use crate::session::engine::SessionEngine;
use crate::session::error::SessionError;
use crate::session::registry::SessionEntry;
use crate::session::state::{ConversationState, SessionPhase, TerminationReason};

/// What `terminate` found under the lock.
enum TerminateAction {
    /// Already ending or ended, nothing to do.
    Skip,
    /// A turn is running; the drain loop finalizes after it completes.
    Deferred,
    /// Finalize right away.
    Now,
}

impl SessionEngine {
    /// Open a session for a user: quota, durable record, live state,
    /// expiry watchdog. Refuses a second concurrent session per user, and
    /// a quota denial aborts before any state exists.
    pub async fn start_session(&self, user_id: &str) -> Result<String, SessionError> {
        if self.registry.find_by_user(user_id).is_some() {
            return Err(SessionError::AlreadyActive(user_id.to_string()));
        }

        if self.quota.consume(user_id).await == QuotaOutcome::Denied {
            return Err(SessionError::QuotaExhausted(user_id.to_string()));
        }

        let expires_at =
            Utc::now() + ChronoDuration::seconds(self.config.session_length.as_secs() as i64);
        let session_id = self.storage.create_session(user_id, expires_at).await?;

        let mut state = ConversationState::new(
            session_id.clone(),
            user_id.to_string(),
            expires_at,
            self.config.buffer_cap,
        );
        state.phase = SessionPhase::Active;

        let entry = Arc::new(SessionEntry::new(state, self.config.lock_wait));
        self.registry.insert(entry.clone());

        // Absolute deadline, never extended by activity.
        if let Some(engine) = self.handle() {
            let watchdog_id = session_id.clone();
            let epoch = entry.epoch();
            entry
                .expiry
                .start(self.config.session_length, async move {
                    engine.expiry_due(&watchdog_id, epoch).await;
                });
        }

        self.schedule_inactivity(&entry);

        info!(session_id = %session_id, user_id = %user_id, %expires_at, "session started");
        Ok(session_id)
    }

    /// End a session. Idempotent: repeat calls against an ending or
    /// ended session are no-ops.
    pub async fn terminate(
        &self,
        session_id: &str,
        reason: TerminationReason,
    ) -> Result<(), SessionError> {
        let entry = self
            .registry
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        let action = {
            let _guard = entry.lock.acquire(session_id).await;
            entry.state.with(|s| {
                if s.phase.is_terminal() {
                    return TerminateAction::Skip;
                }
                s.phase = SessionPhase::Ending;
                s.end_reason = Some(reason);
                if s.is_generating {
                    TerminateAction::Deferred
                } else {
                    TerminateAction::Now
                }
            })
        };

        match action {
            TerminateAction::Skip => {
                debug!(session_id = %session_id, "termination requested twice, ignoring");
            }
            TerminateAction::Deferred => {
                info!(session_id = %session_id, reason = reason.label(), "termination deferred until turn completes");
            }
            TerminateAction::Now => self.finalize(&entry, reason).await,
        }
        Ok(())
    }

    /// Terminate every live session, for graceful shutdown.
    pub async fn shutdown(&self) {
        for session_id in self.registry.session_ids() {
            if let Err(err) = self
                .terminate(&session_id, TerminationReason::OperatorEnded)
                .await
            {
                warn!(session_id = %session_id, error = %err, "shutdown termination failed");
            }
        }
    }

    /// Expiry watchdog callback.
    async fn expiry_due(&self, session_id: &str, epoch: u64) {
        let Some(entry) = self.registry.get(session_id) else {
            return;
        };
        if entry.epoch() != epoch {
            debug!(session_id = %session_id, "stale expiry timer, discarding");
            return;
        }

        // Durable state wins over the in-memory watchdog.
        match self.storage.is_session_still_active(session_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(session_id = %session_id, "session already closed in storage");
                return;
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "active-check failed, proceeding with expiry");
            }
        }

        info!(session_id = %session_id, "session length reached");
        if let Err(err) = self.terminate(session_id, TerminationReason::Expired).await {
            warn!(session_id = %session_id, error = %err, "expiry termination failed");
        }
    }

    /// Tear the session down. Runs exactly once per session; every
    /// external call is individually guarded so one failure cannot stop
    /// the teardown.
    pub(crate) async fn finalize(&self, entry: &Arc<SessionEntry>, reason: TerminationReason) {
        let session_id = entry.session_id.clone();
        let user_id = entry.user_id.clone();
        info!(session_id = %session_id, reason = reason.label(), "finalizing session");

        entry.timers.cancel_all();
        entry.expiry.cancel();
        entry.bump_epoch();

        let (transcript, cost_units) =
            entry.state.with(|s| (s.render_transcript(), s.token_budget_used));

        let report = match self.reports.build_report(&session_id, &transcript).await {
            Ok(report) => Some(report),
            Err(err) => {
                error!(session_id = %session_id, error = %err, "report generation failed");
                None
            }
        };

        if let Err(err) = self
            .storage
            .close_session(&session_id, &transcript, report.as_deref(), cost_units)
            .await
        {
            error!(session_id = %session_id, error = %err, "close_session failed");
        }

        if let Err(err) = self
            .transport
            .send_message(&user_id, "This session has ended. Thank you.")
            .await
        {
            warn!(session_id = %session_id, error = %err, "end notice failed");
        }

        entry.state.with(|s| s.phase = SessionPhase::Ended);
        self.registry.remove(&session_id);
        info!(session_id = %session_id, cost_units, "session ended");
    }
}
