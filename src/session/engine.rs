//! Interaction engine: message intake, debounce, turn execution.
//!
//! Operator messages land in the per-session buffer and restart a short
//! debounce timer; when it fires, the whole buffer becomes one turn.
//! Turns for a session never overlap, and messages arriving mid-turn are
//! picked up by a bounded drain loop instead of spawning another turn.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::pipeline::{TurnOutcome, TurnPipeline};
use crate::quota::QuotaService;
use crate::report::ReportBuilder;
use crate::session::buffer::{self, DEFAULT_BUFFER_CAP, EnqueueOutcome};
use crate::session::error::SessionError;
use crate::session::registry::{SessionEntry, SessionRegistry};
use crate::session::state::{SessionPhase, TerminationReason};
use crate::store::SessionStorage;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Quiet period after the last operator message before a turn starts.
    pub debounce: Duration,
    /// Operator silence before the persona nudges once on its own.
    pub inactivity: Duration,
    /// Absolute session length; `expires_at` is fixed at creation.
    pub session_length: Duration,
    pub buffer_cap: usize,
    pub lock_wait: Duration,
    /// Upper bound on back-to-back turns in one drain loop.
    pub max_drain_iterations: u32,
    pub typing_ms_per_char: u64,
    pub typing_max_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(4),
            inactivity: Duration::from_secs(90),
            session_length: Duration::from_secs(30 * 60),
            buffer_cap: DEFAULT_BUFFER_CAP,
            lock_wait: Duration::from_secs(5),
            max_drain_iterations: 8,
            typing_ms_per_char: 40,
            typing_max_ms: 4_000,
        }
    }
}

pub struct SessionEngine {
    pub(crate) registry: SessionRegistry,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) storage: Arc<dyn SessionStorage>,
    pub(crate) quota: Arc<dyn QuotaService>,
    pub(crate) reports: Arc<dyn ReportBuilder>,
    pub(crate) pipeline: TurnPipeline,
    pub(crate) config: EngineConfig,
    /// Back-reference for handing owned engine handles to spawned timers.
    self_ref: Weak<SessionEngine>,
}

/// What the drain loop decides after each turn, under the lock.
enum PostTurn {
    /// More buffered text, run another turn.
    Continue(Vec<String>),
    /// Termination was requested while generating.
    Finalize(TerminationReason),
    /// Buffer empty, loop done.
    Done,
}

impl SessionEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<dyn SessionStorage>,
        quota: Arc<dyn QuotaService>,
        reports: Arc<dyn ReportBuilder>,
        pipeline: TurnPipeline,
        config: EngineConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            registry: SessionRegistry::new(),
            transport,
            storage,
            quota,
            reports,
            pipeline,
            config,
            self_ref: self_ref.clone(),
        })
    }

    /// Owned handle for spawned callbacks. `None` only during teardown of
    /// the engine itself.
    pub(crate) fn handle(&self) -> Option<Arc<Self>> {
        self.self_ref.upgrade()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Accept one operator message into the session buffer.
    ///
    /// A rejected message (buffer full) gets a rate-limit notice over the
    /// transport and surfaces as `Ok(Rejected)` so callers can signal
    /// backpressure; it is never silently dropped on the floor.
    pub async fn on_operator_message(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<EnqueueOutcome, SessionError> {
        let entry = self
            .registry
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        let _guard = entry.lock.acquire(session_id).await;

        let (outcome, user_id) = entry.state.with(|s| {
            if s.phase.is_terminal() {
                return (None, s.user_id.clone());
            }
            let outcome = s.buffer.enqueue(text);
            if outcome == EnqueueOutcome::Enqueued {
                s.touch();
            }
            (Some(outcome), s.user_id.clone())
        });

        let Some(outcome) = outcome else {
            return Err(SessionError::Ended(session_id.to_string()));
        };

        match outcome {
            EnqueueOutcome::Enqueued => {
                debug!(session_id = %session_id, "operator message buffered");
                self.schedule_processing(&entry);
                self.schedule_inactivity(&entry);
            }
            EnqueueOutcome::Rejected => {
                warn!(session_id = %session_id, "message buffer full, rejecting");
                if let Err(err) = self
                    .transport
                    .send_message(&user_id, "You're sending messages too quickly, give them a moment to reply.")
                    .await
                {
                    warn!(session_id = %session_id, error = %err, "rate-limit notice failed");
                }
            }
        }
        Ok(outcome)
    }

    /// (Re)arm the debounce timer; the callback carries the epoch it was
    /// scheduled under.
    pub(crate) fn schedule_processing(&self, entry: &Arc<SessionEntry>) {
        let Some(engine) = self.handle() else {
            return;
        };
        let session_id = entry.session_id.clone();
        let epoch = entry.epoch();
        entry
            .timers
            .processing
            .start(self.config.debounce, async move {
                engine.process_due(&session_id, epoch).await;
            });
    }

    pub(crate) fn schedule_inactivity(&self, entry: &Arc<SessionEntry>) {
        let Some(engine) = self.handle() else {
            return;
        };
        let session_id = entry.session_id.clone();
        let epoch = entry.epoch();
        entry
            .timers
            .inactivity
            .start(self.config.inactivity, async move {
                engine.inactivity_due(&session_id, epoch).await;
            });
    }

    /// Debounce timer callback: drain the buffer and run turns.
    async fn process_due(&self, session_id: &str, epoch: u64) {
        let Some(entry) = self.registry.get(session_id) else {
            return;
        };

        let drained = {
            let _guard = entry.lock.acquire(session_id).await;

            if entry.epoch() != epoch {
                debug!(session_id = %session_id, "stale processing timer, discarding");
                return;
            }

            entry.state.with(|s| {
                if s.phase != SessionPhase::Active || s.is_generating || s.buffer.is_empty() {
                    return None;
                }
                s.is_generating = true;
                Some(s.buffer.drain_all())
            })
        };

        let Some(drained) = drained else {
            return;
        };

        self.drain_loop(&entry, drained).await;
    }

    /// Run turns until the buffer stays empty or a bound is hit. An
    /// explicit loop: a turn that finishes with more text buffered feeds
    /// the next iteration directly.
    async fn drain_loop(&self, entry: &Arc<SessionEntry>, first: Vec<String>) {
        let session_id = entry.session_id.clone();
        let user_id = entry.user_id.clone();
        let mut batch = first;

        for iteration in 0.. {
            let combined = buffer::combine(&batch);
            self.append_history(&session_id, &combined, true, 0).await;

            match self.pipeline.run_turn(&entry.state, &combined).await {
                Ok((TurnOutcome::Reply(parts), cost)) => {
                    self.append_history(&session_id, &parts.join("\n"), false, cost)
                        .await;
                    self.send_parts(&user_id, &parts).await;
                }
                Ok((TurnOutcome::Silent, cost)) => {
                    debug!(session_id = %session_id, "persona stays silent");
                    self.append_history(&session_id, crate::pipeline::SILENCE_MARKER, false, cost)
                        .await;
                }
                Ok((TurnOutcome::Disengage(parts), cost)) => {
                    self.append_history(&session_id, &parts.join("\n"), false, cost)
                        .await;
                    self.send_parts(&user_id, &parts).await;
                    entry.state.with(|s| {
                        s.phase = SessionPhase::Ending;
                        s.end_reason = Some(TerminationReason::Disengaged);
                    });
                }
                Err(err) => {
                    // Aborted turn: context was rolled back, nothing is sent.
                    error!(session_id = %session_id, error = %err, "turn aborted");
                }
            }

            let next = {
                let _guard = entry.lock.acquire(&session_id).await;
                entry.state.with(|s| {
                    // A completed turn resets the silence clock.
                    s.touch();
                    if s.phase.is_terminal() {
                        s.is_generating = false;
                        return PostTurn::Finalize(
                            s.end_reason.unwrap_or(TerminationReason::OperatorEnded),
                        );
                    }
                    if !s.buffer.is_empty() && iteration + 1 < self.config.max_drain_iterations {
                        return PostTurn::Continue(s.buffer.drain_all());
                    }
                    if !s.buffer.is_empty() {
                        warn!(
                            session_id = %session_id,
                            "drain iteration bound reached with messages still buffered"
                        );
                    }
                    s.is_generating = false;
                    PostTurn::Done
                })
            };

            match next {
                PostTurn::Continue(more) => batch = more,
                PostTurn::Finalize(reason) => {
                    self.finalize(entry, reason).await;
                    return;
                }
                PostTurn::Done => break,
            }
        }

        self.schedule_inactivity(entry);
    }

    /// Inactivity timer callback: nudge the conversation exactly once per
    /// silence window by synthesizing an operator-side pseudo-message.
    async fn inactivity_due(&self, session_id: &str, epoch: u64) {
        let Some(entry) = self.registry.get(session_id) else {
            return;
        };

        let enqueued = {
            let _guard = entry.lock.acquire(session_id).await;

            if entry.epoch() != epoch {
                debug!(session_id = %session_id, "stale inactivity timer, discarding");
                return;
            }

            entry.state.with(|s| {
                if s.phase != SessionPhase::Active || s.is_generating || !s.buffer.is_empty() {
                    return false;
                }
                let silent_secs = (Utc::now() - s.last_activity_at).num_seconds().max(0);
                let marker = format!("[operator silent for {silent_secs}s]");
                s.buffer.enqueue(marker) == EnqueueOutcome::Enqueued
            })
        };

        if enqueued {
            info!(session_id = %session_id, "operator silent, synthesizing turn");
            self.schedule_processing(&entry);
        }
    }

    /// Send reply parts in order with a typing indicator and a simulated
    /// typing delay proportional to each part's length.
    pub(crate) async fn send_parts(&self, user_id: &str, parts: &[String]) {
        for part in parts {
            if let Err(err) = self.transport.send_typing(user_id).await {
                warn!(user_id = %user_id, error = %err, "typing indicator failed");
            }

            let delay_ms = (part.chars().count() as u64 * self.config.typing_ms_per_char)
                .min(self.config.typing_max_ms);
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;

            if let Err(err) = self.transport.send_message(user_id, part).await {
                warn!(user_id = %user_id, error = %err, "message send failed");
            }
        }
    }

    /// Append a transcript entry; storage failures never fail a turn.
    pub(crate) async fn append_history(
        &self,
        session_id: &str,
        text: &str,
        is_operator: bool,
        cost_units: u32,
    ) {
        if let Err(err) = self
            .storage
            .append_history(session_id, text, is_operator, cost_units)
            .await
        {
            error!(session_id = %session_id, error = %err, "history append failed");
        }
    }
}
