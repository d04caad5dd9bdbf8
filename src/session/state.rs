//! In-memory conversation state and its synchronized cell.
//!
//! State mutations happen in short closures under a std mutex; nothing
//! awaits while holding it. Timer handles and the turn lock live
//! elsewhere in the session entry so the state itself stays plain data.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::session::buffer::MessageBuffer;

pub const RECENT_DECISIONS_CAP: usize = 30;
pub const RESPONDER_WINDOW_CAP: usize = 40;

/// Lifecycle phase of a session.
///
/// Transitions only move forward: `Created` to `Active` to `Ending` to
/// `Ended`. Termination requests against an `Ending` or `Ended` session
/// are no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Active,
    Ending,
    Ended,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Ending | SessionPhase::Ended)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Expired,
    OperatorEnded,
    Disengaged,
}

impl TerminationReason {
    pub fn label(self) -> &'static str {
        match self {
            TerminationReason::Expired => "expired",
            TerminationReason::OperatorEnded => "operator_ended",
            TerminationReason::Disengaged => "disengaged",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Operator,
    Persona,
}

impl Speaker {
    pub fn label(self) -> &'static str {
        match self {
            Speaker::Operator => "Operator",
            Speaker::Persona => "Patient",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextEntry {
    pub speaker: Speaker,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ConversationState {
    pub session_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub phase: SessionPhase,
    pub buffer: MessageBuffer,
    /// A turn is currently running the pipeline for this session.
    pub is_generating: bool,
    pub last_activity_at: DateTime<Utc>,
    /// Full conversation so far, both speakers, in arrival order.
    pub context_history: Vec<ContextEntry>,
    /// Most recent strategy labels, oldest first, capped.
    pub recent_decisions: Vec<String>,
    /// Rolling responder exchange window, capped.
    pub responder_window: Vec<ContextEntry>,
    pub token_budget_used: u32,
    /// Set when termination is requested while a turn is in flight; the
    /// drain loop finalizes with this reason once the turn completes.
    pub end_reason: Option<TerminationReason>,
}

impl ConversationState {
    pub fn new(
        session_id: String,
        user_id: String,
        expires_at: DateTime<Utc>,
        buffer_cap: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id,
            started_at: now,
            expires_at,
            phase: SessionPhase::Created,
            buffer: MessageBuffer::new(buffer_cap),
            is_generating: false,
            last_activity_at: now,
            context_history: Vec::new(),
            recent_decisions: Vec::new(),
            responder_window: Vec::new(),
            token_budget_used: 0,
            end_reason: None,
        }
    }

    pub fn push_context(&mut self, speaker: Speaker, text: String) {
        let entry = ContextEntry {
            speaker,
            text,
            at: Utc::now(),
        };
        self.responder_window.push(entry.clone());
        if self.responder_window.len() > RESPONDER_WINDOW_CAP {
            let excess = self.responder_window.len() - RESPONDER_WINDOW_CAP;
            self.responder_window.drain(..excess);
        }
        self.context_history.push(entry);
    }

    pub fn push_decision(&mut self, label: String) {
        self.recent_decisions.push(label);
        if self.recent_decisions.len() > RECENT_DECISIONS_CAP {
            let excess = self.recent_decisions.len() - RECENT_DECISIONS_CAP;
            self.recent_decisions.drain(..excess);
        }
    }

    /// Conversation lines for prompt assembly, one speaker-labelled line each.
    pub fn render_context(&self) -> String {
        render_entries(&self.context_history)
    }

    /// Responder window rendered the same way as the full context.
    pub fn render_window(&self) -> String {
        render_entries(&self.responder_window)
    }

    /// Full transcript for the closing report.
    pub fn render_transcript(&self) -> String {
        render_entries(&self.context_history)
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }
}

fn render_entries(entries: &[ContextEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{}: {}", e.speaker.label(), e.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Synchronized wrapper around [`ConversationState`].
///
/// All access goes through [`StateCell::with`]; the closure must not
/// block or await.
#[derive(Debug)]
pub struct StateCell {
    inner: Mutex<ConversationState>,
}

impl StateCell {
    pub fn new(state: ConversationState) -> Self {
        Self {
            inner: Mutex::new(state),
        }
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut ConversationState) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;

    fn state() -> ConversationState {
        ConversationState::new(
            "session_test".into(),
            "user-1".into(),
            Utc::now() + ChronoDuration::minutes(30),
            5,
        )
    }

    #[test]
    fn new_session_starts_created() {
        let s = state();
        assert_eq!(s.phase, SessionPhase::Created);
        assert!(!s.is_generating);
        assert!(s.context_history.is_empty());
    }

    #[test]
    fn context_renders_labelled_lines() {
        let mut s = state();
        s.push_context(Speaker::Operator, "hello".into());
        s.push_context(Speaker::Persona, "hi there".into());
        assert_eq!(s.render_context(), "Operator: hello\nPatient: hi there");
    }

    #[test]
    fn responder_window_is_capped() {
        let mut s = state();
        for i in 0..RESPONDER_WINDOW_CAP + 10 {
            s.push_context(Speaker::Operator, format!("m{i}"));
        }
        assert_eq!(s.responder_window.len(), RESPONDER_WINDOW_CAP);
        assert_eq!(s.responder_window[0].text, "m10");
        // Full history keeps everything.
        assert_eq!(s.context_history.len(), RESPONDER_WINDOW_CAP + 10);
    }

    #[test]
    fn recent_decisions_are_capped() {
        let mut s = state();
        for i in 0..RECENT_DECISIONS_CAP + 5 {
            s.push_decision(format!("d{i}"));
        }
        assert_eq!(s.recent_decisions.len(), RECENT_DECISIONS_CAP);
        assert_eq!(s.recent_decisions[0], "d5");
    }

    #[test]
    fn state_cell_runs_closures() {
        let cell = StateCell::new(state());
        cell.with(|s| s.phase = SessionPhase::Active);
        assert_eq!(cell.with(|s| s.phase), SessionPhase::Active);
    }
}
