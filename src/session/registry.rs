//! In-memory registry of live sessions.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use crate::session::lock::SessionLock;
use crate::session::state::{ConversationState, StateCell};
use crate::session::timers::{TimerPair, TimerSlot};

/// Everything the engine keeps in memory for one live session.
#[derive(Debug)]
pub struct SessionEntry {
    pub session_id: String,
    pub user_id: String,
    pub state: StateCell,
    pub lock: SessionLock,
    pub timers: TimerPair,
    /// Absolute session-length watchdog, armed once at creation.
    pub expiry: TimerSlot,
    /// Bumped whenever pending timer callbacks must be invalidated.
    epoch: AtomicU64,
}

impl SessionEntry {
    pub fn new(state: ConversationState, lock_wait: Duration) -> Self {
        Self {
            session_id: state.session_id.clone(),
            user_id: state.user_id.clone(),
            state: StateCell::new(state),
            lock: SessionLock::new(lock_wait),
            timers: TimerPair::new(),
            expiry: TimerSlot::new("expiry"),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Invalidate every timer callback scheduled before this call.
    pub fn bump_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: DashMap<String, Arc<SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: Arc<SessionEntry>) {
        self.entries.insert(entry.session_id.clone(), entry);
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        self.entries.get(session_id).map(|e| e.value().clone())
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        self.entries.remove(session_id).map(|(_, e)| e)
    }

    /// The live session for a user, if any. Users hold at most one.
    pub fn find_by_user(&self, user_id: &str) -> Option<Arc<SessionEntry>> {
        self.entries
            .iter()
            .find(|e| e.value().user_id == user_id)
            .map(|e| e.value().clone())
    }

    /// Ids of every live session, for shutdown sweeps.
    pub fn session_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
