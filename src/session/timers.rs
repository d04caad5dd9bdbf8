//! Restartable, cancellable per-session timers.
//!
//! Timer handles live in the in-memory session entry, never in persisted
//! state. Starting a timer always replaces the previous one of the same
//! kind; cancellation is idempotent. Scheduled callbacks capture the
//! session epoch at schedule time and must re-validate it at fire time —
//! the session may have been ended or replaced in between.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

/// A single restartable delayed callback slot.
#[derive(Debug)]
pub struct TimerSlot {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule `task` to run after `delay`, cancelling any previous timer.
    pub fn start<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = self.name;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trace!(timer = name, "timer fired");
            // Detach the callback: the slot only ever holds the sleeping
            // task, so a restart or cancel after the fire point cannot
            // abort a callback that is already running. Staleness of a
            // fired callback is the epoch check's job.
            tokio::spawn(task);
        });

        let mut slot = self.slot();
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Cancel the pending delay, if any.
    ///
    /// Cancelling a never-started or already-fired timer is a no-op; a
    /// callback that already fired runs to completion.
    pub fn cancel(&self) {
        if let Some(handle) = self.slot().take() {
            handle.abort();
        }
    }

    /// Whether a delay is currently pending (not yet fired or cancelled).
    pub fn is_scheduled(&self) -> bool {
        self.slot().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The two per-session timers: debounce and inactivity watchdog.
#[derive(Debug)]
pub struct TimerPair {
    /// Short debounce before the buffered messages become a turn.
    pub processing: TimerSlot,
    /// Long watchdog that synthesizes a turn when the operator goes silent.
    pub inactivity: TimerSlot,
}

impl TimerPair {
    pub fn new() -> Self {
        Self {
            processing: TimerSlot::new("processing"),
            inactivity: TimerSlot::new("inactivity"),
        }
    }

    pub fn cancel_all(&self) {
        self.processing.cancel();
        self.inactivity.cancel();
    }
}

impl Default for TimerPair {
    fn default() -> Self {
        Self::new()
    }
}
