//! Bounded in-order message buffer.
//!
//! Holds raw inbound texts that have not yet been folded into a turn.
//! The buffer is only mutated under the session lock, and only drained
//! whole — a turn never sees half of what the operator typed.

/// Default cap on buffered messages per session.
pub const DEFAULT_BUFFER_CAP: usize = 5;

/// Result of attempting to enqueue a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Message was buffered.
    Enqueued,
    /// Buffer is at capacity; the caller must tell the operator to slow down.
    Rejected,
}

/// Ordered, bounded queue of inbound texts awaiting processing.
#[derive(Debug)]
pub struct MessageBuffer {
    items: Vec<String>,
    cap: usize,
}

impl MessageBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            items: Vec::new(),
            cap,
        }
    }

    /// Append a message, refusing once the cap is reached.
    ///
    /// Nothing is silently dropped: a `Rejected` outcome is surfaced to the
    /// operator as backpressure feedback.
    pub fn enqueue(&mut self, text: impl Into<String>) -> EnqueueOutcome {
        if self.items.len() >= self.cap {
            return EnqueueOutcome::Rejected;
        }
        self.items.push(text.into());
        EnqueueOutcome::Enqueued
    }

    /// Take the entire buffer contents in arrival order.
    pub fn drain_all(&mut self) -> Vec<String> {
        std::mem::take(&mut self.items)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Combine buffered messages into one turn text, newline-joined in order.
pub fn combine(messages: &[String]) -> String {
    messages.join("\n")
}
