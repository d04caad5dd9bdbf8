//! Outbound transport interface.
//!
//! The chat transport (delivery, formatting, inline menus) is an external
//! collaborator; the engine only needs fire-and-forget sends. Failures are
//! logged by callers, never retried here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

/// Errors from transport sends.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport send failed: {0}")]
    Send(String),
}

/// Fire-and-forget outbound message delivery.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver a text message to the operator.
    async fn send_message(&self, user_id: &str, text: &str) -> Result<(), TransportError>;

    /// Show a typing indicator to the operator.
    async fn send_typing(&self, user_id: &str) -> Result<(), TransportError>;
}

// ============================================================================
// Outbox Transport
// ============================================================================

/// A message delivered to an operator's outbox.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OutboundMessage {
    pub seq: u64,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// In-process transport that collects outbound messages per operator.
///
/// Backs the HTTP surface (operators poll their outbox) and the tests.
/// Typing indicators are counted but carry no payload.
#[derive(Default)]
pub struct OutboxTransport {
    outboxes: DashMap<String, Vec<OutboundMessage>>,
    typing_counts: DashMap<String, u64>,
}

impl OutboxTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages for an operator with `seq` greater than `after`.
    pub fn messages_after(&self, user_id: &str, after: u64) -> Vec<OutboundMessage> {
        self.outboxes
            .get(user_id)
            .map(|entry| {
                entry
                    .iter()
                    .filter(|m| m.seq > after)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of typing indicators sent to an operator.
    pub fn typing_count(&self, user_id: &str) -> u64 {
        self.typing_counts.get(user_id).map(|c| *c).unwrap_or(0)
    }

    /// Drop an operator's outbox (after session close and final read).
    pub fn clear(&self, user_id: &str) {
        self.outboxes.remove(user_id);
        self.typing_counts.remove(user_id);
    }
}

#[async_trait]
impl Transport for OutboxTransport {
    async fn send_message(&self, user_id: &str, text: &str) -> Result<(), TransportError> {
        let mut entry = self.outboxes.entry(user_id.to_string()).or_default();
        let seq = entry.last().map(|m| m.seq).unwrap_or(0) + 1;
        entry.push(OutboundMessage {
            seq,
            text: text.to_string(),
            sent_at: Utc::now(),
        });
        Ok(())
    }

    async fn send_typing(&self, user_id: &str) -> Result<(), TransportError> {
        *self.typing_counts.entry(user_id.to_string()).or_insert(0) += 1;
        Ok(())
    }
}
