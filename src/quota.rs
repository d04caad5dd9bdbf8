//! Quota interface.
//!
//! Billing and referral bookkeeping are external collaborators; the engine
//! only needs the consume-once contract at session creation. Denial aborts
//! creation before any conversation state exists.

use async_trait::async_trait;
use dashmap::DashMap;

/// Outcome of a quota consumption attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaOutcome {
    /// A unit was consumed; the session may start.
    Granted,
    /// No units left for this user.
    Denied,
}

/// Consumes one session unit (free quota or bonus) per session start.
#[async_trait]
pub trait QuotaService: Send + Sync {
    async fn consume(&self, user_id: &str) -> QuotaOutcome;
}

/// In-memory quota counter.
///
/// Each user starts with `free_units`; bonus units can be granted at
/// runtime. Consumption is atomic per user via the map entry.
pub struct MemoryQuota {
    free_units: u32,
    remaining: DashMap<String, u32>,
}

impl MemoryQuota {
    pub fn new(free_units: u32) -> Self {
        Self {
            free_units,
            remaining: DashMap::new(),
        }
    }

    /// Grant additional units to a user.
    pub fn grant_bonus(&self, user_id: &str, units: u32) {
        *self
            .remaining
            .entry(user_id.to_string())
            .or_insert(self.free_units) += units;
    }

    /// Units left for a user (for status surfaces).
    pub fn remaining(&self, user_id: &str) -> u32 {
        self.remaining
            .get(user_id)
            .map(|r| *r)
            .unwrap_or(self.free_units)
    }
}

#[async_trait]
impl QuotaService for MemoryQuota {
    async fn consume(&self, user_id: &str) -> QuotaOutcome {
        let mut entry = self
            .remaining
            .entry(user_id.to_string())
            .or_insert(self.free_units);
        if *entry == 0 {
            return QuotaOutcome::Denied;
        }
        *entry -= 1;
        QuotaOutcome::Granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consume_exhausts_free_units() {
        let quota = MemoryQuota::new(2);
        assert_eq!(quota.consume("op1").await, QuotaOutcome::Granted);
        assert_eq!(quota.consume("op1").await, QuotaOutcome::Granted);
        assert_eq!(quota.consume("op1").await, QuotaOutcome::Denied);
        // Other users are unaffected.
        assert_eq!(quota.consume("op2").await, QuotaOutcome::Granted);
    }

    #[tokio::test]
    async fn bonus_units_extend_quota() {
        let quota = MemoryQuota::new(0);
        assert_eq!(quota.consume("op1").await, QuotaOutcome::Denied);
        quota.grant_bonus("op1", 1);
        assert_eq!(quota.consume("op1").await, QuotaOutcome::Granted);
        assert_eq!(quota.consume("op1").await, QuotaOutcome::Denied);
    }
}
