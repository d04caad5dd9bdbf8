//! LLM provider trait.

use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;

use super::error::LLMError;
use super::types::{ChatRequest, ChatResponse};

// ============================================================================
// Provider Enum
// ============================================================================

/// Supported model providers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum Provider {
    Anthropic,
    Other(String),
}

impl Provider {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::Other(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Provider::from(s.to_string()))
    }
}

impl From<String> for Provider {
    fn from(s: String) -> Self {
        match s.as_str() {
            "anthropic" => Provider::Anthropic,
            _ => Provider::Other(s),
        }
    }
}

// ============================================================================
// LLMProvider Trait
// ============================================================================

/// Trait for LLM providers with different API formats.
///
/// Calls do not time out on their own; callers wrap them in
/// `tokio::time::timeout` so a stuck upstream cannot wedge a turn.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Make a chat completion request.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, LLMError>;
}
