//! LLM provider interface.
//!
//! Narrow chat-completion surface consumed by the pipeline stages and the
//! report builder. Providers are independently swappable behind
//! [`LLMProvider`].

mod anthropic;
mod error;
mod provider;
mod types;

pub use anthropic::AnthropicProvider;
pub use error::LLMError;
pub use provider::{LLMProvider, Provider};
pub use types::{ChatRequest, ChatResponse, Message, Role, Usage};
