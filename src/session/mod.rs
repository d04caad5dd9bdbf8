//! Session runtime: buffering, timers, state, turn execution, lifecycle.

pub mod buffer;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod registry;
pub mod state;
pub mod timers;

pub use buffer::{EnqueueOutcome, MessageBuffer};
pub use engine::{EngineConfig, SessionEngine};
pub use error::SessionError;
pub use registry::{SessionEntry, SessionRegistry};
pub use state::{ConversationState, SessionPhase, Speaker, TerminationReason};
