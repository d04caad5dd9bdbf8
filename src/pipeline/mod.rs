//! Four-stage turn pipeline: decision, salter, responder, humanizer.

mod decision;
mod humanizer;
mod orchestrator;
mod responder;
mod salter;
mod stage;

pub use decision::Strategy;
pub use orchestrator::{TurnOutcome, TurnPipeline};
pub use stage::{StageError, StageRuntime};

/// Marker appended to the context when the persona chooses to stay quiet.
pub const SILENCE_MARKER: &str = "[remains silent]";

/// Delimiter the humanizer uses to split a reply into ordered parts.
pub const PART_DELIMITER: &str = "|||";

/// A turn failed past the point where fallbacks apply.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("responder stage failed: {0}")]
    Responder(#[source] StageError),

    #[error("humanizer stage failed: {0}")]
    Humanizer(#[source] StageError),
}
