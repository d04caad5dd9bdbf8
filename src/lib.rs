//! patsim - a simulated-patient conversation service.
//!
//! Operators chat with an LLM-driven patient persona over HTTP. Incoming
//! messages are debounced into turns, each turn runs a four-stage
//! pipeline (decision, salter, responder, humanizer), and sessions end
//! by expiry, operator request, or the persona disengaging, with a
//! closing report persisted alongside the transcript.

pub mod api;
pub mod config;
pub mod handlers;
pub mod llm;
pub mod pipeline;
pub mod quota;
pub mod report;
pub mod server;
pub mod session;
pub mod store;
pub mod transport;
