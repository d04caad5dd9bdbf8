//! Salter stage: turn the chosen strategy into a private steering
//! instruction for the responder. The instruction is never shown to the
//! operator.

use tracing::warn;

use crate::pipeline::decision::Strategy;
use crate::pipeline::stage::StageRuntime;

const SALTER_TEMPERATURE: f32 = 0.7;

const SALTER_SYSTEM: &str = "\
You write a short private instruction telling a simulated patient how to \
shape their next reply. One or two sentences, imperative voice, no \
preamble.";

fn strategy_hint(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::Respond => "Answer naturally, staying in character.",
        Strategy::Escalate => "Let distress or frustration rise noticeably.",
        Strategy::SelfReport => "Volunteer a concrete symptom or feeling unprompted.",
        Strategy::Deflect => "Avoid the question, change the subject or give a vague answer.",
        Strategy::OpenUp => "Lower your guard and share something you were holding back.",
        Strategy::Disengage => "Wind the conversation down and say goodbye in character.",
        // Short-circuited before the salter runs; kept for completeness.
        Strategy::RemainSilent => "Say nothing.",
    }
}

/// Produce the steering instruction. Never fails: on error the responder
/// gets an empty instruction and replies as-is.
pub(super) async fn steer(
    runtime: &StageRuntime,
    strategy: Strategy,
    recent_decisions: &[String],
    context: &str,
) -> (String, u32) {
    let user = format!(
        "Strategy: {} ({})\nRecent moves: {}\n\nConversation so far:\n{context}\n\nInstruction:",
        strategy.label(),
        strategy_hint(strategy),
        recent_decisions.join(", ")
    );

    match runtime.complete(SALTER_SYSTEM, &user, SALTER_TEMPERATURE).await {
        Ok(call) => (call.text, call.cost_units),
        Err(err) => {
            warn!(error = %err, "salter stage failed, using empty instruction");
            (String::new(), 0)
        }
    }
}
