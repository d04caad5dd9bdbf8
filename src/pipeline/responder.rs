//! Responder stage: produce the raw in-character reply.
//!
//! The only stage with memory across turns: it reads the rolling
//! responder window kept in the conversation state. Failure here aborts
//! the turn so partial context never leaks into later turns.

use crate::pipeline::TurnError;
use crate::pipeline::stage::StageRuntime;

const RESPONDER_TEMPERATURE: f32 = 0.9;

pub(super) async fn respond(
    runtime: &StageRuntime,
    persona_prompt: &str,
    instruction: &str,
    window: &str,
    operator_text: &str,
) -> Result<(String, u32), TurnError> {
    let system = if instruction.is_empty() {
        persona_prompt.to_string()
    } else {
        format!("{persona_prompt}\n\nPrivate direction for this reply: {instruction}")
    };

    let user = format!(
        "Recent exchange:\n{window}\n\nOperator just said:\n{operator_text}\n\nReply in character:"
    );

    let call = runtime
        .complete(&system, &user, RESPONDER_TEMPERATURE)
        .await
        .map_err(TurnError::Responder)?;
    Ok((call.text, call.cost_units))
}
