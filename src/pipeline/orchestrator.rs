//! Turn orchestrator: runs the four stages in order against the shared
//! conversation state.

use tracing::{debug, instrument};

use crate::pipeline::decision::{self, Strategy};
use crate::pipeline::stage::StageRuntime;
use crate::pipeline::{SILENCE_MARKER, TurnError, humanizer, responder, salter};
use crate::session::state::{Speaker, StateCell};

/// What a completed turn asks the engine to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Send these parts, in order.
    Reply(Vec<String>),
    /// Send nothing.
    Silent,
    /// Send these parting parts, then end the session.
    Disengage(Vec<String>),
}

pub struct TurnPipeline {
    runtime: StageRuntime,
    persona_prompt: String,
}

impl TurnPipeline {
    pub fn new(runtime: StageRuntime, persona_prompt: impl Into<String>) -> Self {
        Self {
            runtime,
            persona_prompt: persona_prompt.into(),
        }
    }

    /// Run one full turn for the combined operator text.
    ///
    /// Stage costs are committed to the state as soon as each stage
    /// finishes; a later failure does not refund them, but it does roll
    /// the context appends of this turn back so history stays clean.
    /// Returns the outcome and the total cost units of the turn.
    #[instrument(skip_all, fields(session_id))]
    pub async fn run_turn(
        &self,
        state: &StateCell,
        operator_text: &str,
    ) -> Result<(TurnOutcome, u32), TurnError> {
        let mut turn_cost: u32 = 0;

        let (checkpoint, context, recent) = state.with(|s| {
            tracing::Span::current().record("session_id", s.session_id.as_str());
            let checkpoint = (s.context_history.len(), s.responder_window.len());
            s.push_context(Speaker::Operator, operator_text.to_string());
            (checkpoint, s.render_context(), s.recent_decisions.clone())
        });

        let (strategy, cost) = decision::decide(&self.runtime, &context, &recent).await;
        turn_cost += cost;
        debug!(strategy = strategy.label(), "strategy chosen");
        state.with(|s| {
            s.token_budget_used += cost;
            s.push_decision(strategy.label().to_string());
        });

        if strategy == Strategy::RemainSilent {
            state.with(|s| s.push_context(Speaker::Persona, SILENCE_MARKER.to_string()));
            return Ok((TurnOutcome::Silent, turn_cost));
        }

        let (instruction, cost) =
            salter::steer(&self.runtime, strategy, &recent, &context).await;
        turn_cost += cost;
        state.with(|s| s.token_budget_used += cost);

        let window = state.with(|s| s.render_window());
        let (raw_reply, cost) = match responder::respond(
            &self.runtime,
            &self.persona_prompt,
            &instruction,
            &window,
            operator_text,
        )
        .await
        {
            Ok(result) => result,
            Err(err) => {
                rollback(state, checkpoint);
                return Err(err);
            }
        };
        turn_cost += cost;
        state.with(|s| s.token_budget_used += cost);

        let (parts, cost) = match humanizer::humanize(&self.runtime, &raw_reply).await {
            Ok(result) => result,
            Err(err) => {
                rollback(state, checkpoint);
                return Err(err);
            }
        };
        turn_cost += cost;
        state.with(|s| {
            s.token_budget_used += cost;
            s.push_context(Speaker::Persona, parts.join("\n"));
        });

        let outcome = if strategy == Strategy::Disengage {
            TurnOutcome::Disengage(parts)
        } else {
            TurnOutcome::Reply(parts)
        };
        Ok((outcome, turn_cost))
    }
}

/// Drop the context entries appended during a failed turn.
fn rollback(state: &StateCell, checkpoint: (usize, usize)) {
    state.with(|s| {
        s.context_history.truncate(checkpoint.0);
        s.responder_window.truncate(checkpoint.1);
    });
}
