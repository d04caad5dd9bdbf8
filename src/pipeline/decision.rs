//! Decision stage: pick the conversational strategy for this turn.

use tracing::warn;

use crate::pipeline::stage::StageRuntime;

const DECISION_TEMPERATURE: f32 = 0.2;

const DECISION_SYSTEM: &str = "\
You select the patient's next conversational move. Reply with exactly one \
of these labels and nothing else:\n\
respond, escalate, self_report, remain_silent, disengage, deflect, open_up";

/// Closed strategy vocabulary. Anything the model says outside this set
/// falls back to [`Strategy::Respond`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Respond,
    Escalate,
    SelfReport,
    RemainSilent,
    Disengage,
    Deflect,
    OpenUp,
}

impl Strategy {
    pub fn label(self) -> &'static str {
        match self {
            Strategy::Respond => "respond",
            Strategy::Escalate => "escalate",
            Strategy::SelfReport => "self_report",
            Strategy::RemainSilent => "remain_silent",
            Strategy::Disengage => "disengage",
            Strategy::Deflect => "deflect",
            Strategy::OpenUp => "open_up",
        }
    }

    /// Tolerant parse: case-insensitive, ignores markdown emphasis,
    /// quotes and surrounding punctuation, accepts space or hyphen for
    /// the underscore. Out-of-vocabulary input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let cleaned: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '*' | '_' | '`' | '"' | '\'' | '.' | '!' | ':'))
            .collect::<String>()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        match cleaned.replace('-', " ").as_str() {
            "respond" => Some(Strategy::Respond),
            "escalate" => Some(Strategy::Escalate),
            "self report" | "selfreport" => Some(Strategy::SelfReport),
            "remain silent" | "remainsilent" | "silent" => Some(Strategy::RemainSilent),
            "disengage" => Some(Strategy::Disengage),
            "deflect" => Some(Strategy::Deflect),
            "open up" | "openup" => Some(Strategy::OpenUp),
            _ => None,
        }
    }
}

/// Choose a strategy from the conversation so far. Never fails: model
/// errors, timeouts and unparseable output all fall back to `Respond`.
pub(super) async fn decide(
    runtime: &StageRuntime,
    context: &str,
    recent_decisions: &[String],
) -> (Strategy, u32) {
    let user = format!(
        "Conversation so far:\n{context}\n\nYour recent moves (oldest first): {}\n\nLabel:",
        recent_decisions.join(", ")
    );

    match runtime.complete(DECISION_SYSTEM, &user, DECISION_TEMPERATURE).await {
        Ok(call) => match Strategy::parse(&call.text) {
            Some(strategy) => (strategy, call.cost_units),
            None => {
                warn!(output = %call.text, "decision output out of vocabulary, responding");
                (Strategy::Respond, call.cost_units)
            }
        },
        Err(err) => {
            warn!(error = %err, "decision stage failed, responding");
            (Strategy::Respond, 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_plain_labels() {
        assert_eq!(Strategy::parse("respond"), Some(Strategy::Respond));
        assert_eq!(Strategy::parse("remain_silent"), Some(Strategy::RemainSilent));
        assert_eq!(Strategy::parse("open_up"), Some(Strategy::OpenUp));
    }

    #[test]
    fn parse_tolerates_case_and_emphasis() {
        assert_eq!(Strategy::parse("**Escalate**"), Some(Strategy::Escalate));
        assert_eq!(Strategy::parse(" SELF-REPORT. "), Some(Strategy::SelfReport));
        assert_eq!(Strategy::parse("\"Deflect\""), Some(Strategy::Deflect));
        assert_eq!(Strategy::parse("Remain Silent!"), Some(Strategy::RemainSilent));
    }

    #[test]
    fn parse_rejects_out_of_vocabulary() {
        assert_eq!(Strategy::parse("maybe"), None);
        assert_eq!(Strategy::parse("respond cautiously"), None);
        assert_eq!(Strategy::parse(""), None);
    }
}
