//! Humanizer stage: restyle the raw reply into how a person actually
//! types, possibly split into several short messages.

use crate::pipeline::{PART_DELIMITER, TurnError};
use crate::pipeline::stage::StageRuntime;

const HUMANIZER_TEMPERATURE: f32 = 0.8;

const HUMANIZER_SYSTEM: &str = "\
Rewrite the text as casual chat messages from the same person: lowercase \
where natural, short sentences, no markdown. If it reads better as several \
messages, separate them with ||| in the order they should be sent. Output \
only the rewritten text.";

pub(super) async fn humanize(
    runtime: &StageRuntime,
    raw_reply: &str,
) -> Result<(Vec<String>, u32), TurnError> {
    let call = runtime
        .complete(HUMANIZER_SYSTEM, raw_reply, HUMANIZER_TEMPERATURE)
        .await
        .map_err(TurnError::Humanizer)?;

    let mut parts = split_parts(&call.text);
    if parts.is_empty() {
        // Styled output degenerated to nothing, fall back to the raw reply.
        parts = vec![raw_reply.to_string()];
    }
    Ok((parts, call.cost_units))
}

/// Split on the part delimiter, trimming and dropping empty fragments.
pub(super) fn split_parts(text: &str) -> Vec<String> {
    text.split(PART_DELIMITER)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_preserves_order() {
        let parts = split_parts("first ||| second ||| third");
        assert_eq!(parts, vec!["first", "second", "third"]);
    }

    #[test]
    fn split_drops_empty_fragments() {
        let parts = split_parts("|||only one||| |||");
        assert_eq!(parts, vec!["only one"]);
    }

    #[test]
    fn split_without_delimiter_is_single_part() {
        assert_eq!(split_parts("just a reply"), vec!["just a reply"]);
    }
}
