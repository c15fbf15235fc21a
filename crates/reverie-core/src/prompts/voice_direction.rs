//! Voice direction: ask the auxiliary model to sprinkle bracketed delivery tags into dialogue
//! before it goes to the speech backend.

use super::strip_wrapping_quotes;

/// System instruction for the voice-direction pass. The user message is the bare dialogue.
pub const VOICE_DIRECTION_SYSTEM: &str = r#"You are a voice director preparing lines for an expressive text-to-speech engine.
Rewrite the dialogue you are given, inserting bracketed delivery tags where they fit the emotion, for example [laughter], [sighs], [whispering], [shouting], [clears throat], [giggles].

Rules:
- Keep the spoken words essentially unchanged; only add tags.
- Place each tag right before the words it colours.
- Do not add narration, stage directions in asterisks, or commentary.

Return ONLY the rewritten dialogue."#;

/// Tidy the model's reply: drop wrapping quotes and a leading "Here is ..." preamble line.
pub fn clean_directed_text(reply: &str) -> String {
    let trimmed = reply.trim();
    let body = match trimmed.split_once('\n') {
        Some((first, rest))
            if first.to_ascii_lowercase().starts_with("here is")
                || first.to_ascii_lowercase().starts_with("here's") =>
        {
            rest
        }
        _ => trimmed,
    };
    strip_wrapping_quotes(body).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_and_quotes_removed() {
        assert_eq!(
            clean_directed_text("Here is the rewritten text:\n\"[sighs] I'm fine.\""),
            "[sighs] I'm fine."
        );
        assert_eq!(clean_directed_text("[laughter] Sure!"), "[laughter] Sure!");
    }
}
