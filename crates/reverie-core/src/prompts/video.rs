//! Video action prompt: one sentence on what the character is doing, built from the last few
//! transcript messages.

use super::strip_wrapping_quotes;
use crate::session::TranscriptEntry;

pub const VIDEO_ACTION_SYSTEM: &str = r#"You direct short talking-head video clips.
Read the recent conversation and describe, in ONE sentence, what the character is doing right now: her action, her facial expression and her body language.
Base it only on the conversation. No dialogue, no camera instructions, no commentary.

Output ONLY the sentence."#;

/// Used when there is no conversation yet or the auxiliary model fails.
pub const VIDEO_ACTION_FALLBACK: &str =
    "The character is talking to the camera with a relaxed expression and natural body language.";

/// User message for the video action pass.
pub fn video_action_prompt(recent: &[TranscriptEntry]) -> Option<String> {
    if recent.is_empty() {
        return None;
    }
    let context: Vec<String> = recent
        .iter()
        .map(|e| format!("{}: {}", e.role.label(), e.content.trim()))
        .collect();
    Some(format!("Recent conversation:\n{}\n\nSentence:", context.join("\n")))
}

/// Keep the first non-empty line of the reply, unquoted, ending in a period.
pub fn video_prompt_from_reply(reply: &str) -> String {
    let line = reply
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    let line = strip_wrapping_quotes(line);
    if line.is_empty() {
        return VIDEO_ACTION_FALLBACK.to_string();
    }
    if line.ends_with(['.', '!', '?']) {
        line.to_string()
    } else {
        format!("{line}.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    #[test]
    fn prompt_lists_recent_messages() {
        let recent = vec![
            TranscriptEntry::new(Role::User, "dance for me"),
            TranscriptEntry::new(Role::Assistant, "*twirls* Like this?"),
        ];
        let prompt = video_action_prompt(&recent).unwrap();
        assert!(prompt.contains("User: dance for me"));
        assert!(prompt.contains("Assistant: *twirls* Like this?"));
        assert!(video_action_prompt(&[]).is_none());
    }

    #[test]
    fn reply_is_reduced_to_one_sentence() {
        assert_eq!(
            video_prompt_from_reply("\n\"She twirls, laughing, arms raised\"\nextra"),
            "She twirls, laughing, arms raised."
        );
        assert_eq!(video_prompt_from_reply("   "), VIDEO_ACTION_FALLBACK);
    }
}
