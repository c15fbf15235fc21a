//! Prompt templates for auxiliary LLM passes: voice direction, image prompts, video action.

pub mod image;
pub mod video;
pub mod voice_direction;

pub use image::{
    extract_delimited_prompt, extract_ethnicity, image_prompt_request, ImagePromptMode,
    IMAGE_PROMPT_SYSTEM,
};
pub use video::{video_action_prompt, video_prompt_from_reply, VIDEO_ACTION_FALLBACK, VIDEO_ACTION_SYSTEM};
pub use voice_direction::{clean_directed_text, VOICE_DIRECTION_SYSTEM};

/// Strip whitespace and one layer of wrapping quotes an LLM likes to add around a prompt.
pub fn strip_wrapping_quotes(text: &str) -> &str {
    let t = text.trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”'), ('`', '`')] {
        if t.len() >= 2 && t.starts_with(open) && t.ends_with(close) {
            return t[open.len_utf8()..t.len() - close.len_utf8()].trim();
        }
    }
    t
}
