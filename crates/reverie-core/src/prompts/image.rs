//! Image prompt shaping: ethnicity hint from the appearance descriptor, mode-specific
//! templates (selfie, POV, first person) and the `|...|` / `[...]` direct-prompt extractor.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::character::RenderingFlags;

/// Returned by [`extract_ethnicity`] when the descriptor names none.
pub const UNKNOWN_ETHNICITY: &str = "unknown ethnicity";

static ETHNICITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:\d+(?:-year-old)?[\s-]?)?(?:asian|lebanese|black|african|caucasian|white|hispanic|latino|latina|mexican|european|middle eastern|indian|native american|pacific islander|mixed race|biracial|multiracial)\b",
    )
    .expect("ethnicity regex")
});

static PIPE_PROMPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\|([^|]+)\|\s*(?:\[[^\[\]]*\]\s*)?$").expect("pipe prompt regex")
});

static BRACKET_PROMPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\[\]]+)\]\s*$").expect("bracket prompt regex"));

pub const IMAGE_PROMPT_SYSTEM: &str =
    "You write short, concrete prompts for a text-to-image diffusion model. Output only the prompt text.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagePromptMode {
    Selfie,
    Pov,
    FirstPerson,
}

impl ImagePromptMode {
    /// First-person wins over POV; neither means selfie.
    pub fn from_flags(flags: &RenderingFlags) -> Self {
        if flags.first_person_mode {
            ImagePromptMode::FirstPerson
        } else if flags.pov_mode {
            ImagePromptMode::Pov
        } else {
            ImagePromptMode::Selfie
        }
    }

    /// The identity-preserving face swap makes no sense when the character may be off-frame.
    pub fn uses_face_swap(self) -> bool {
        !matches!(self, ImagePromptMode::FirstPerson)
    }

    fn template(self) -> &'static str {
        match self {
            ImagePromptMode::Selfie => {
                r#"Write the prompt as a candid handheld phone selfie of the character:
"phone selfie of <the character, e.g. 'a 24-year-old asian woman'>, <what she is wearing, top and bottom>, <what she is doing>, <where she is>, handheld, natural light, slightly grainy, candid"
Take the setting and the pose from the scene. Prefer the end of the scene for pose and action."#
            }
            ImagePromptMode::Pov => {
                r#"Write the prompt as a cinematic first-person view of the character, seen by the viewer sitting or standing across from her:
"POV photo of <the character>, <clothing>, <expression and pose facing the viewer>, <where she is>, cinematic lighting, shallow depth of field"
Take the setting and the pose from the scene. The viewer is never in frame."#
            }
            ImagePromptMode::FirstPerson => {
                r#"Describe what the player sees with their own eyes at this exact moment of the story:
"first-person view of <the scene in front of the player>, <notable people or objects>, <lighting and mood>"
The character only appears if she is in the player's line of sight. Do not describe the player."#
            }
        }
    }
}

/// Closed-vocabulary ethnicity (with an optional age prefix) from the appearance descriptor.
pub fn extract_ethnicity(descriptor: &str) -> String {
    ETHNICITY_RE
        .find(descriptor)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_ETHNICITY.to_string())
}

/// User message for the image prompt pass.
pub fn image_prompt_request(
    mode: ImagePromptMode,
    appearance: &str,
    last_assistant: Option<&str>,
) -> String {
    let ethnicity = extract_ethnicity(appearance);
    let mut out = String::new();
    match last_assistant {
        Some(scene) if !scene.trim().is_empty() => {
            out.push_str("Scene from an ongoing roleplay:\n");
            out.push_str(scene.trim());
            out.push_str("\n\nCharacter appearance:\n");
        }
        _ => out.push_str("Character appearance:\n"),
    }
    out.push_str(appearance.trim());
    out.push_str(&format!(
        "\n\nWrite one image prompt for this moment. The character's ethnicity: {ethnicity}.\n\n"
    ));
    out.push_str(mode.template());
    out.push_str("\n\nAlways state what she is wearing and where she is. Output ONLY the prompt.");
    out
}

/// Prompt the model embedded at the end of its own message: `|...|`, else `[...]`.
pub fn extract_delimited_prompt(message: &str) -> Option<String> {
    let caps = PIPE_PROMPT_RE
        .captures(message)
        .or_else(|| BRACKET_PROMPT_RE.captures(message))?;
    let inner = caps[1].trim();
    (!inner.is_empty()).then(|| inner.to_string())
}
