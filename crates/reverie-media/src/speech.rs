//! **Speech Synthesizer**: assistant text to an mp3 artifact.
//!
//! Stage A splits `*narration*` from spoken dialogue and asks the auxiliary model to add
//! bracketed delivery tags to the dialogue. Stage B posts the final text to the TTS backend
//! and writes `tts_response_<timestamp>.mp3` into the session folder. The caller registers
//! the returned path with the session; nothing here touches the transcript.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;

use reverie_core::prompts::{clean_directed_text, VOICE_DIRECTION_SYSTEM};
use reverie_core::retry::retry_with_backoff;
use reverie_core::{
    Character, ProviderRouter, RetryPolicy, ReverieError, ReverieResult, SessionSnapshot,
    VoiceParams,
};

use crate::artifact;

static NARRATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*([^*]+)\*").expect("narration regex"));

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

const ELEVENLABS_URL: &str = "https://api.elevenlabs.io/v1";

/// Dialogue and narration spans of one assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpeechParts {
    pub dialogue: String,
    pub narration: Vec<String>,
}

pub fn split_dialogue(text: &str) -> SpeechParts {
    let narration = NARRATION_RE
        .captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let spoken = NARRATION_RE.replace_all(text, " ");
    let dialogue = WHITESPACE_RE.replace_all(spoken.trim(), " ").into_owned();
    SpeechParts { dialogue, narration }
}

/// Final TTS text: directed dialogue, then the narration (asterisks dropped) when the character
/// reads it aloud.
pub fn compose_speech(dialogue: &str, narration: &[String], include_narration: bool) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if !dialogue.trim().is_empty() {
        parts.push(dialogue.trim());
    }
    if include_narration {
        parts.extend(narration.iter().map(String::as_str));
    }
    parts.join(" ")
}

/// v3 only accepts three stability levels.
pub fn quantize_v3_stability(stability: f32) -> f32 {
    if stability <= 0.25 {
        0.0
    } else if stability >= 0.75 {
        1.0
    } else {
        0.5
    }
}

/// Backend that turns text into audio bytes.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        params: &VoiceParams,
    ) -> ReverieResult<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct ElevenLabsTts {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model_id: String,
}

impl ElevenLabsTts {
    pub fn new(api_key: Option<String>, model_id: impl Into<String>) -> Self {
        Self {
            client: artifact::media_client(),
            base_url: ELEVENLABS_URL.to_string(),
            api_key,
            model_id: model_id.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    fn is_v3(&self) -> bool {
        self.model_id.contains("v3")
    }

    pub fn request_body(&self, text: &str, params: &VoiceParams) -> serde_json::Value {
        let stability = if self.is_v3() {
            quantize_v3_stability(params.stability)
        } else {
            params.stability
        };
        serde_json::json!({
            "text": text,
            "model_id": self.model_id,
            "voice_settings": {
                "stability": stability,
                "similarity_boost": params.similarity,
                "style": params.style,
            }
        })
    }
}

#[async_trait]
impl TtsBackend for ElevenLabsTts {
    fn name(&self) -> &str {
        "elevenlabs"
    }

    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        params: &VoiceParams,
    ) -> ReverieResult<Vec<u8>> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ReverieError::BackendUnavailable("ELEVENLABS_API_KEY is not set".into()))?;
        if voice_id.is_empty() {
            return Err(ReverieError::PreconditionMissing(
                "Character has no voice configured".into(),
            ));
        }
        let url = format!("{}/text-to-speech/{voice_id}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("xi-api-key", api_key)
            .header("Accept", "audio/mpeg")
            .json(&self.request_body(text, params))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ReverieError::from_response(resp).await);
        }
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(ReverieError::Malformed("TTS returned no audio".into()));
        }
        Ok(bytes.to_vec())
    }
}

pub struct SpeechSynthesizer {
    router: Arc<ProviderRouter>,
    tts: Arc<dyn TtsBackend>,
    retry: RetryPolicy,
}

impl SpeechSynthesizer {
    pub fn new(router: Arc<ProviderRouter>, tts: Arc<dyn TtsBackend>) -> Self {
        Self {
            router,
            tts,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Stage A. Falls back to the raw dialogue if the auxiliary model is unavailable.
    pub async fn direct(&self, dialogue: &str) -> String {
        match self
            .router
            .auxiliary(VOICE_DIRECTION_SYSTEM, dialogue, 1024, 0.7)
            .await
        {
            Ok(reply) => {
                let directed = clean_directed_text(&reply);
                if directed.is_empty() {
                    dialogue.to_string()
                } else {
                    directed
                }
            }
            Err(err) => {
                tracing::warn!(target: "reverie::speech", error = %err, "Voice direction failed, using raw dialogue");
                dialogue.to_string()
            }
        }
    }

    /// Text that will be sent to the TTS backend.
    pub async fn prepare_text(&self, character: &Character, text: &str, enrich: bool) -> String {
        let parts = split_dialogue(text);
        let dialogue = if enrich && !parts.dialogue.is_empty() {
            self.direct(&parts.dialogue).await
        } else {
            parts.dialogue
        };
        compose_speech(
            &dialogue,
            &parts.narration,
            character.rendering_flags.narration_included_in_speech,
        )
    }

    /// Both stages; returns the written artifact.
    pub async fn synthesize(
        &self,
        snapshot: &SessionSnapshot,
        character: &Character,
        text: &str,
        enrich: bool,
    ) -> ReverieResult<PathBuf> {
        snapshot.set_status("Preparing speech");
        let final_text = self.prepare_text(character, text, enrich).await;
        if final_text.trim().is_empty() {
            return Err(ReverieError::PreconditionMissing(
                "Nothing to speak: the message has no dialogue".into(),
            ));
        }

        snapshot.set_status("Generating audio");
        let tts = &self.tts;
        let audio = retry_with_backoff(&self.retry, "tts", |_| {
            tts.synthesize(&final_text, &character.voice_id, &character.voice_params)
        })
        .await;
        let audio = match audio {
            Ok(bytes) => bytes,
            Err(err) => {
                snapshot.set_status("Audio generation failed");
                tracing::error!(target: "reverie::speech", backend = tts.name(), error = %err, "TTS failed");
                return Err(err);
            }
        };

        let path = artifact::write_artifact(&snapshot.folder, "tts_response", "mp3", &audio).await?;
        snapshot.set_status("Audio ready");
        tracing::info!(
            target: "reverie::speech",
            session = %snapshot.id,
            file = %path.display(),
            bytes = audio.len(),
            "Speech synthesized"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_narration_from_dialogue() {
        let parts = split_dialogue("I'm fine. *smiles*");
        assert_eq!(parts.dialogue, "I'm fine.");
        assert_eq!(parts.narration, vec!["smiles".to_string()]);

        let parts = split_dialogue("*leans in* Come closer.  *whispers* Closer.");
        assert_eq!(parts.dialogue, "Come closer. Closer.");
        assert_eq!(parts.narration.len(), 2);

        let parts = split_dialogue("*only narration*");
        assert!(parts.dialogue.is_empty());
    }

    #[test]
    fn narration_is_appended_only_when_enabled() {
        let narration = vec!["smiles".to_string()];
        assert_eq!(compose_speech("[laughs] Hi.", &narration, false), "[laughs] Hi.");
        assert_eq!(compose_speech("[laughs] Hi.", &narration, true), "[laughs] Hi. smiles");
        assert_eq!(compose_speech("", &narration, true), "smiles");
    }

    #[test]
    fn v3_stability_snaps_to_three_levels() {
        assert_eq!(quantize_v3_stability(0.1), 0.0);
        assert_eq!(quantize_v3_stability(0.25), 0.0);
        assert_eq!(quantize_v3_stability(0.4), 0.5);
        assert_eq!(quantize_v3_stability(0.75), 1.0);

        let params = VoiceParams {
            stability: 0.3,
            similarity: 0.8,
            style: 0.1,
        };
        let v3 = ElevenLabsTts::new(None, "eleven_v3").request_body("hi", &params);
        assert_eq!(v3["voice_settings"]["stability"], 0.5);
        let v2 = ElevenLabsTts::new(None, "eleven_multilingual_v2").request_body("hi", &params);
        assert!((v2["voice_settings"]["stability"].as_f64().unwrap() - 0.3).abs() < 1e-6);
        assert_eq!(v2["model_id"], "eleven_multilingual_v2");
    }
}
