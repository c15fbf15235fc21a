//! Character Registry: named persona records loaded from a TOML catalogue plus an imported JSON
//! file. Imported records override catalogue records with the same name.
//!
//! Records accept both the current field names and the older ones written by card importers
//! (`image_prompt`, `tts_url`, `source_faces_folder`, `voice_settings`, `read_narration`), so an
//! imported file can be dropped in as-is.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ReverieError, ReverieResult};

/// Speech backend knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceParams {
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity", alias = "similarity_boost")]
    pub similarity: f32,
    #[serde(default)]
    pub style: f32,
}

fn default_stability() -> f32 {
    0.5
}

fn default_similarity() -> f32 {
    0.75
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            stability: default_stability(),
            similarity: default_similarity(),
            style: 0.0,
        }
    }
}

/// Preferred diffusion preset for a character.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageMode {
    #[default]
    Standard,
    Turbo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderingFlags {
    /// Speak `*narration*` spans too, not only dialogue.
    #[serde(default, alias = "read_narration")]
    pub narration_included_in_speech: bool,
    #[serde(default)]
    pub pov_mode: bool,
    /// Images show what the player sees; the character may be absent and no face swap runs.
    #[serde(default)]
    pub first_person_mode: bool,
    #[serde(default)]
    pub image_mode: ImageMode,
}

/// Optional per-character backend defaults, applied when a session starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmDefaults {
    #[serde(default, alias = "main_provider")]
    pub conversation_provider: Option<String>,
    #[serde(default, alias = "main_model")]
    pub conversation_model: Option<String>,
    #[serde(default, alias = "media_provider")]
    pub auxiliary_provider: Option<String>,
    #[serde(default, alias = "media_model")]
    pub auxiliary_model: Option<String>,
}

/// Persona record. Immutable for the duration of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    /// Filled from the catalogue key when absent in the record body.
    #[serde(default)]
    pub name: String,
    pub system_prompt: String,
    #[serde(default, alias = "image_prompt")]
    pub appearance_descriptor: String,
    #[serde(default, alias = "tts_url", deserialize_with = "voice_id_from_url")]
    pub voice_id: String,
    #[serde(default, alias = "voice_settings")]
    pub voice_params: VoiceParams,
    #[serde(default, alias = "source_faces_folder")]
    pub face_reference_folder: Option<PathBuf>,
    #[serde(flatten)]
    pub rendering_flags: RenderingFlags,
    #[serde(default)]
    pub scenario: Option<String>,
    #[serde(default, alias = "llm_settings")]
    pub llm: Option<LlmDefaults>,
}

/// Accept either a bare voice id or a full TTS URL whose last path segment is the id.
fn voice_id_from_url<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let trimmed = raw.trim().trim_end_matches('/');
    Ok(trimmed.rsplit('/').next().unwrap_or(trimmed).to_string())
}

/// Name-keyed persona catalogue. Single source of truth for persona fields at turn time.
#[derive(Debug, Clone, Default)]
pub struct CharacterRegistry {
    characters: BTreeMap<String, Character>,
}

impl CharacterRegistry {
    /// Load the TOML catalogue and, when it exists, the imported JSON file on top of it.
    /// A missing catalogue is not an error: a deployment may run on imported records alone.
    pub fn load(catalogue: &Path, imported: &Path) -> ReverieResult<Self> {
        let mut registry = Self::default();
        if catalogue.exists() {
            let text = std::fs::read_to_string(catalogue)?;
            let records: BTreeMap<String, Character> = toml::from_str(&text)?;
            registry.merge(records);
        } else {
            tracing::warn!(target: "reverie::characters", path = %catalogue.display(), "Character catalogue not found");
        }
        if imported.exists() {
            let text = std::fs::read_to_string(imported)?;
            let records: BTreeMap<String, Character> = serde_json::from_str(&text)?;
            registry.merge(records);
        }
        tracing::info!(target: "reverie::characters", count = registry.characters.len(), "Characters loaded");
        Ok(registry)
    }

    pub fn from_records(records: impl IntoIterator<Item = Character>) -> Self {
        let mut registry = Self::default();
        registry.merge(records.into_iter().map(|c| (c.name.clone(), c)));
        registry
    }

    /// Later records replace earlier ones with the same name.
    pub fn merge(&mut self, records: impl IntoIterator<Item = (String, Character)>) {
        for (key, mut character) in records {
            if character.name.is_empty() {
                character.name = key.clone();
            }
            self.characters.insert(key, character);
        }
    }

    pub fn get(&self, name: &str) -> ReverieResult<&Character> {
        self.characters
            .get(name)
            .ok_or_else(|| ReverieError::NotFound(format!("character '{name}'")))
    }

    pub fn names(&self) -> Vec<String> {
        self.characters.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}
