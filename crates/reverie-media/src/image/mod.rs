//! **Image Synthesizer**: character-consistent stills for a session.
//!
//! The prompt comes either from an auxiliary LLM pass over the last assistant turn (shaped by
//! the character's rendering mode) or straight from a `|...|` / `[...]` span the model put at
//! the end of its message. Rendering goes to the local diffusion server (face swap embedded in
//! the request) or to the cloud model followed by a separate face-swap pass. First-person
//! renders never get the face swap.

pub mod cloud;
pub mod faceswap;
pub mod local;

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use reverie_core::prompts::{
    extract_delimited_prompt, image_prompt_request, ImagePromptMode, IMAGE_PROMPT_SYSTEM,
};
use reverie_core::{Character, ImageMode, ProviderRouter, ReverieError, ReverieResult, SessionSnapshot};

use crate::artifact;
use crate::video::NO_RECENT_IMAGE;
pub use cloud::{is_cloud_model, CloudImage, CLOUD_IMAGE_MODEL};
pub use faceswap::FaceSwapSettings;
pub use local::{Checkpoint, LocalDiffusion};

/// Which backend renders, parsed from the `model` query parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageModel {
    /// Local server; `None` means pick by the character's preferred preset.
    Local(Option<String>),
    Cloud,
}

impl ImageModel {
    pub fn from_key(key: Option<&str>) -> Self {
        match key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(k) if is_cloud_model(k) => ImageModel::Cloud,
            Some(k) => ImageModel::Local(Some(k.to_string())),
            None => ImageModel::Local(None),
        }
    }
}

/// One row of `/image-models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageModelEntry {
    pub id: String,
    pub backend: &'static str,
    pub mode: &'static str,
}

fn mode_label(mode: ImageMode) -> &'static str {
    match mode {
        ImageMode::Turbo => "turbo",
        ImageMode::Standard => "standard",
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub path: PathBuf,
    pub prompt: String,
}

pub struct ImageSynthesizer {
    router: Arc<ProviderRouter>,
    local: LocalDiffusion,
    cloud: CloudImage,
    checkpoint_dir: Option<PathBuf>,
}

impl ImageSynthesizer {
    pub fn new(router: Arc<ProviderRouter>, local: LocalDiffusion, cloud: CloudImage) -> Self {
        Self {
            router,
            local,
            cloud,
            checkpoint_dir: None,
        }
    }

    pub fn with_checkpoint_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.checkpoint_dir = dir;
        self
    }

    async fn installed_checkpoints(&self) -> Vec<Checkpoint> {
        match &self.checkpoint_dir {
            Some(dir) => {
                let dir = dir.clone();
                tokio::task::spawn_blocking(move || local::scan_checkpoints(&dir))
                    .await
                    .unwrap_or_default()
            }
            None => self.local.list_models().await.unwrap_or_else(|err| {
                tracing::warn!(target: "reverie::image", error = %err, "Could not list checkpoints");
                Vec::new()
            }),
        }
    }

    /// Installed checkpoints plus the cloud option.
    pub async fn available_models(&self) -> Vec<ImageModelEntry> {
        let mut entries: Vec<ImageModelEntry> = self
            .installed_checkpoints()
            .await
            .into_iter()
            .map(|c| ImageModelEntry {
                id: c.name,
                backend: "local",
                mode: mode_label(c.mode),
            })
            .collect();
        entries.push(ImageModelEntry {
            id: CLOUD_IMAGE_MODEL.to_string(),
            backend: "cloud",
            mode: "cloud",
        });
        entries
    }

    /// Auxiliary pass: appearance + last assistant turn + mode template.
    pub async fn synthesize_prompt(
        &self,
        snapshot: &SessionSnapshot,
        character: &Character,
    ) -> ReverieResult<String> {
        let mode = ImagePromptMode::from_flags(&character.rendering_flags);
        let request = image_prompt_request(
            mode,
            &character.appearance_descriptor,
            snapshot.last_assistant_message(),
        );
        let reply = self
            .router
            .auxiliary(IMAGE_PROMPT_SYSTEM, &request, 300, 0.7)
            .await?;
        let prompt = reverie_core::prompts::strip_wrapping_quotes(&reply).to_string();
        if prompt.is_empty() {
            return Err(ReverieError::Malformed("image prompt pass returned nothing".into()));
        }
        Ok(prompt)
    }

    /// Appearance descriptor followed by the delimited span of the last assistant turn.
    pub fn direct_prompt(snapshot: &SessionSnapshot, character: &Character) -> ReverieResult<String> {
        let span = snapshot
            .last_assistant_message()
            .and_then(extract_delimited_prompt)
            .ok_or(ReverieError::MissingDelimitedPrompt)?;
        let appearance = character.appearance_descriptor.trim();
        Ok(if appearance.is_empty() {
            span
        } else {
            format!("{appearance}, {span}")
        })
    }

    pub async fn generate(
        &self,
        snapshot: &SessionSnapshot,
        character: &Character,
        model: &ImageModel,
        cancel: &CancellationToken,
    ) -> ReverieResult<GeneratedImage> {
        snapshot.set_status("Writing image prompt");
        let prompt = self.synthesize_prompt(snapshot, character).await?;
        self.render_to_session(snapshot, character, model, prompt, cancel).await
    }

    /// Fails with `MissingDelimitedPrompt` before any side effect.
    pub async fn generate_from_last_message(
        &self,
        snapshot: &SessionSnapshot,
        character: &Character,
        model: &ImageModel,
        cancel: &CancellationToken,
    ) -> ReverieResult<GeneratedImage> {
        let prompt = Self::direct_prompt(snapshot, character)?;
        self.render_to_session(snapshot, character, model, prompt, cancel).await
    }

    async fn render_to_session(
        &self,
        snapshot: &SessionSnapshot,
        character: &Character,
        model: &ImageModel,
        prompt: String,
        cancel: &CancellationToken,
    ) -> ReverieResult<GeneratedImage> {
        snapshot.set_status("Generating image");
        let bytes = match self.render(&prompt, character, model, cancel).await {
            Ok(bytes) => bytes,
            Err(err) => {
                snapshot.set_status("Image generation failed");
                return Err(err);
            }
        };
        let ext = artifact::sniff_image_extension(&bytes);
        let path = artifact::write_artifact(&snapshot.folder, "selfie_image", ext, &bytes).await?;
        snapshot.set_status("Image ready");
        tracing::info!(target: "reverie::image", session = %snapshot.id, file = %path.display(), "Image generated");
        Ok(GeneratedImage { path, prompt })
    }

    /// Backend dispatch. Returns encoded image bytes.
    pub async fn render(
        &self,
        prompt: &str,
        character: &Character,
        model: &ImageModel,
        cancel: &CancellationToken,
    ) -> ReverieResult<Vec<u8>> {
        let mode = ImagePromptMode::from_flags(&character.rendering_flags);
        let face_folder = character
            .face_reference_folder
            .as_deref()
            .filter(|_| mode.uses_face_swap());
        match model {
            ImageModel::Local(checkpoint) => {
                let chosen = match checkpoint {
                    Some(c) => Some(c.clone()),
                    None => {
                        let installed = self.installed_checkpoints().await;
                        local::default_checkpoint(&installed, character.rendering_flags.image_mode)
                            .map(str::to_string)
                    }
                };
                self.local.txt2img(prompt, chosen.as_deref(), face_folder).await
            }
            ImageModel::Cloud => {
                let bytes = self.cloud.generate(prompt, cancel).await?;
                Ok(self.swap_best_effort(bytes, face_folder).await)
            }
        }
    }

    /// Cloud images keep their original face when the swap pass is unavailable.
    async fn swap_best_effort(&self, bytes: Vec<u8>, face_folder: Option<&std::path::Path>) -> Vec<u8> {
        let Some(folder) = face_folder else {
            return bytes;
        };
        match self.local.face_swap(&bytes, folder).await {
            Ok(swapped) => swapped,
            Err(err) => {
                tracing::warn!(target: "reverie::image", error = %err, "Face swap pass failed, keeping original");
                bytes
            }
        }
    }

    /// Swap pass for an image produced elsewhere (extracted frame). No-op in first-person mode.
    pub async fn swap_for_character(&self, bytes: Vec<u8>, character: &Character) -> Vec<u8> {
        let mode = ImagePromptMode::from_flags(&character.rendering_flags);
        let folder = character
            .face_reference_folder
            .as_deref()
            .filter(|_| mode.uses_face_swap());
        self.swap_best_effort(bytes, folder).await
    }

    /// Edit the latest image with an instruction, then re-apply the character's face.
    pub async fn edit(
        &self,
        snapshot: &SessionSnapshot,
        character: &Character,
        instruction: &str,
        cancel: &CancellationToken,
    ) -> ReverieResult<GeneratedImage> {
        let source = snapshot
            .last_image_path
            .as_deref()
            .ok_or_else(|| ReverieError::PreconditionMissing(NO_RECENT_IMAGE.into()))?;
        snapshot.set_status("Editing image");
        let edited = self.cloud.edit(source, instruction, cancel).await?;
        let bytes = self.swap_for_character(edited, character).await;
        let ext = artifact::sniff_image_extension(&bytes);
        let path = artifact::write_artifact(&snapshot.folder, "edited_image", ext, &bytes).await?;
        snapshot.set_status("Image ready");
        Ok(GeneratedImage {
            path,
            prompt: instruction.to_string(),
        })
    }

    /// Re-run the identity swap on the latest image, or on `filename` inside the session folder.
    pub async fn face_swap(
        &self,
        snapshot: &SessionSnapshot,
        character: &Character,
        filename: Option<&str>,
    ) -> ReverieResult<PathBuf> {
        let folder = character.face_reference_folder.as_deref().ok_or_else(|| {
            ReverieError::PreconditionMissing(format!(
                "Character '{}' has no face reference folder",
                character.name
            ))
        })?;
        let source = match filename {
            Some(name) => {
                let name = std::path::Path::new(name)
                    .file_name()
                    .ok_or_else(|| ReverieError::NotFound(format!("image '{name}'")))?;
                snapshot.folder.join(name)
            }
            None => snapshot
                .last_image_path
                .clone()
                .ok_or_else(|| ReverieError::PreconditionMissing(NO_RECENT_IMAGE.into()))?,
        };
        let bytes = tokio::fs::read(&source)
            .await
            .map_err(|_| ReverieError::NotFound(format!("image '{}'", source.display())))?;
        snapshot.set_status("Swapping face");
        let swapped = self.local.face_swap(&bytes, folder).await?;
        let ext = artifact::sniff_image_extension(&swapped);
        let path = artifact::write_artifact(&snapshot.folder, "faceswap_image", ext, &swapped).await?;
        snapshot.set_status("Image ready");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_core::{Role, TranscriptEntry};

    fn snapshot(last: &str) -> SessionSnapshot {
        SessionSnapshot {
            id: "s".into(),
            character_name: "Alpha".into(),
            folder: PathBuf::from("/tmp/s"),
            transcript: vec![
                TranscriptEntry::new(Role::User, "show me"),
                TranscriptEntry::new(Role::Assistant, last),
            ],
            last_audio_path: None,
            last_image_path: None,
            last_video_path: None,
        }
    }

    fn alpha() -> Character {
        serde_json::from_value(serde_json::json!({
            "name": "Alpha",
            "system_prompt": "",
            "appearance_descriptor": "a 25-year-old asian woman"
        }))
        .unwrap()
    }

    #[test]
    fn model_key_parsing() {
        assert_eq!(ImageModel::from_key(None), ImageModel::Local(None));
        assert_eq!(ImageModel::from_key(Some(" ")), ImageModel::Local(None));
        assert_eq!(ImageModel::from_key(Some("qwen-image-2512")), ImageModel::Cloud);
        assert_eq!(
            ImageModel::from_key(Some("turbo.safetensors")),
            ImageModel::Local(Some("turbo.safetensors".into()))
        );
    }

    #[test]
    fn direct_prompt_prepends_appearance() {
        let prompt =
            ImageSynthesizer::direct_prompt(&snapshot("Here. |red dress, rooftop|"), &alpha()).unwrap();
        assert_eq!(prompt, "a 25-year-old asian woman, red dress, rooftop");
    }

    #[test]
    fn direct_prompt_without_delimiters_fails() {
        let err = ImageSynthesizer::direct_prompt(&snapshot("Just talking."), &alpha()).unwrap_err();
        assert!(matches!(err, ReverieError::MissingDelimitedPrompt));
    }
}
