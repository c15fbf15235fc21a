//! Local diffusion server (AUTOMATIC1111-compatible API): txt2img with an embedded face swap,
//! the standalone face-swap pass, and checkpoint discovery.

use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use walkdir::WalkDir;

use reverie_core::{ImageMode, ReverieError, ReverieResult};

use super::faceswap::FaceSwapSettings;
use crate::artifact;

const CHECKPOINT_EXTENSIONS: [&str; 2] = ["safetensors", "ckpt"];

/// Sampling parameters chosen from the checkpoint filename.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preset {
    pub mode: ImageMode,
    pub steps: u32,
    pub cfg_scale: f32,
    pub sampler: &'static str,
    pub scheduler: &'static str,
    pub width: u32,
    pub height: u32,
}

pub const TURBO: Preset = Preset {
    mode: ImageMode::Turbo,
    steps: 8,
    cfg_scale: 2.0,
    sampler: "DPM++ SDE",
    scheduler: "Karras",
    width: 896,
    height: 1152,
};

pub const STANDARD: Preset = Preset {
    mode: ImageMode::Standard,
    steps: 30,
    cfg_scale: 7.0,
    sampler: "DPM++ 2M",
    scheduler: "Karras",
    width: 896,
    height: 1152,
};

/// `turbo*` checkpoints get the few-step preset; everything else is standard.
pub fn mode_for_checkpoint(checkpoint: &str) -> ImageMode {
    let file = checkpoint.rsplit(['/', '\\']).next().unwrap_or(checkpoint);
    if file.to_ascii_lowercase().starts_with("turbo") {
        ImageMode::Turbo
    } else {
        ImageMode::Standard
    }
}

pub fn preset_for(mode: ImageMode) -> Preset {
    match mode {
        ImageMode::Turbo => TURBO,
        ImageMode::Standard => STANDARD,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    pub name: String,
    pub mode: ImageMode,
}

/// Checkpoint files under `dir`, relative paths with `/` separators, sorted.
pub fn scan_checkpoints(dir: &Path) -> Vec<Checkpoint> {
    let mut found: Vec<Checkpoint> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .map(|x| CHECKPOINT_EXTENSIONS.contains(&x.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .filter_map(|e| {
            let rel = e.path().strip_prefix(dir).ok()?;
            let name = rel.to_string_lossy().replace('\\', "/");
            Some(Checkpoint {
                mode: mode_for_checkpoint(&name),
                name,
            })
        })
        .collect();
    found.sort_by(|a, b| a.name.cmp(&b.name));
    found
}

/// Checkpoint to use when the caller did not pick one: the first installed checkpoint whose
/// preset matches the character's preference.
pub fn default_checkpoint(installed: &[Checkpoint], preferred: ImageMode) -> Option<&str> {
    installed
        .iter()
        .find(|c| c.mode == preferred)
        .map(|c| c.name.as_str())
}

#[derive(Debug, Clone)]
pub struct LocalDiffusion {
    client: reqwest::Client,
    base_url: String,
    faceswap: FaceSwapSettings,
}

impl LocalDiffusion {
    pub fn new(base_url: &str, faceswap: FaceSwapSettings) -> Self {
        Self {
            client: artifact::media_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            faceswap,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn txt2img_body(
        &self,
        prompt: &str,
        checkpoint: Option<&str>,
        face_folder: Option<&Path>,
    ) -> Value {
        let preset = checkpoint
            .map(|c| preset_for(mode_for_checkpoint(c)))
            .unwrap_or(STANDARD);
        let mut body = json!({
            "prompt": prompt,
            "steps": preset.steps,
            "cfg_scale": preset.cfg_scale,
            "sampler_name": preset.sampler,
            "scheduler": preset.scheduler,
            "width": preset.width,
            "height": preset.height,
            "seed": -1,
        });
        if let Some(checkpoint) = checkpoint {
            body["override_settings"] = json!({ "sd_model_checkpoint": checkpoint });
        }
        if let Some(folder) = face_folder {
            body["alwayson_scripts"] =
                json!({ "reactor": { "args": self.faceswap.alwayson_args(folder) } });
        }
        body
    }

    /// Render one image; the face swap runs in the same request when `face_folder` is given.
    pub async fn txt2img(
        &self,
        prompt: &str,
        checkpoint: Option<&str>,
        face_folder: Option<&Path>,
    ) -> ReverieResult<Vec<u8>> {
        let body = self.txt2img_body(prompt, checkpoint, face_folder);
        tracing::info!(
            target: "reverie::image",
            checkpoint = checkpoint.unwrap_or("(current)"),
            face_swap = face_folder.is_some(),
            "Local txt2img"
        );
        let reply = self.post("/sdapi/v1/txt2img", &body).await?;
        let image = reply
            .get("images")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(Value::as_str)
            .ok_or_else(|| ReverieError::Malformed("txt2img returned no images".into()))?;
        artifact::decode_base64(image)
    }

    /// Standalone face-swap pass over an existing picture.
    pub async fn face_swap(&self, image: &[u8], face_folder: &Path) -> ReverieResult<Vec<u8>> {
        use base64::Engine;
        let target = base64::engine::general_purpose::STANDARD.encode(image);
        let body = self.faceswap.image_request(&target, face_folder);
        let reply = self.post("/reactor/image", &body).await?;
        let image = reply
            .get("image")
            .and_then(Value::as_str)
            .ok_or_else(|| ReverieError::Malformed("face swap returned no image".into()))?;
        artifact::decode_base64(image)
    }

    /// Checkpoints the server knows about, for when no checkpoint folder is configured.
    pub async fn list_models(&self) -> ReverieResult<Vec<Checkpoint>> {
        let url = format!("{}/sdapi/v1/sd-models", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(|e| self.unavailable(e))?;
        if !resp.status().is_success() {
            return Err(ReverieError::from_response(resp).await);
        }
        let models: Vec<Value> = resp.json().await?;
        Ok(models
            .iter()
            .filter_map(|m| m.get("title").or_else(|| m.get("model_name")))
            .filter_map(Value::as_str)
            .map(|name| Checkpoint {
                name: name.to_string(),
                mode: mode_for_checkpoint(name),
            })
            .collect())
    }

    async fn post(&self, path: &str, body: &Value) -> ReverieResult<Value> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;
        if !resp.status().is_success() {
            return Err(ReverieError::from_response(resp).await);
        }
        Ok(resp.json().await?)
    }

    /// Connection failures mean the server is not running.
    fn unavailable(&self, err: reqwest::Error) -> ReverieError {
        if err.is_connect() {
            ReverieError::BackendUnavailable(format!(
                "local diffusion server at {} is not reachable",
                self.base_url
            ))
        } else {
            err.into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_follows_filename_prefix() {
        assert_eq!(mode_for_checkpoint("TurboVision_v2.safetensors"), ImageMode::Turbo);
        assert_eq!(mode_for_checkpoint("sdxl/turbo_mix.safetensors"), ImageMode::Turbo);
        assert_eq!(mode_for_checkpoint("juggernautXL.safetensors"), ImageMode::Standard);
        assert_eq!(mode_for_checkpoint("my_turbo.safetensors"), ImageMode::Standard);
    }

    #[test]
    fn txt2img_body_embeds_face_swap_only_with_folder() {
        let sd = LocalDiffusion::new("http://127.0.0.1:7860/", FaceSwapSettings::new("m.onnx"));
        assert_eq!(sd.base_url(), "http://127.0.0.1:7860");

        let body = sd.txt2img_body("a cat", Some("turbo_x.safetensors"), Some(Path::new("/faces")));
        assert_eq!(body["steps"], 8);
        assert_eq!(body["override_settings"]["sd_model_checkpoint"], "turbo_x.safetensors");
        assert_eq!(body["alwayson_scripts"]["reactor"]["args"][24], "/faces");

        let body = sd.txt2img_body("a cat", None, None);
        assert_eq!(body["steps"], 30);
        assert!(body.get("alwayson_scripts").is_none());
        assert!(body.get("override_settings").is_none());
    }

    #[test]
    fn scans_checkpoint_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("xl")).unwrap();
        std::fs::write(dir.path().join("xl/turboReal.safetensors"), b"").unwrap();
        std::fs::write(dir.path().join("base.ckpt"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();

        let found = scan_checkpoints(dir.path());
        let names: Vec<&str> = found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["base.ckpt", "xl/turboReal.safetensors"]);
        assert_eq!(default_checkpoint(&found, ImageMode::Turbo), Some("xl/turboReal.safetensors"));
        assert_eq!(default_checkpoint(&found, ImageMode::Standard), Some("base.ckpt"));
    }
}
