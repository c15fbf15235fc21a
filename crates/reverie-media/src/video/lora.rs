//! LoRA-conditioned image-to-video (Wan on Replicate).

use serde::Deserialize;
use serde_json::{json, Value};

use reverie_core::{ReverieError, ReverieResult};

/// Host whose downloads need an API token in the query string.
const CREDENTIALED_HOST: &str = "civitai.com";
pub const DEFAULT_FRAMES: u32 = 81;
pub const DEFAULT_FPS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WanModel {
    /// Wan 2.2 fast: two LoRA slots (high and low noise transformers).
    #[default]
    Fast22,
    /// Wan 2.1: one LoRA slot.
    Wan21,
}

impl WanModel {
    pub fn from_key(key: Option<&str>) -> ReverieResult<Self> {
        match key.map(str::trim).unwrap_or_default() {
            "" | "wan-2.2-fast" => Ok(WanModel::Fast22),
            "wan-2.1" => Ok(WanModel::Wan21),
            other => Err(ReverieError::UnsupportedModel(format!(
                "'{other}' (expected wan-2.2-fast or wan-2.1)"
            ))),
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            WanModel::Fast22 => "wan-2.2-fast",
            WanModel::Wan21 => "wan-2.1",
        }
    }

    pub fn replicate_model(self) -> &'static str {
        match self {
            WanModel::Fast22 => "wan-video/wan-2.2-i2v-fast",
            WanModel::Wan21 => "fofr/wan2.1-with-lora",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoraWeight {
    pub url: String,
    pub scale: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoraVideoRequest {
    pub prompt: String,
    pub loras: Vec<LoraWeight>,
    pub num_frames: u32,
    pub fps: u32,
    pub model: WanModel,
}

/// Append `token=<secret>` to credentialed-host URLs that do not already carry one.
/// Other hosts, unparsable URLs and a missing secret leave the URL untouched.
pub fn rewrite_lora_url(url: &str, token: Option<&str>) -> String {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return url.to_string();
    };
    let Ok(mut parsed) = reqwest::Url::parse(url) else {
        return url.to_string();
    };
    let credentialed = parsed
        .host_str()
        .map(|h| h == CREDENTIALED_HOST || h.ends_with(&format!(".{CREDENTIALED_HOST}")))
        .unwrap_or(false);
    if !credentialed || parsed.query_pairs().any(|(k, _)| k == "token") {
        return url.to_string();
    }
    // Goes into the query even when the URL carries a fragment.
    parsed.query_pairs_mut().append_pair("token", token);
    parsed.to_string()
}

/// Prediction input for the selected Wan model.
pub fn prediction_input(request: &LoraVideoRequest, image: String, token: Option<&str>) -> Value {
    let loras: Vec<LoraWeight> = request
        .loras
        .iter()
        .filter(|l| !l.url.trim().is_empty())
        .map(|l| LoraWeight {
            url: rewrite_lora_url(l.url.trim(), token),
            scale: l.scale,
        })
        .collect();
    match request.model {
        WanModel::Fast22 => {
            let mut input = json!({
                "image": image,
                "prompt": request.prompt,
                "num_frames": request.num_frames,
                "frames_per_second": request.fps,
            });
            if let Some(first) = loras.first() {
                input["lora_weights_transformer"] = json!(first.url);
                input["lora_scale_transformer"] = json!(first.scale);
            }
            if let Some(second) = loras.get(1) {
                input["lora_weights_transformer_2"] = json!(second.url);
                input["lora_scale_transformer_2"] = json!(second.scale);
            }
            input
        }
        WanModel::Wan21 => {
            let mut input = json!({
                "image": image,
                "prompt": request.prompt,
                "frames": request.num_frames,
                "fps": request.fps,
            });
            if let Some(first) = loras.first() {
                input["lora_url"] = json!(first.url);
                input["lora_strength_model"] = json!(first.scale);
            }
            input
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_added_once_and_only_for_civitai() {
        let url = "https://civitai.com/api/download/models/123";
        let once = rewrite_lora_url(url, Some("s3cret"));
        assert_eq!(once, "https://civitai.com/api/download/models/123?token=s3cret");
        assert_eq!(rewrite_lora_url(&once, Some("s3cret")), once);

        let with_query = rewrite_lora_url("https://civitai.com/api/download/models/1?type=Model", Some("t"));
        assert_eq!(with_query, "https://civitai.com/api/download/models/1?type=Model&token=t");

        let with_fragment = rewrite_lora_url("https://civitai.com/api/download/models/1#frag", Some("t"));
        assert_eq!(with_fragment, "https://civitai.com/api/download/models/1?token=t#frag");
        assert_eq!(rewrite_lora_url(&with_fragment, Some("t")), with_fragment);

        let hf = "https://huggingface.co/org/repo/resolve/main/lora.safetensors";
        assert_eq!(rewrite_lora_url(hf, Some("t")), hf);
        assert_eq!(rewrite_lora_url(url, None), url);
    }

    #[test]
    fn two_slots_for_fast_one_for_wan21() {
        let request = LoraVideoRequest {
            prompt: "she waves".into(),
            loras: vec![
                LoraWeight { url: "https://civitai.com/api/download/models/1".into(), scale: 1.0 },
                LoraWeight { url: "https://hf.co/l2.safetensors".into(), scale: 0.6 },
            ],
            num_frames: DEFAULT_FRAMES,
            fps: DEFAULT_FPS,
            model: WanModel::Fast22,
        };
        let input = prediction_input(&request, "data:image/png;base64,AA==".into(), Some("t"));
        assert_eq!(input["lora_weights_transformer"], "https://civitai.com/api/download/models/1?token=t");
        assert_eq!(input["lora_weights_transformer_2"], "https://hf.co/l2.safetensors");
        assert_eq!(input["num_frames"], 81);

        let wan21 = LoraVideoRequest { model: WanModel::Wan21, ..request };
        let input = prediction_input(&wan21, "img".into(), None);
        assert_eq!(input["lora_url"], "https://civitai.com/api/download/models/1");
        assert!(input.get("lora_weights_transformer_2").is_none());
    }

    #[test]
    fn model_keys() {
        assert_eq!(WanModel::from_key(None).unwrap(), WanModel::Fast22);
        assert_eq!(WanModel::from_key(Some("wan-2.1")).unwrap(), WanModel::Wan21);
        assert!(WanModel::from_key(Some("wan-3")).is_err());
    }
}
