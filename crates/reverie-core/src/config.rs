//! Gateway configuration and process-wide credentials.
//!
//! [`ReverieConfig`] is layered with the `config` crate: defaults, then an optional
//! `reverie.toml` (or the file named by `REVERIE_CONFIG`), then `REVERIE__*` environment
//! variables. Vendor credentials and endpoint overrides come straight from the `.env` file via
//! [`Credentials::from_env`] and [`Endpoints::from_env`]; both are read once at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ReverieResult;

/// Gateway settings.
///
/// | Env | Default | Description |
/// |-----|---------|-------------|
/// | REVERIE__HOST | 127.0.0.1 | Bind address. |
/// | REVERIE__PORT | 8000 | Bind port. |
/// | REVERIE__OUTPUT_ROOT | ./output | One folder per session lives here. |
/// | REVERIE__CHARACTERS_PATH | ./characters.toml | Built-in character catalogue. |
/// | REVERIE__IMPORTED_CHARACTERS_PATH | ./characters_imported.json | Imported records (override on name). |
/// | REVERIE__DEFAULT_LLM | openrouter | Conversation provider: anthropic \| openrouter \| lmstudio. |
/// | REVERIE__AUXILIARY_LLM | openrouter | Provider for prompt shaping. |
/// | REVERIE__TUNNEL_ENABLED | false | Publish the gateway through cloudflared. |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverieConfig {
    pub host: String,
    pub port: u16,
    pub output_root: PathBuf,
    pub characters_path: PathBuf,
    pub imported_characters_path: PathBuf,
    pub log_dir: PathBuf,
    /// Local diffusion checkpoints folder, scanned for `/image-models`.
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
    pub tunnel_enabled: bool,
    pub tunnel_url_file: PathBuf,
    pub default_llm: String,
    pub default_model: String,
    pub auxiliary_llm: String,
    pub auxiliary_model: String,
    /// Shared secret for non-loopback callers. Unset means everyone is authorized.
    #[serde(default)]
    pub remote_password: Option<String>,
}

impl ReverieConfig {
    pub fn load() -> ReverieResult<Self> {
        let config_path =
            std::env::var("REVERIE_CONFIG").unwrap_or_else(|_| "reverie.toml".to_string());
        let builder = config::Config::builder()
            .set_default("host", "127.0.0.1")?
            .set_default("port", 8000_i64)?
            .set_default("output_root", "./output")?
            .set_default("characters_path", "./characters.toml")?
            .set_default("imported_characters_path", "./characters_imported.json")?
            .set_default("log_dir", "./logs")?
            .set_default("tunnel_enabled", false)?
            .set_default("tunnel_url_file", "./tunnel_url.txt")?
            .set_default("default_llm", "openrouter")?
            .set_default("default_model", "anthropic/claude-3.5-sonnet")?
            .set_default("auxiliary_llm", "openrouter")?
            .set_default("auxiliary_model", "meta-llama/llama-3.3-70b-instruct")?;

        let path = Path::new(&config_path);
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("REVERIE").separator("__"))
            .build()?;

        let mut cfg: ReverieConfig = built.try_deserialize()?;
        // Legacy flat keys from older .env files.
        if cfg.remote_password.is_none() {
            cfg.remote_password = env_opt_string("REMOTE_PASSWORD");
        }
        if !cfg.tunnel_enabled {
            cfg.tunnel_enabled = env_bool("ENABLE_TUNNEL", false);
        }
        if let Some(llm) = env_opt_string("DEFAULT_LLM") {
            cfg.default_llm = llm;
        }
        Ok(cfg)
    }

    pub fn requires_password(&self) -> bool {
        self.remote_password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Vendor credentials. Missing keys disable the matching backend instead of failing startup.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub anthropic_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    pub wavespeed_api_key: Option<String>,
    pub hedra_api_key: Option<String>,
    pub replicate_api_token: Option<String>,
    /// Appended as `token=` to LoRA URLs from the credentialed host.
    pub civitai_token: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: env_opt_string("ANTHROPIC_API_KEY"),
            openrouter_api_key: env_opt_string("OPENROUTER_API_KEY")
                .or_else(|| env_opt_string("OPENROUTER_KEY")),
            elevenlabs_api_key: env_opt_string("ELEVENLABS_API_KEY"),
            wavespeed_api_key: env_opt_string("WAVESPEED_API_KEY"),
            hedra_api_key: env_opt_string("HEDRA_API_KEY"),
            replicate_api_token: env_opt_string("REPLICATE_API_TOKEN"),
            civitai_token: env_opt_string("CIVITAI_TOKEN")
                .or_else(|| env_opt_string("CIVITAI_API_KEY")),
        }
    }
}

/// Endpoint overrides and tool paths.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub lmstudio_url: String,
    pub stable_diffusion_url: String,
    pub wavespeed_url: String,
    pub hedra_url: String,
    pub replicate_url: String,
    /// Face detection model handed to the face-swap script block.
    pub faceswap_model_path: String,
    pub ffmpeg_path: String,
    pub elevenlabs_model: String,
    /// Sent as `HTTP-Referer` to OpenRouter when set.
    pub openrouter_referer: Option<String>,
    pub openrouter_title: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            lmstudio_url: "http://localhost:1234/v1".to_string(),
            stable_diffusion_url: "http://127.0.0.1:7860".to_string(),
            wavespeed_url: "https://api.wavespeed.ai/api/v3".to_string(),
            hedra_url: "https://mercury.dev.dream-ai.com/api".to_string(),
            replicate_url: "https://api.replicate.com".to_string(),
            faceswap_model_path: "models/insightface/inswapper_128.onnx".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            elevenlabs_model: "eleven_multilingual_v2".to_string(),
            openrouter_referer: None,
            openrouter_title: "Reverie".to_string(),
        }
    }
}

impl Endpoints {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            lmstudio_url: env_url("LMSTUDIO_URL", d.lmstudio_url),
            stable_diffusion_url: env_url("STABLE_DIFFUSION_URL", d.stable_diffusion_url),
            wavespeed_url: env_url("WAVESPEED_API_URL", d.wavespeed_url),
            hedra_url: env_url("HEDRA_BASE_URL", d.hedra_url),
            replicate_url: env_url("REPLICATE_BASE_URL", d.replicate_url),
            faceswap_model_path: env_opt_string("FACESWAP_MODEL_PATH")
                .unwrap_or(d.faceswap_model_path),
            ffmpeg_path: env_opt_string("FFMPEG_PATH").unwrap_or(d.ffmpeg_path),
            elevenlabs_model: env_opt_string("ELEVENLABS_MODEL").unwrap_or(d.elevenlabs_model),
            openrouter_referer: env_opt_string("OPENROUTER_REFERER"),
            openrouter_title: env_opt_string("OPENROUTER_TITLE").unwrap_or(d.openrouter_title),
        }
    }
}

fn env_url(name: &str, default: String) -> String {
    env_opt_string(name)
        .map(|s| s.trim_end_matches('/').to_string())
        .unwrap_or(default)
}

pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                default
            } else {
                v.eq_ignore_ascii_case("true") || v == "1" || v.eq_ignore_ascii_case("yes")
            }
        }
        Err(_) => default,
    }
}

pub fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_bool_parses_common_spellings() {
        std::env::set_var("REVERIE_TEST_FLAG_A", "TRUE");
        std::env::set_var("REVERIE_TEST_FLAG_B", "0");
        std::env::set_var("REVERIE_TEST_FLAG_C", "  ");
        assert!(env_bool("REVERIE_TEST_FLAG_A", false));
        assert!(!env_bool("REVERIE_TEST_FLAG_B", true));
        assert!(env_bool("REVERIE_TEST_FLAG_C", true));
        assert!(!env_bool("REVERIE_TEST_FLAG_UNSET", false));
    }

    #[test]
    fn env_url_trims_trailing_slash() {
        std::env::set_var("REVERIE_TEST_URL", "http://10.0.0.2:7860/ ");
        assert_eq!(env_url("REVERIE_TEST_URL", "x".into()), "http://10.0.0.2:7860");
        assert_eq!(env_url("REVERIE_TEST_URL_UNSET", "x".into()), "x");
    }

    #[test]
    fn requires_password_ignores_empty() {
        let mut cfg = ReverieConfig::load().expect("defaults load");
        cfg.remote_password = Some(String::new());
        assert!(!cfg.requires_password());
        cfg.remote_password = Some("hunter2".into());
        assert!(cfg.requires_password());
    }
}
