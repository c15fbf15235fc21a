//! WaveSpeed talking-head models and the veed lipsync model.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use reverie_core::{ReverieError, ReverieResult};

use super::{VideoBackend, VideoFamily, VideoInputs};
use crate::artifact;
use crate::jobs::JobState;
use crate::wavespeed::WaveSpeedClient;

/// `(key, model path)` for the audio-driven portrait models.
pub const TALKING_HEAD_MODELS: [(&str, &str); 4] = [
    ("infinitetalk", "wavespeed-ai/infinitetalk"),
    ("infinitetalk-fast", "wavespeed-ai/infinitetalk-fast"),
    ("hunyuan-avatar", "wavespeed-ai/hunyuan-avatar"),
    ("wan-s2v", "wavespeed-ai/wan-2.2/speech-to-video"),
];

pub const VEED_LIPSYNC: (&str, &str) = ("veed-lipsync", "veed/lipsync");

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const RESOLUTION: &str = "480p";

pub struct WaveSpeedVideo {
    key: &'static str,
    model_path: &'static str,
    api: Arc<WaveSpeedClient>,
}

impl WaveSpeedVideo {
    pub fn new(key: &'static str, model_path: &'static str, api: Arc<WaveSpeedClient>) -> Self {
        Self { key, model_path, api }
    }

    /// One adapter per talking-head model.
    pub fn all(api: &Arc<WaveSpeedClient>) -> Vec<Arc<dyn VideoBackend>> {
        TALKING_HEAD_MODELS
            .iter()
            .map(|&(key, path)| Arc::new(Self::new(key, path, api.clone())) as Arc<dyn VideoBackend>)
            .collect()
    }
}

#[async_trait]
impl VideoBackend for WaveSpeedVideo {
    fn key(&self) -> &str {
        self.key
    }

    fn family(&self) -> VideoFamily {
        VideoFamily::WaveSpeed
    }

    fn poll_interval(&self) -> Duration {
        POLL_INTERVAL
    }

    async fn submit(&self, inputs: &VideoInputs) -> ReverieResult<String> {
        let (image, audio) = inputs.image_and_audio()?;
        let mut payload = json!({
            "image": artifact::data_uri(image).await?,
            "audio": artifact::data_uri(audio).await?,
            "resolution": RESOLUTION,
            "seed": -1,
        });
        if let Some(prompt) = inputs.prompt.as_deref().filter(|p| !p.is_empty()) {
            payload["prompt"] = json!(prompt);
        }
        self.api.submit(self.model_path, &payload).await
    }

    async fn poll(&self, job_id: &str) -> ReverieResult<JobState> {
        self.api.result(job_id).await
    }
}

pub struct WaveSpeedLipsync {
    api: Arc<WaveSpeedClient>,
}

impl WaveSpeedLipsync {
    pub fn new(api: Arc<WaveSpeedClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl VideoBackend for WaveSpeedLipsync {
    fn key(&self) -> &str {
        VEED_LIPSYNC.0
    }

    fn family(&self) -> VideoFamily {
        VideoFamily::WaveSpeed
    }

    fn poll_interval(&self) -> Duration {
        POLL_INTERVAL
    }

    async fn submit(&self, inputs: &VideoInputs) -> ReverieResult<String> {
        let video = inputs
            .video
            .as_deref()
            .ok_or_else(|| ReverieError::PreconditionMissing(super::NO_RECENT_VIDEO.into()))?;
        let audio = inputs
            .audio
            .as_deref()
            .ok_or_else(|| ReverieError::PreconditionMissing(super::NO_RECENT_AUDIO.into()))?;
        let payload = json!({
            "video": artifact::data_uri(video).await?,
            "audio": artifact::data_uri(audio).await?,
        });
        self.api.submit(VEED_LIPSYNC.1, &payload).await
    }

    async fn poll(&self, job_id: &str) -> ReverieResult<JobState> {
        self.api.result(job_id).await
    }
}
