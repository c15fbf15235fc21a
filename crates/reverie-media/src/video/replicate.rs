//! Replicate predictions: SadTalker talking heads, LatentSync lipsync and the Wan
//! image-to-video models used for LoRA clips.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use reverie_core::{ReverieError, ReverieResult};

use super::{VideoBackend, VideoFamily, VideoInputs};
use crate::artifact;
use crate::jobs::{JobState, JobStatus};

pub const SADTALKER_KEY: &str = "sadtalker";
pub const LATENTSYNC_KEY: &str = "latentsync";
const SADTALKER_VERSION: &str = "a519cc0cfebaaeade068b23899165a11ec76aaa1d2b313d40d214f204ec957a3";
const LATENTSYNC_VERSION: &str = "839aba2e94ed8b18657a685c07f532946337e93c216e152c0bdf7b66cb54877d";
const POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct ReplicateClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ReplicateClient {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            client: artifact::media_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn auth(&self) -> ReverieResult<String> {
        self.token
            .as_deref()
            .map(|t| format!("Token {t}"))
            .ok_or_else(|| ReverieError::BackendUnavailable("REPLICATE_API_TOKEN is not set".into()))
    }

    /// Prediction against a pinned model version.
    pub async fn create_version(&self, version: &str, input: Value) -> ReverieResult<String> {
        let url = format!("{}/v1/predictions", self.base_url);
        self.create(&url, json!({ "version": version, "input": input })).await
    }

    /// Prediction against the latest version of `owner/name`.
    pub async fn create_model(&self, model: &str, input: Value) -> ReverieResult<String> {
        let url = format!("{}/v1/models/{model}/predictions", self.base_url);
        self.create(&url, json!({ "input": input })).await
    }

    async fn create(&self, url: &str, body: Value) -> ReverieResult<String> {
        let resp = self
            .client
            .post(url)
            .header("Authorization", self.auth()?)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ReverieError::from_response(resp).await);
        }
        let prediction: Value = resp.json().await?;
        prediction
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ReverieError::Malformed("Replicate returned no prediction id".into()))
    }

    pub async fn prediction(&self, id: &str) -> ReverieResult<JobState> {
        let resp = self
            .client
            .get(format!("{}/v1/predictions/{id}", self.base_url))
            .header("Authorization", self.auth()?)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ReverieError::from_response(resp).await);
        }
        let body: Value = resp.json().await?;
        Ok(parse_prediction(&body))
    }
}

pub fn parse_prediction(body: &Value) -> JobState {
    match body.get("status").and_then(Value::as_str).unwrap_or_default() {
        "succeeded" => {
            let url = match body.get("output") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Array(items)) => items.first().and_then(Value::as_str).map(str::to_string),
                _ => None,
            };
            match url {
                Some(url) => JobState::completed(url),
                None => JobState::pending(JobStatus::Completed),
            }
        }
        status @ ("failed" | "canceled") => JobState::failed(
            body.get("error")
                .and_then(Value::as_str)
                .unwrap_or(status),
        ),
        "processing" => JobState::pending(JobStatus::Processing),
        _ => JobState::pending(JobStatus::Created),
    }
}

pub struct SadTalkerVideo {
    api: Arc<ReplicateClient>,
}

impl SadTalkerVideo {
    pub fn new(api: Arc<ReplicateClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl VideoBackend for SadTalkerVideo {
    fn key(&self) -> &str {
        SADTALKER_KEY
    }

    fn family(&self) -> VideoFamily {
        VideoFamily::Replicate
    }

    fn poll_interval(&self) -> Duration {
        POLL_INTERVAL
    }

    async fn submit(&self, inputs: &VideoInputs) -> ReverieResult<String> {
        let (image, audio) = inputs.image_and_audio()?;
        let input = json!({
            "driven_audio": artifact::data_uri(audio).await?,
            "source_image": artifact::data_uri(image).await?,
            "facerender": "facevid2vid",
            "preprocess": "crop",
            "still_mode": false,
            "use_enhancer": false,
            "use_eyeblink": true,
            "size_of_image": 256,
            "pose_style": 38,
            "expression_scale": 1.2,
        });
        self.api.create_version(SADTALKER_VERSION, input).await
    }

    async fn poll(&self, job_id: &str) -> ReverieResult<JobState> {
        self.api.prediction(job_id).await
    }
}

pub struct LatentSyncLipsync {
    api: Arc<ReplicateClient>,
}

impl LatentSyncLipsync {
    pub fn new(api: Arc<ReplicateClient>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl VideoBackend for LatentSyncLipsync {
    fn key(&self) -> &str {
        LATENTSYNC_KEY
    }

    fn family(&self) -> VideoFamily {
        VideoFamily::Replicate
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
        let input = json!({
            "audio": artifact::data_uri(audio).await?,
            "video": artifact::data_uri(video).await?,
        });
        self.api.create_version(LATENTSYNC_VERSION, input).await
    }

    async fn poll(&self, job_id: &str) -> ReverieResult<JobState> {
        self.api.prediction(job_id).await
    }
}
