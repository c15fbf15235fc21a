//! **Video Synthesizer**: talking-head clips from the session's latest image and audio.
//!
//! Every backend is a submit + poll adapter behind [`VideoBackend`]; the synthesizer checks
//! preconditions, derives a one-sentence action prompt, drives the [`Poller`], downloads the
//! result and writes `<backend>_video_<timestamp>.mp4`. Remote jobs are never retried.

pub mod hedra;
pub mod lora;
pub mod replicate;
pub mod wavespeed;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use reverie_core::prompts::{
    video_action_prompt, video_prompt_from_reply, VIDEO_ACTION_FALLBACK, VIDEO_ACTION_SYSTEM,
};
use reverie_core::{Credentials, Endpoints, ProviderRouter, ReverieError, ReverieResult, SessionSnapshot};

use crate::artifact;
use crate::jobs::{JobState, Poller};
use crate::wavespeed::WaveSpeedClient;
pub use lora::{rewrite_lora_url, LoraVideoRequest, LoraWeight, WanModel};

pub const NO_RECENT_IMAGE: &str = "No recent image. Generate an image first.";
pub const NO_RECENT_AUDIO: &str = "No recent audio. Generate speech first.";
pub const NO_RECENT_VIDEO: &str = "No recent video. Generate a video first.";

/// Transcript entries fed to the action-prompt pass.
const ACTION_CONTEXT_MESSAGES: usize = 6;
const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VideoFamily {
    WaveSpeed,
    Hedra,
    Replicate,
}

/// Local files handed to a backend.
#[derive(Debug, Clone, Default)]
pub struct VideoInputs {
    pub image: Option<PathBuf>,
    pub audio: Option<PathBuf>,
    pub video: Option<PathBuf>,
    pub prompt: Option<String>,
}

impl VideoInputs {
    pub fn image_and_audio(&self) -> ReverieResult<(&Path, &Path)> {
        let image = self
            .image
            .as_deref()
            .ok_or_else(|| ReverieError::PreconditionMissing(NO_RECENT_IMAGE.into()))?;
        let audio = self
            .audio
            .as_deref()
            .ok_or_else(|| ReverieError::PreconditionMissing(NO_RECENT_AUDIO.into()))?;
        Ok((image, audio))
    }
}

#[async_trait]
pub trait VideoBackend: Send + Sync {
    fn key(&self) -> &str;
    fn family(&self) -> VideoFamily;
    fn poll_interval(&self) -> Duration;

    fn max_wait(&self) -> Duration {
        DEFAULT_MAX_WAIT
    }

    /// Start a job; returns the vendor's job id.
    async fn submit(&self, inputs: &VideoInputs) -> ReverieResult<String>;

    async fn poll(&self, job_id: &str) -> ReverieResult<JobState>;
}

#[derive(Debug, Clone)]
pub struct GeneratedVideo {
    pub path: PathBuf,
    pub prompt: Option<String>,
    pub model: String,
}

pub struct VideoSynthesizer {
    router: Arc<ProviderRouter>,
    talking_heads: BTreeMap<String, Arc<dyn VideoBackend>>,
    lipsync: BTreeMap<String, Arc<dyn VideoBackend>>,
    replicate: Option<Arc<replicate::ReplicateClient>>,
    civitai_token: Option<String>,
    client: reqwest::Client,
    max_wait: Option<Duration>,
}

impl VideoSynthesizer {
    pub fn new(router: Arc<ProviderRouter>) -> Self {
        Self {
            router,
            talking_heads: BTreeMap::new(),
            lipsync: BTreeMap::new(),
            replicate: None,
            civitai_token: None,
            client: artifact::media_client(),
            max_wait: None,
        }
    }

    /// Register every vendor adapter. Keys are validated at submit time, so adapters exist even
    /// when their credential is missing.
    pub fn from_credentials(
        router: Arc<ProviderRouter>,
        credentials: &Credentials,
        endpoints: &Endpoints,
    ) -> Self {
        let wavespeed = Arc::new(WaveSpeedClient::new(
            &endpoints.wavespeed_url,
            credentials.wavespeed_api_key.clone(),
        ));
        let replicate = Arc::new(replicate::ReplicateClient::new(
            &endpoints.replicate_url,
            credentials.replicate_api_token.clone(),
        ));
        let mut synth = Self::new(router)
            .with_replicate(replicate.clone())
            .with_civitai_token(credentials.civitai_token.clone())
            .with_talking_head(Arc::new(hedra::HedraVideo::new(
                &endpoints.hedra_url,
                credentials.hedra_api_key.clone(),
            )))
            .with_talking_head(Arc::new(replicate::SadTalkerVideo::new(replicate.clone())))
            .with_lipsync(Arc::new(wavespeed::WaveSpeedLipsync::new(wavespeed.clone())))
            .with_lipsync(Arc::new(replicate::LatentSyncLipsync::new(replicate)));
        for backend in wavespeed::WaveSpeedVideo::all(&wavespeed) {
            synth = synth.with_talking_head(backend);
        }
        synth
    }

    pub fn with_talking_head(mut self, backend: Arc<dyn VideoBackend>) -> Self {
        self.talking_heads.insert(backend.key().to_string(), backend);
        self
    }

    pub fn with_lipsync(mut self, backend: Arc<dyn VideoBackend>) -> Self {
        self.lipsync.insert(backend.key().to_string(), backend);
        self
    }

    pub fn with_replicate(mut self, client: Arc<replicate::ReplicateClient>) -> Self {
        self.replicate = Some(client);
        self
    }

    pub fn with_civitai_token(mut self, token: Option<String>) -> Self {
        self.civitai_token = token;
        self
    }

    /// Cap every job's overall deadline (tests, impatient deployments).
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn talking_head_models(&self) -> Vec<&str> {
        self.talking_heads.keys().map(String::as_str).collect()
    }

    pub fn lipsync_models(&self) -> Vec<&str> {
        self.lipsync.keys().map(String::as_str).collect()
    }

    fn lookup<'a>(
        registry: &'a BTreeMap<String, Arc<dyn VideoBackend>>,
        key: &str,
        family: Option<VideoFamily>,
    ) -> ReverieResult<&'a Arc<dyn VideoBackend>> {
        registry
            .get(key)
            .filter(|b| family.map_or(true, |f| b.family() == f))
            .ok_or_else(|| {
                let known: Vec<&str> = registry
                    .values()
                    .filter(|b| family.map_or(true, |f| b.family() == f))
                    .map(|b| b.key())
                    .collect();
                ReverieError::UnsupportedModel(format!("'{key}' (available: {})", known.join(", ")))
            })
    }

    /// One sentence on what the character is doing, from the last few messages.
    pub async fn action_prompt(&self, snapshot: &SessionSnapshot) -> String {
        let Some(request) = video_action_prompt(snapshot.recent_messages(ACTION_CONTEXT_MESSAGES)) else {
            return VIDEO_ACTION_FALLBACK.to_string();
        };
        match self.router.auxiliary(VIDEO_ACTION_SYSTEM, &request, 150, 0.7).await {
            Ok(reply) => video_prompt_from_reply(&reply),
            Err(err) => {
                tracing::warn!(target: "reverie::video", error = %err, "Action prompt failed, using fallback");
                VIDEO_ACTION_FALLBACK.to_string()
            }
        }
    }

    /// Talking-head clip from the latest image and audio. `family` restricts the usable keys.
    pub async fn generate(
        &self,
        snapshot: &SessionSnapshot,
        model_key: &str,
        family: Option<VideoFamily>,
        cancel: &CancellationToken,
    ) -> ReverieResult<GeneratedVideo> {
        let image = snapshot
            .last_image_path
            .clone()
            .ok_or_else(|| ReverieError::PreconditionMissing(NO_RECENT_IMAGE.into()))?;
        let audio = snapshot
            .last_audio_path
            .clone()
            .ok_or_else(|| ReverieError::PreconditionMissing(NO_RECENT_AUDIO.into()))?;
        let backend = Self::lookup(&self.talking_heads, model_key, family)?;

        snapshot.set_status("Writing video prompt");
        let prompt = self.action_prompt(snapshot).await;
        let inputs = VideoInputs {
            image: Some(image),
            audio: Some(audio),
            video: None,
            prompt: Some(prompt.clone()),
        };
        let path = self.run(snapshot, backend.as_ref(), &inputs, cancel).await?;
        Ok(GeneratedVideo {
            path,
            prompt: Some(prompt),
            model: model_key.to_string(),
        })
    }

    /// Re-sync the latest video's mouth to the latest audio.
    pub async fn lipsync(
        &self,
        snapshot: &SessionSnapshot,
        model_key: &str,
        cancel: &CancellationToken,
    ) -> ReverieResult<GeneratedVideo> {
        let video = snapshot
            .last_video_path
            .clone()
            .ok_or_else(|| ReverieError::PreconditionMissing(NO_RECENT_VIDEO.into()))?;
        let audio = snapshot
            .last_audio_path
            .clone()
            .ok_or_else(|| ReverieError::PreconditionMissing(NO_RECENT_AUDIO.into()))?;
        let backend = Self::lookup(&self.lipsync, model_key, None)?;
        let inputs = VideoInputs {
            image: None,
            audio: Some(audio),
            video: Some(video),
            prompt: None,
        };
        let path = self.run(snapshot, backend.as_ref(), &inputs, cancel).await?;
        Ok(GeneratedVideo {
            path,
            prompt: None,
            model: model_key.to_string(),
        })
    }

    /// Image-to-video with up to two LoRAs, starting from the latest image.
    pub async fn generate_lora(
        &self,
        snapshot: &SessionSnapshot,
        mut request: LoraVideoRequest,
        cancel: &CancellationToken,
    ) -> ReverieResult<GeneratedVideo> {
        let image = snapshot
            .last_image_path
            .clone()
            .ok_or_else(|| ReverieError::PreconditionMissing(NO_RECENT_IMAGE.into()))?;
        let api = self
            .replicate
            .as_ref()
            .ok_or_else(|| ReverieError::BackendUnavailable("Replicate is not configured".into()))?;
        if request.loras.len() > 2 {
            return Err(ReverieError::PreconditionMissing("At most two LoRAs are supported".into()));
        }
        if request.prompt.trim().is_empty() {
            request.prompt = self.action_prompt(snapshot).await;
        }

        snapshot.set_status("Submitting LoRA video");
        let input = lora::prediction_input(
            &request,
            artifact::data_uri(&image).await?,
            self.civitai_token.as_deref(),
        );
        let model = request.model.replicate_model();
        let id = api.create_model(model, input).await?;
        let poller = Poller::new(
            Duration::from_secs(3),
            self.max_wait.unwrap_or(DEFAULT_MAX_WAIT),
        );
        let url = poller
            .wait(model, cancel, || api.prediction(&id), |s| progress_status(snapshot, s))
            .await;
        let path = self.finish(snapshot, "wan", url).await?;
        Ok(GeneratedVideo {
            path,
            prompt: Some(request.prompt),
            model: request.model.key().to_string(),
        })
    }

    async fn run(
        &self,
        snapshot: &SessionSnapshot,
        backend: &dyn VideoBackend,
        inputs: &VideoInputs,
        cancel: &CancellationToken,
    ) -> ReverieResult<PathBuf> {
        snapshot.set_status(&format!("Submitting {} video", backend.key()));
        let job_id = match backend.submit(inputs).await {
            Ok(id) => id,
            Err(err) => {
                snapshot.set_status("Video generation failed");
                return Err(err);
            }
        };
        tracing::info!(target: "reverie::video", backend = backend.key(), job = %job_id, "Video job submitted");
        let poller = Poller::new(
            backend.poll_interval(),
            self.max_wait.unwrap_or_else(|| backend.max_wait()),
        );
        let url = poller
            .wait(
                backend.key(),
                cancel,
                || backend.poll(&job_id),
                |s| progress_status(snapshot, s),
            )
            .await;
        self.finish(snapshot, backend.key(), url).await
    }

    async fn finish(
        &self,
        snapshot: &SessionSnapshot,
        prefix: &str,
        url: ReverieResult<String>,
    ) -> ReverieResult<PathBuf> {
        let url = match url {
            Ok(url) => url,
            Err(err) => {
                snapshot.set_status(match err {
                    ReverieError::Cancelled => "Video cancelled",
                    ReverieError::Timeout(_) => "Video timed out",
                    _ => "Video generation failed",
                });
                return Err(err);
            }
        };
        snapshot.set_status("Downloading video");
        let bytes = artifact::download(&self.client, &url).await?;
        let path = artifact::write_artifact(
            &snapshot.folder,
            &format!("{}_video", artifact_prefix(prefix)),
            "mp4",
            &bytes,
        )
        .await?;
        snapshot.set_status("Video ready");
        tracing::info!(target: "reverie::video", session = %snapshot.id, file = %path.display(), "Video saved");
        Ok(path)
    }
}

fn progress_status(snapshot: &SessionSnapshot, state: &JobState) {
    if let Some(p) = state.progress {
        snapshot.set_status(&format!("Generating video: {:.0}%", p * 100.0));
    }
}

/// Backend keys as filename prefixes: `wan-s2v` becomes `wan_s2v`.
fn artifact_prefix(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
