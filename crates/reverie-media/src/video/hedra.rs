//! Hedra character video: upload audio and portrait (multipart), create a job, poll the project.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use reverie_core::{ReverieError, ReverieResult};

use super::{VideoBackend, VideoFamily, VideoInputs};
use crate::artifact;
use crate::jobs::{JobState, JobStatus};

pub const HEDRA_KEY: &str = "hedra";
const ASPECT_RATIO: &str = "1:1";

pub struct HedraVideo {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HedraVideo {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: artifact::media_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn api_key(&self) -> ReverieResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ReverieError::BackendUnavailable("HEDRA_API_KEY is not set".into()))
    }

    /// Upload one file; returns the hosted URL.
    async fn upload(&self, endpoint: &str, path: &Path, query: &[(&str, &str)]) -> ReverieResult<String> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let part = Part::bytes(bytes)
            .file_name(filename)
            .mime_str(artifact::mime_for(path))?;
        let resp = self
            .client
            .post(format!("{}{endpoint}", self.base_url))
            .header("X-API-KEY", self.api_key()?)
            .query(query)
            .multipart(Form::new().part("file", part))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ReverieError::from_response(resp).await);
        }
        let body: Value = resp.json().await?;
        body.get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ReverieError::Malformed(format!("Hedra upload to {endpoint} returned no url")))
    }
}

pub fn parse_project(body: &Value) -> JobState {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();
    let progress = body.get("progress").and_then(Value::as_f64).map(|p| p as f32);
    match status.as_str() {
        "completed" => match body.get("videoUrl").and_then(Value::as_str) {
            Some(url) => JobState::completed(url),
            None => JobState {
                status: JobStatus::Completed,
                progress,
                output_url: None,
                error: None,
            },
        },
        "failed" => JobState::failed(
            body.get("errorMessage")
                .and_then(Value::as_str)
                .unwrap_or("unknown error"),
        ),
        "" | "queued" | "pending" => JobState {
            progress,
            ..JobState::pending(JobStatus::Created)
        },
        _ => JobState {
            progress,
            ..JobState::pending(JobStatus::Processing)
        },
    }
}

#[async_trait]
impl VideoBackend for HedraVideo {
    fn key(&self) -> &str {
        HEDRA_KEY
    }

    fn family(&self) -> VideoFamily {
        VideoFamily::Hedra
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(5)
    }

    fn max_wait(&self) -> Duration {
        Duration::from_secs(300)
    }

    async fn submit(&self, inputs: &VideoInputs) -> ReverieResult<String> {
        let (image, audio) = inputs.image_and_audio()?;
        let audio_url = self.upload("/v1/audio", audio, &[]).await?;
        let portrait_url = self
            .upload("/v1/portrait", image, &[("aspect_ratio", ASPECT_RATIO)])
            .await?;
        let resp = self
            .client
            .post(format!("{}/v1/characters", self.base_url))
            .header("X-API-KEY", self.api_key()?)
            .json(&json!({
                "avatarImage": portrait_url,
                "audioSource": "audio",
                "voiceUrl": audio_url,
                "aspectRatio": ASPECT_RATIO,
                "text": "",
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ReverieError::from_response(resp).await);
        }
        let body: Value = resp.json().await?;
        body.get("jobId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ReverieError::Malformed("Hedra returned no jobId".into()))
    }

    async fn poll(&self, job_id: &str) -> ReverieResult<JobState> {
        let resp = self
            .client
            .get(format!("{}/v1/projects/{job_id}", self.base_url))
            .header("X-API-KEY", self.api_key()?)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ReverieError::from_response(resp).await);
        }
        let body: Value = resp.json().await?;
        Ok(parse_project(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_states() {
        let done = parse_project(&json!({"status": "Completed", "videoUrl": "https://h/v.mp4"}));
        assert_eq!(done.output_url.as_deref(), Some("https://h/v.mp4"));
        let failed = parse_project(&json!({"status": "failed", "errorMessage": "no face"}));
        assert_eq!(failed.error.as_deref(), Some("no face"));
        let running = parse_project(&json!({"status": "processing", "progress": 0.5}));
        assert_eq!(running.status, JobStatus::Processing);
        assert_eq!(running.progress, Some(0.5));
    }
}
