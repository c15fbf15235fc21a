//! WaveSpeed REST client: `POST {base}/{model}` to submit, `GET {base}/predictions/{id}/result`
//! to poll. Inputs travel as base64 data URIs. Used by the cloud image, talking-head video and
//! lipsync adapters.

use serde_json::Value;

use reverie_core::{ReverieError, ReverieResult};

use crate::artifact;
use crate::jobs::{JobState, JobStatus};

#[derive(Debug, Clone)]
pub struct WaveSpeedClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl WaveSpeedClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: artifact::media_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn key(&self) -> ReverieResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ReverieError::BackendUnavailable("WAVESPEED_API_KEY is not set".into()))
    }

    /// Submit a task; returns the request id.
    pub async fn submit(&self, model_path: &str, payload: &Value) -> ReverieResult<String> {
        let url = format!("{}/{model_path}", self.base_url);
        tracing::info!(target: "reverie::video", model = model_path, "Submitting WaveSpeed task");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.key()?)
            .json(payload)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ReverieError::from_response(resp).await);
        }
        let body: Value = resp.json().await?;
        request_id(&body)
            .ok_or_else(|| ReverieError::Malformed(format!("no request id in WaveSpeed response: {body}")))
    }

    pub async fn result(&self, request_id: &str) -> ReverieResult<JobState> {
        let url = format!("{}/predictions/{request_id}/result", self.base_url);
        let resp = self.client.get(&url).bearer_auth(self.key()?).send().await?;
        if !resp.status().is_success() {
            return Err(ReverieError::from_response(resp).await);
        }
        let body: Value = resp.json().await?;
        Ok(parse_result(&body))
    }
}

/// Responses are usually wrapped in `data`, but not always.
fn unwrap_data(body: &Value) -> &Value {
    body.get("data").filter(|d| d.is_object()).unwrap_or(body)
}

pub fn request_id(body: &Value) -> Option<String> {
    let data = unwrap_data(body);
    ["id", "requestId", "request_id"]
        .iter()
        .find_map(|k| data.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

pub fn parse_result(body: &Value) -> JobState {
    let data = unwrap_data(body);
    let status = data.get("status").and_then(Value::as_str).unwrap_or_default();
    let progress = data
        .get("progress")
        .and_then(Value::as_f64)
        .map(|p| (if p > 1.0 { p / 100.0 } else { p }) as f32);
    match status {
        "completed" => match output_url(data) {
            Some(url) => JobState::completed(url),
            None => JobState {
                status: JobStatus::Completed,
                progress: Some(1.0),
                output_url: None,
                error: None,
            },
        },
        "failed" => JobState::failed(
            data.get("error")
                .and_then(Value::as_str)
                .filter(|e| !e.is_empty())
                .unwrap_or("unknown error"),
        ),
        "created" | "pending" | "queued" => JobState {
            progress,
            ..JobState::pending(JobStatus::Created)
        },
        other => {
            if other != "processing" {
                tracing::warn!(target: "reverie::video", status = other, "Unknown WaveSpeed status");
            }
            JobState {
                progress,
                ..JobState::pending(JobStatus::Processing)
            }
        }
    }
}

/// `output` or `outputs`, as a string, `{video|url}` object or list.
fn output_url(data: &Value) -> Option<String> {
    let output = data
        .get("output")
        .filter(|v| !v.is_null())
        .or_else(|| data.get("outputs"))?;
    match output {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("video")
            .or_else(|| map.get("url"))
            .and_then(Value::as_str)
            .map(str::to_string),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_id_from_any_spelling() {
        assert_eq!(request_id(&json!({"data": {"id": "a1"}})).as_deref(), Some("a1"));
        assert_eq!(request_id(&json!({"requestId": "b2"})).as_deref(), Some("b2"));
        assert_eq!(request_id(&json!({"data": {"request_id": "c3"}})).as_deref(), Some("c3"));
        assert_eq!(request_id(&json!({"data": {}})), None);
    }

    #[test]
    fn result_states() {
        let done = parse_result(&json!({"data": {"status": "completed", "outputs": ["https://x/v.mp4"]}}));
        assert_eq!(done, JobState::completed("https://x/v.mp4"));

        let nested = parse_result(&json!({"status": "completed", "output": {"video": "https://x/w.mp4"}}));
        assert_eq!(nested.output_url.as_deref(), Some("https://x/w.mp4"));

        let failed = parse_result(&json!({"data": {"status": "failed", "error": "bad audio"}}));
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("bad audio"));

        let queued = parse_result(&json!({"data": {"status": "queued"}}));
        assert_eq!(queued.status, JobStatus::Created);

        let running = parse_result(&json!({"data": {"status": "processing", "progress": 40}}));
        assert_eq!(running.status, JobStatus::Processing);
        assert_eq!(running.progress, Some(0.4));
    }
}
