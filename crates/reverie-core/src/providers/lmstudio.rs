//! LM Studio (or any OpenAI-compatible local server) chat backend with model discovery.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{openai_compat, ChatBackend, ChatRequest, ProviderKind};
use crate::error::{ReverieError, ReverieResult};

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

pub struct LmStudioBackend {
    /// Base including `/v1`, e.g. `http://localhost:1234/v1`.
    base_url: String,
    client: reqwest::Client,
}

impl LmStudioBackend {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let base = base_url.trim_end_matches('/');
        let base_url = if base.ends_with("/v1") {
            base.to_string()
        } else {
            format!("{base}/v1")
        };
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChatBackend for LmStudioBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LmStudio
    }

    async fn chat(&self, request: &ChatRequest) -> ReverieResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = openai_compat::completion_body(request);
        openai_compat::send(self.client.post(&url), &body).await
    }

    async fn list_models(&self) -> ReverieResult<Vec<String>> {
        let url = format!("{}/models", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ReverieError::from_response(response).await);
        }
        let list: ModelList = response
            .json()
            .await
            .map_err(|e| ReverieError::Malformed(e.to_string()))?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gains_v1_once() {
        assert_eq!(LmStudioBackend::new("http://localhost:1234").base_url(), "http://localhost:1234/v1");
        assert_eq!(LmStudioBackend::new("http://localhost:1234/v1/").base_url(), "http://localhost:1234/v1");
    }
}
