//! OpenRouter chat backend. Model ids are namespaced (`vendor/model`).

use async_trait::async_trait;
use std::time::Duration;

use super::{openai_compat, ChatBackend, ChatRequest, ProviderKind};
use crate::error::ReverieResult;

const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

pub struct OpenRouterBackend {
    api_key: String,
    base_url: String,
    title: String,
    referer: Option<String>,
    client: reqwest::Client,
}

impl OpenRouterBackend {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key: api_key.trim().to_string(),
            base_url: OPENROUTER_API_BASE.to_string(),
            title: "Reverie".to_string(),
            referer: None,
            client,
        }
    }

    /// `X-Title` and optional `HTTP-Referer` identify the app on the OpenRouter dashboard.
    pub fn with_attribution(mut self, title: &str, referer: Option<String>) -> Self {
        self.title = title.to_string();
        self.referer = referer;
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ChatBackend for OpenRouterBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenRouter
    }

    async fn chat(&self, request: &ChatRequest) -> ReverieResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", &self.title);
        if let Some(referer) = &self.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        let body = openai_compat::completion_body(request);
        openai_compat::send(builder, &body).await
    }
}
