//! Anthropic Messages API backend. The system prompt travels in its own field.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{model_id, ChatBackend, ChatRequest, ProviderKind};
use crate::error::{ReverieError, ReverieResult};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicBackend {
    api_key: String,
    url: String,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key: api_key.trim().to_string(),
            url: ANTHROPIC_API_URL.to_string(),
            client,
        }
    }
}

fn request_body<'a>(request: &'a ChatRequest) -> MessagesRequest<'a> {
    MessagesRequest {
        model: model_id(&request.model),
        messages: request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect(),
        system: &request.system,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
    }
}

/// Concatenate every `text` block of the reply.
fn extract_text(raw: &str) -> ReverieResult<String> {
    let parsed: MessagesResponse =
        serde_json::from_str(raw).map_err(|e| ReverieError::Malformed(e.to_string()))?;
    let text: Vec<String> = parsed
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect();
    if text.is_empty() {
        return Err(ReverieError::Malformed("response has no text content block".into()));
    }
    Ok(text.join("").trim().to_string())
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    async fn chat(&self, request: &ChatRequest) -> ReverieResult<String> {
        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request_body(request))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ReverieError::from_response(response).await);
        }
        let raw = response.text().await?;
        extract_text(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChatMessage;

    #[test]
    fn system_is_a_separate_field() {
        let request = ChatRequest {
            messages: vec![ChatMessage::user("hello")],
            system: "You are Alpha.".into(),
            model: "claude-3-5-sonnet-20241022 (35sonnet)".into(),
            max_tokens: 1024,
            temperature: 0.7,
        };
        let body = serde_json::to_value(request_body(&request)).unwrap();
        assert_eq!(body["system"], "You are Alpha.");
        assert_eq!(body["model"], "claude-3-5-sonnet-20241022");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn text_blocks_are_joined() {
        let raw = r#"{"content":[{"type":"text","text":"Hi "},{"type":"tool_use","id":"x"},{"type":"text","text":"there"}]}"#;
        assert_eq!(extract_text(raw).unwrap(), "Hi there");
        assert!(matches!(extract_text(r#"{"content":[]}"#), Err(ReverieError::Malformed(_))));
    }
}
