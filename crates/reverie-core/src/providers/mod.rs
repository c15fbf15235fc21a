//! Chat providers behind one contract: `chat(messages, system, model, max_tokens, temperature)`.
//!
//! Each adapter owns its vendor's request/response shapes. Anthropic takes the system prompt as
//! a separate field; the OpenAI-compatible family (OpenRouter, LM Studio) gets it as the first
//! message. The [`ProviderRouter`] picks a backend per [`Intent`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ReverieError, ReverieResult};

pub mod anthropic;
pub mod lmstudio;
pub mod openai_compat;
pub mod openrouter;
pub mod router;

pub use anthropic::AnthropicBackend;
pub use lmstudio::LmStudioBackend;
pub use openrouter::OpenRouterBackend;
pub use router::{apology_for, BackendSelection, Intent, ProviderRouter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// One chat call. `messages` never contains the system prompt; adapters place it.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub system: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Registered provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenRouter,
    LmStudio,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Anthropic,
        ProviderKind::OpenRouter,
        ProviderKind::LmStudio,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::LmStudio => "lmstudio",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ReverieError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "openrouter" => Ok(ProviderKind::OpenRouter),
            "lmstudio" | "lm studio" | "local" => Ok(ProviderKind::LmStudio),
            other => Err(ReverieError::UnsupportedModel(format!("unknown provider '{other}'"))),
        }
    }
}

/// Strip a display alias: `"claude-3-5-sonnet-20241022 (35sonnet)"` -> `"claude-3-5-sonnet-20241022"`.
pub fn model_id(model: &str) -> &str {
    model.split(" (").next().unwrap_or(model).trim()
}

/// A chat backend. Implementations map every failure onto the transport / remote / malformed
/// (or timeout) variants of [`ReverieError`].
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn chat(&self, request: &ChatRequest) -> ReverieResult<String>;

    /// Model discovery. Only the local family exposes it.
    async fn list_models(&self) -> ReverieResult<Vec<String>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_alias_is_stripped() {
        assert_eq!(
            model_id("claude-3-5-sonnet-20241022 (35sonnet)"),
            "claude-3-5-sonnet-20241022"
        );
        assert_eq!(model_id("cohere/command-r-plus"), "cohere/command-r-plus");
    }

    #[test]
    fn provider_names_parse_case_insensitively() {
        assert_eq!("Anthropic".parse::<ProviderKind>().unwrap(), ProviderKind::Anthropic);
        assert_eq!("OpenRouter".parse::<ProviderKind>().unwrap(), ProviderKind::OpenRouter);
        assert_eq!("LMStudio".parse::<ProviderKind>().unwrap(), ProviderKind::LmStudio);
        assert!("mystery".parse::<ProviderKind>().is_err());
    }
}
