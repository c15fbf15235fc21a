//! Provider Router: two independent selection slots (conversation, auxiliary) over one
//! registry of chat backends.
//!
//! Conversation calls never fail from the caller's point of view: [`ProviderRouter::converse`]
//! turns every error into an apology so the transcript always advances. Auxiliary calls
//! (prompt shaping for speech, image and video) return the error so media code can decide.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{
    AnthropicBackend, ChatBackend, ChatMessage, ChatRequest, LmStudioBackend, OpenRouterBackend,
    ProviderKind,
};
use crate::config::{Credentials, Endpoints};
use crate::error::{ErrorKind, ReverieError, ReverieResult};
use crate::retry::{retry_with_backoff, RetryPolicy};

const CONVERSATION_MAX_TOKENS: u32 = 1024;
const CONVERSATION_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Conversation,
    Auxiliary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSelection {
    pub provider: ProviderKind,
    pub model: String,
}

impl BackendSelection {
    pub fn new(provider: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

/// User-visible reply for a failed conversation call, phrased for the failure kind.
pub fn apology_for(err: &ReverieError) -> String {
    match err.kind() {
        ErrorKind::Transport => {
            "Sorry, I couldn't reach the language model just now. Please check the connection and try again.".to_string()
        }
        ErrorKind::Timeout => {
            "Sorry, the language model took too long to answer. Please try again.".to_string()
        }
        ErrorKind::RemoteError => match err {
            ReverieError::Remote { status, .. } => format!(
                "Sorry, the language model service returned an error (HTTP {status}). Please try again or switch providers."
            ),
            _ => "Sorry, the language model service returned an error.".to_string(),
        },
        ErrorKind::Malformed => {
            "Sorry, I received an unexpected response from the language model. Please try again.".to_string()
        }
        ErrorKind::UnsupportedModel | ErrorKind::BackendUnavailable => {
            "Sorry, the selected language model isn't available. Please choose another provider.".to_string()
        }
        _ => "Sorry, something went wrong while generating a reply.".to_string(),
    }
}

pub struct ProviderRouter {
    backends: BTreeMap<ProviderKind, Arc<dyn ChatBackend>>,
    conversation: RwLock<BackendSelection>,
    auxiliary: RwLock<BackendSelection>,
    retry: RetryPolicy,
}

impl ProviderRouter {
    pub fn new(conversation: BackendSelection, auxiliary: BackendSelection) -> Self {
        Self {
            backends: BTreeMap::new(),
            conversation: RwLock::new(conversation),
            auxiliary: RwLock::new(auxiliary),
            retry: RetryPolicy::default(),
        }
    }

    /// Register every backend whose credentials are present. LM Studio needs none.
    pub fn from_credentials(
        credentials: &Credentials,
        endpoints: &Endpoints,
        conversation: BackendSelection,
        auxiliary: BackendSelection,
    ) -> Self {
        let mut router = Self::new(conversation, auxiliary)
            .with_backend(Arc::new(LmStudioBackend::new(&endpoints.lmstudio_url)));
        if let Some(key) = &credentials.anthropic_api_key {
            router = router.with_backend(Arc::new(AnthropicBackend::new(key.clone())));
        }
        if let Some(key) = &credentials.openrouter_api_key {
            router = router.with_backend(Arc::new(
                OpenRouterBackend::new(key.clone())
                    .with_attribution(&endpoints.openrouter_title, endpoints.openrouter_referer.clone()),
            ));
        }
        tracing::info!(
            target: "reverie::router",
            backends = ?router.registered(),
            "Chat backends registered"
        );
        router
    }

    pub fn with_backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.backends.insert(backend.kind(), backend);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registered(&self) -> Vec<ProviderKind> {
        self.backends.keys().copied().collect()
    }

    fn slot(&self, intent: Intent) -> &RwLock<BackendSelection> {
        match intent {
            Intent::Conversation => &self.conversation,
            Intent::Auxiliary => &self.auxiliary,
        }
    }

    pub async fn selection(&self, intent: Intent) -> BackendSelection {
        self.slot(intent).read().await.clone()
    }

    /// Switch one slot. Affects only calls made after this returns.
    pub async fn select(&self, intent: Intent, selection: BackendSelection) -> ReverieResult<()> {
        if !self.backends.contains_key(&selection.provider) {
            return Err(ReverieError::UnsupportedModel(format!(
                "provider '{}' is not configured",
                selection.provider
            )));
        }
        tracing::info!(
            target: "reverie::router",
            ?intent,
            provider = %selection.provider,
            model = %selection.model,
            "Backend selection changed"
        );
        *self.slot(intent).write().await = selection;
        Ok(())
    }

    fn backend(&self, provider: ProviderKind) -> ReverieResult<&Arc<dyn ChatBackend>> {
        self.backends.get(&provider).ok_or_else(|| {
            ReverieError::BackendUnavailable(format!("provider '{provider}' is not configured"))
        })
    }

    /// Raw call through the slot for `intent`, retrying transient transport failures.
    pub async fn chat(
        &self,
        intent: Intent,
        history: &[ChatMessage],
        current: &str,
        system: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> ReverieResult<String> {
        let selection = self.selection(intent).await;
        let backend = self.backend(selection.provider)?;
        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(current));
        let request = ChatRequest {
            messages,
            system: system.to_string(),
            model: selection.model.clone(),
            max_tokens,
            temperature,
        };
        tracing::debug!(
            target: "reverie::router",
            ?intent,
            provider = %selection.provider,
            model = %selection.model,
            messages = request.messages.len(),
            "Dispatching chat request"
        );
        retry_with_backoff(&self.retry, selection.provider.as_str(), |_| backend.chat(&request)).await
    }

    /// Conversation turn. Always returns text: the reply, or an apology for the failure kind.
    pub async fn converse(&self, history: &[ChatMessage], current: &str, system: &str) -> String {
        match self
            .chat(
                Intent::Conversation,
                history,
                current,
                system,
                CONVERSATION_MAX_TOKENS,
                CONVERSATION_TEMPERATURE,
            )
            .await
        {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(target: "reverie::router", error = %err, "Conversation call failed");
                apology_for(&err)
            }
        }
    }

    /// Prompt-shaping call: single user message, no history.
    pub async fn auxiliary(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> ReverieResult<String> {
        self.chat(Intent::Auxiliary, &[], user, system, max_tokens, temperature)
            .await
    }

    pub async fn list_models(&self, provider: ProviderKind) -> ReverieResult<Vec<String>> {
        self.backend(provider)?.list_models().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records requests and replays a queue of canned results.
    struct Scripted {
        kind: ProviderKind,
        replies: Mutex<Vec<ReverieResult<String>>>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl Scripted {
        fn new(kind: ProviderKind, replies: Vec<ReverieResult<String>>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for Scripted {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn chat(&self, request: &ChatRequest) -> ReverieResult<String> {
            self.seen.lock().unwrap().push(request.clone());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Ok(format!("{} reply", self.kind))
            } else {
                replies.remove(0)
            }
        }
    }

    fn router_with(backends: Vec<Arc<Scripted>>) -> ProviderRouter {
        let mut router = ProviderRouter::new(
            BackendSelection::new(ProviderKind::Anthropic, "claude"),
            BackendSelection::new(ProviderKind::OpenRouter, "cheap/model"),
        )
        .with_retry(RetryPolicy::none());
        for b in backends {
            router = router.with_backend(b);
        }
        router
    }

    #[tokio::test]
    async fn intents_use_independent_slots() {
        let claude = Scripted::new(ProviderKind::Anthropic, vec![]);
        let openrouter = Scripted::new(ProviderKind::OpenRouter, vec![]);
        let router = router_with(vec![claude.clone(), openrouter.clone()]);

        let reply = router.converse(&[ChatMessage::assistant("hi")], "hello", "sys").await;
        assert_eq!(reply, "anthropic reply");
        let aux = router.auxiliary("meta", "text", 128, 0.3).await.unwrap();
        assert_eq!(aux, "openrouter reply");

        let seen = claude.seen.lock().unwrap();
        assert_eq!(seen[0].messages.len(), 2);
        assert_eq!(seen[0].messages[1].content, "hello");
        assert_eq!(seen[0].system, "sys");
        let aux_seen = openrouter.seen.lock().unwrap();
        assert_eq!(aux_seen[0].max_tokens, 128);
        assert_eq!(aux_seen[0].model, "cheap/model");
    }

    #[tokio::test]
    async fn switching_affects_only_later_turns() {
        let claude = Scripted::new(ProviderKind::Anthropic, vec![]);
        let local = Scripted::new(ProviderKind::LmStudio, vec![]);
        let router = router_with(vec![claude, local]);
        assert_eq!(router.converse(&[], "one", "").await, "anthropic reply");
        router
            .select(Intent::Conversation, BackendSelection::new(ProviderKind::LmStudio, "qwen"))
            .await
            .unwrap();
        assert_eq!(router.converse(&[], "two", "").await, "lmstudio reply");
        assert_eq!(router.selection(Intent::Auxiliary).await.provider, ProviderKind::OpenRouter);
    }

    #[tokio::test]
    async fn selecting_unregistered_provider_fails() {
        let router = router_with(vec![Scripted::new(ProviderKind::Anthropic, vec![])]);
        let err = router
            .select(Intent::Auxiliary, BackendSelection::new(ProviderKind::LmStudio, "x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedModel);
    }

    #[tokio::test]
    async fn failures_become_apologies() {
        let claude = Scripted::new(
            ProviderKind::Anthropic,
            vec![
                Err(ReverieError::Transport("dns".into())),
                Err(ReverieError::Remote { status: 500, body: "boom".into() }),
                Err(ReverieError::Malformed("no content".into())),
            ],
        );
        let router = router_with(vec![claude]);
        assert!(router.converse(&[], "a", "").await.contains("couldn't reach"));
        assert!(router.converse(&[], "b", "").await.contains("HTTP 500"));
        assert!(router.converse(&[], "c", "").await.contains("unexpected response"));
    }

    #[tokio::test]
    async fn missing_backend_is_apologised_not_raised() {
        let router = router_with(vec![]);
        let reply = router.converse(&[], "hello", "").await;
        assert!(reply.contains("isn't available"));
        assert!(router.auxiliary("", "x", 10, 0.3).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn remote_server_errors_are_attempted_once() {
        let claude = Scripted::new(
            ProviderKind::Anthropic,
            vec![Err(ReverieError::Remote {
                status: 503,
                body: "overloaded".into(),
            })],
        );
        let router = router_with(vec![claude.clone()]).with_retry(RetryPolicy::default());

        let reply = router.converse(&[], "hello", "sys").await;
        assert!(reply.starts_with("Sorry"));
        assert_eq!(claude.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_connections_are_retried() {
        let claude = Scripted::new(
            ProviderKind::Anthropic,
            vec![Err(ReverieError::Transport("connection reset".into()))],
        );
        let router = router_with(vec![claude.clone()]).with_retry(RetryPolicy::default());

        let reply = router.converse(&[], "hello", "sys").await;
        assert_eq!(reply, "anthropic reply");
        assert_eq!(claude.seen.lock().unwrap().len(), 2);
    }
}
