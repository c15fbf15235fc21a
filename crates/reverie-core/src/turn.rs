//! Turn Engine: one user utterance in, one assistant reply out, both persisted.

use std::sync::Arc;

use crate::character::CharacterRegistry;
use crate::error::ReverieResult;
use crate::providers::{ChatMessage, ProviderRouter};
use crate::session::{Role, Session};

/// A turn whose user message is persisted and whose reply is still outstanding.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    pub session_id: String,
    pub character: String,
    system_prompt: String,
    history: Vec<ChatMessage>,
    current: String,
}

pub struct TurnEngine {
    router: Arc<ProviderRouter>,
    registry: Arc<CharacterRegistry>,
}

impl TurnEngine {
    pub fn new(router: Arc<ProviderRouter>, registry: Arc<CharacterRegistry>) -> Self {
        Self { router, registry }
    }

    pub fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<CharacterRegistry> {
        &self.registry
    }

    /// Advance the transcript by one exchange.
    ///
    /// The provider sees the transcript as it was before this user message, plus the message
    /// itself as the current turn. Provider failures come back as an apology that is appended
    /// like any other reply; only persistence and unknown-character errors are returned.
    pub async fn turn(&self, session: &mut Session, user_text: &str) -> ReverieResult<String> {
        let pending = self.begin_turn(session, user_text)?;
        let reply = self.reply(&pending).await;
        self.finish_turn(session, &pending, &reply)?;
        Ok(reply)
    }

    /// Persist the user message and capture what the provider call needs, so the caller can
    /// release the session while the model is working.
    pub fn begin_turn(&self, session: &mut Session, user_text: &str) -> ReverieResult<PendingTurn> {
        let character = self.registry.get(session.character_name())?;
        let history = session.chat_history();
        session.append(Role::User, user_text)?;
        Ok(PendingTurn {
            session_id: session.id().to_string(),
            character: character.name.clone(),
            system_prompt: character.system_prompt.clone(),
            history,
            current: user_text.to_string(),
        })
    }

    /// Run the provider call for a pending turn. Needs no access to the session.
    pub async fn reply(&self, pending: &PendingTurn) -> String {
        self.router
            .converse(&pending.history, &pending.current, &pending.system_prompt)
            .await
    }

    /// Append the reply to the session the turn was started on. Returns `false` without
    /// touching the session when a different one is active by now.
    pub fn finish_turn(&self, session: &mut Session, pending: &PendingTurn, reply: &str) -> ReverieResult<bool> {
        if session.id() != pending.session_id {
            tracing::warn!(
                target: "reverie::turn",
                started = %pending.session_id,
                active = %session.id(),
                "Session changed during turn; reply not recorded"
            );
            return Ok(false);
        }
        session.append(Role::Assistant, reply)?;
        tracing::info!(
            target: "reverie::turn",
            session = %session.id(),
            character = %pending.character,
            reply_chars = reply.chars().count(),
            "Turn complete"
        );
        Ok(true)
    }

    /// On a fresh session, turn the character's scenario into the opening assistant message
    /// (the scenario is sent as the user turn with an empty history).
    pub async fn seed_scenario(&self, session: &mut Session) -> ReverieResult<Option<String>> {
        if !session.transcript().is_empty() {
            return Ok(None);
        }
        let character = self.registry.get(session.character_name())?;
        let Some(scenario) = character.scenario.as_deref().filter(|s| !s.trim().is_empty()) else {
            return Ok(None);
        };
        let opening = self
            .router
            .converse(&[], scenario, &character.system_prompt)
            .await;
        session.append(Role::Assistant, &opening)?;
        tracing::info!(target: "reverie::turn", session = %session.id(), "Scenario seeded");
        Ok(Some(opening))
    }
}
