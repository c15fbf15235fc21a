//! Reverie core: the session-scoped turn pipeline for character roleplay.
//!
//! - [`character`]: persona catalogue (built-in + imported records, imported wins on collision).
//! - [`providers`]: uniform chat contract over Anthropic, OpenRouter and LM Studio, plus the
//!   two-slot [`providers::ProviderRouter`] (conversation vs auxiliary).
//! - [`session`]: on-disk session folders, the human-readable log and its parser.
//! - [`turn`]: one user utterance in, one assistant reply out.
//! - [`prompts`]: fixed meta-prompts for voice direction, image and video prompt shaping.

pub mod character;
pub mod config;
pub mod error;
pub mod prompts;
pub mod providers;
pub mod retry;
pub mod session;
pub mod turn;

pub use character::{Character, CharacterRegistry, ImageMode, LlmDefaults, RenderingFlags, VoiceParams};
pub use config::{Credentials, Endpoints, ReverieConfig};
pub use error::{ErrorKind, ReverieError, ReverieResult};
pub use providers::{
    BackendSelection, ChatBackend, ChatMessage, ChatRequest, ChatRole, Intent, ProviderKind,
    ProviderRouter,
};
pub use retry::RetryPolicy;
pub use session::{
    MediaKind, MediaRef, Role, Session, SessionMetadata, SessionSnapshot, SessionStore,
    TranscriptEntry,
};
pub use turn::{PendingTurn, TurnEngine};
