//! Error types for the Reverie orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type ReverieResult<T> = Result<T, ReverieError>;

/// Flat classification of [`ReverieError`], used for apology phrasing and HTTP status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    RemoteError,
    Malformed,
    Timeout,
    Cancelled,
    PreconditionMissing,
    MissingDelimitedPrompt,
    UnsupportedModel,
    BackendUnavailable,
    NotFound,
    Internal,
}

/// Errors that can occur anywhere in the turn / media pipeline
#[derive(Error, Debug)]
pub enum ReverieError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote error (HTTP {status}): {body}")]
    Remote { status: u16, body: String },

    #[error("Remote job failed: {0}")]
    JobFailed(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("{0}")]
    PreconditionMissing(String),

    #[error("No delimited prompt in last message: expected |...| or [...] at end")]
    MissingDelimitedPrompt,

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Subprocess failed: {0}")]
    Subprocess(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReverieError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReverieError::Transport(_) => ErrorKind::Transport,
            ReverieError::Remote { .. } | ReverieError::JobFailed(_) => ErrorKind::RemoteError,
            ReverieError::Malformed(_) | ReverieError::Json(_) => ErrorKind::Malformed,
            ReverieError::Timeout(_) => ErrorKind::Timeout,
            ReverieError::Cancelled => ErrorKind::Cancelled,
            ReverieError::PreconditionMissing(_) => ErrorKind::PreconditionMissing,
            ReverieError::MissingDelimitedPrompt => ErrorKind::MissingDelimitedPrompt,
            ReverieError::UnsupportedModel(_) => ErrorKind::UnsupportedModel,
            ReverieError::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            ReverieError::NotFound(_) => ErrorKind::NotFound,
            ReverieError::Config(_) | ReverieError::Subprocess(_) | ReverieError::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Connection-level failures only. The request may never have reached the vendor, so a
    /// repeat cannot bill twice. Used by the chat and TTS retry loop.
    pub fn is_retryable_transport(&self) -> bool {
        matches!(self, ReverieError::Transport(_))
    }

    /// Wider than [`Self::is_retryable_transport`]: also timeouts, 429 and 5xx. Only for
    /// tolerating failed status polls, which are idempotent reads.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReverieError::Transport(_) | ReverieError::Timeout(_))
            || matches!(self, ReverieError::Remote { status, .. } if *status == 429 || *status >= 500)
    }

    /// Build a `Remote` error from a non-2xx response, capturing the body.
    pub async fn from_response(resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        ReverieError::Remote { status, body }
    }
}

impl From<reqwest::Error> for ReverieError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ReverieError::Timeout(err.to_string())
        } else if err.is_decode() {
            ReverieError::Malformed(err.to_string())
        } else {
            ReverieError::Transport(err.to_string())
        }
    }
}

impl From<config::ConfigError> for ReverieError {
    fn from(err: config::ConfigError) -> Self {
        ReverieError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for ReverieError {
    fn from(err: toml::de::Error) -> Self {
        ReverieError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ReverieError::Transport("reset".into()).is_transient());
        assert!(ReverieError::Remote { status: 503, body: String::new() }.is_transient());
        assert!(ReverieError::Remote { status: 429, body: String::new() }.is_transient());
        assert!(!ReverieError::Remote { status: 401, body: String::new() }.is_transient());
        assert!(!ReverieError::Malformed("no content".into()).is_transient());

        assert!(ReverieError::Transport("reset".into()).is_retryable_transport());
        assert!(!ReverieError::Timeout("60s".into()).is_retryable_transport());
        assert!(!ReverieError::Remote { status: 503, body: String::new() }.is_retryable_transport());
    }

    #[test]
    fn delimited_prompt_message_is_actionable() {
        let msg = ReverieError::MissingDelimitedPrompt.to_string();
        assert!(msg.starts_with("No delimited prompt"));
        assert_eq!(ReverieError::MissingDelimitedPrompt.kind(), ErrorKind::MissingDelimitedPrompt);
    }
}
