//! # Reverie Gateway
//!
//! Local HTTP surface over the turn pipeline and the media synthesizers. One process serves
//! one live session at a time; artifacts are published under `/output/<session_id>/`.

pub mod auth;
pub mod error;
pub mod export;
pub mod routes;
pub mod state;
pub mod tunnel;

pub use error::{ApiError, ApiResult};
pub use routes::build_app;
pub use state::{ActiveSession, AppState};
