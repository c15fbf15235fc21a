//! Shared-secret gate for remote callers. Loopback is always authorized.

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;

use reverie_core::ReverieConfig;

use crate::error::ApiError;
use crate::state::AppState;

pub const PASSWORD_HEADER: &str = "x-remote-password";

pub fn is_authorized(config: &ReverieConfig, peer: &SocketAddr, supplied: Option<&str>) -> bool {
    if peer.ip().is_loopback() || !config.requires_password() {
        return true;
    }
    supplied.is_some() && supplied == config.remote_password.as_deref()
}

pub async fn require_auth(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let supplied = request
        .headers()
        .get(PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok());
    if is_authorized(&state.config, &peer, supplied) {
        return next.run(request).await;
    }
    tracing::warn!(target: "reverie::gateway", %peer, path = %request.uri().path(), "Unauthorized request");
    ApiError::unauthorized().into_response()
}
