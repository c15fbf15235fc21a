//! Session lifecycle, auth, chat and transcript editing.

use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;

use reverie_core::{Character, Intent, ProviderKind, ProviderRouter, SessionStore};

use crate::auth::is_authorized;
use crate::error::{ApiError, ApiResult};
use crate::state::{ActiveSession, AppState};

#[derive(Debug, Deserialize)]
pub struct InitRequest {
    #[serde(default)]
    pub user: String,
    pub character: String,
    #[serde(default)]
    pub resume_session: Option<String>,
}

/// Switch router slots to the character's preferred backends, when it names any.
async fn apply_llm_defaults(router: &ProviderRouter, character: &Character) {
    let Some(llm) = &character.llm else {
        return;
    };
    let slots = [
        (Intent::Conversation, &llm.conversation_provider, &llm.conversation_model),
        (Intent::Auxiliary, &llm.auxiliary_provider, &llm.auxiliary_model),
    ];
    for (intent, provider, model) in slots {
        let Some(provider) = provider.as_deref() else {
            continue;
        };
        let provider: ProviderKind = match provider.parse() {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(target: "reverie::gateway", character = %character.name, error = %err, "Ignoring character LLM default");
                continue;
            }
        };
        let mut selection = router.selection(intent).await;
        selection.provider = provider;
        if let Some(model) = model.as_deref().filter(|m| !m.trim().is_empty()) {
            selection.model = model.to_string();
        }
        if let Err(err) = router.select(intent, selection).await {
            tracing::warn!(target: "reverie::gateway", character = %character.name, error = %err, "Character LLM default unavailable");
        }
    }
}

pub async fn init(State(state): State<AppState>, Json(req): Json<InitRequest>) -> ApiResult<Json<Value>> {
    let character = state.registry.get(req.character.trim())?.clone();
    state.cancel_jobs().await;
    apply_llm_defaults(&state.router, &character).await;

    let mut guard = state.active.lock().await;
    let resume = req.resume_session.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let (session, resumed, initial_message) = match resume {
        Some(id) => {
            let mut session = state.store.resume(id)?;
            if session.is_legacy() {
                session.set_character_name(&character.name)?;
            }
            (session, true, None)
        }
        None => {
            let id = SessionStore::default_session_id(&character.name);
            let mut session = state.store.create(&character.name, &id)?;
            let opening = state.engine.seed_scenario(&mut session).await?;
            (session, false, opening)
        }
    };

    tracing::info!(
        target: "reverie::gateway",
        user = %req.user,
        character = %character.name,
        session = %session.id(),
        resumed,
        "Session bound"
    );
    let session_id = session.id().to_string();
    *guard = Some(ActiveSession {
        user: req.user,
        session,
    });
    Ok(Json(json!({
        "session_id": session_id,
        "initial_message": initial_message,
        "resumed": resumed,
    })))
}

pub async fn current(State(state): State<AppState>) -> Json<Value> {
    let guard = state.active.lock().await;
    let active = guard.as_ref();
    Json(json!({
        "user": active.map(|a| a.user.as_str()),
        "character": active.map(|a| a.session.character_name()),
        "session_id": active.map(|a| a.session.id()),
        "requires_password": state.config.requires_password(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    #[serde(default)]
    pub character: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> ApiResult<Json<Value>> {
    let filter = query.character.as_deref().filter(|c| !c.is_empty());
    let sessions = state.store.list_sessions(filter)?;
    Ok(Json(json!({ "sessions": sessions })))
}

#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    #[serde(default)]
    pub password: String,
}

pub async fn auth(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(req): Json<AuthRequest>,
) -> Json<Value> {
    let success = is_authorized(&state.config, &peer, Some(req.password.as_str()));
    if !success {
        tracing::warn!(target: "reverie::gateway", %peer, "Rejected password");
    }
    Json(json!({ "success": success }))
}

pub async fn history(State(state): State<AppState>) -> Json<Value> {
    let guard = state.active.lock().await;
    let history = guard
        .as_ref()
        .map(|a| a.session.transcript().to_vec())
        .unwrap_or_default();
    Json(json!({ "history": history }))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

pub async fn chat(State(state): State<AppState>, Json(req): Json<ChatRequest>) -> ApiResult<Json<Value>> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(ApiError::bad_request("Message is empty"));
    }
    let pending = {
        let mut guard = state.active.lock().await;
        let active = guard.as_mut().ok_or_else(ApiError::no_session)?;
        state.engine.begin_turn(&mut active.session, message)?
    };

    // The session stays readable while the model works.
    let response = state.engine.reply(&pending).await;

    let mut guard = state.active.lock().await;
    let active = guard.as_mut().ok_or_else(ApiError::no_session)?;
    if !state.engine.finish_turn(&mut active.session, &pending, &response)? {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            "Session changed before the reply arrived",
        ));
    }
    Ok(Json(json!({
        "response": response,
        "history": active.session.transcript(),
    })))
}

pub async fn delete_last(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let mut guard = state.active.lock().await;
    let active = guard.as_mut().ok_or_else(ApiError::no_session)?;
    let removed = active.session.delete_last();
    active.session.save_full()?;
    Ok(Json(json!({
        "success": removed.is_some(),
        "history": active.session.transcript(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub text: String,
}

pub async fn edit_last(State(state): State<AppState>, Json(req): Json<EditRequest>) -> ApiResult<Json<Value>> {
    let mut guard = state.active.lock().await;
    let active = guard.as_mut().ok_or_else(ApiError::no_session)?;
    active.session.edit_last(&req.text)?;
    active.session.save_full()?;
    Ok(Json(json!({
        "success": true,
        "history": active.session.transcript(),
    })))
}
