//! Backend switching: read and change the conversation / auxiliary slots, list local models.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use reverie_core::{BackendSelection, Intent, ProviderKind};

use crate::error::ApiResult;
use crate::state::AppState;

async fn selections(state: &AppState) -> Value {
    json!({
        "conversation": state.router.selection(Intent::Conversation).await,
        "auxiliary": state.router.selection(Intent::Auxiliary).await,
        "providers": state.router.registered(),
    })
}

pub async fn get_llm(State(state): State<AppState>) -> Json<Value> {
    Json(selections(&state).await)
}

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    #[serde(default = "default_intent")]
    pub intent: Intent,
    pub provider: String,
    pub model: String,
}

fn default_intent() -> Intent {
    Intent::Conversation
}

pub async fn set_llm(State(state): State<AppState>, Json(req): Json<SelectRequest>) -> ApiResult<Json<Value>> {
    let provider: ProviderKind = req.provider.parse()?;
    state
        .router
        .select(req.intent, BackendSelection::new(provider, req.model.trim()))
        .await?;
    Ok(Json(selections(&state).await))
}

#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    #[serde(default)]
    pub provider: Option<String>,
}

pub async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<ModelsQuery>,
) -> ApiResult<Json<Value>> {
    let provider: ProviderKind = query.provider.as_deref().unwrap_or("lmstudio").parse()?;
    let models = state.router.list_models(provider).await?;
    Ok(Json(json!({ "provider": provider, "models": models })))
}
