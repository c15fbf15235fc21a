//! Media routes. Each handler snapshots the live session, runs the job without the session
//! lock, then records the artifact if the session is still the same one.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use reverie_core::{MediaKind, ReverieError};
use reverie_media::image::ImageModel;
use reverie_media::video::{lora, NO_RECENT_VIDEO};
use reverie_media::{ClipKind, ClipSource, LoraVideoRequest, LoraWeight, VideoFamily, WanModel};

use crate::error::{ApiError, ApiResult};
use crate::export;
use crate::state::AppState;

const DEFAULT_TALKING_HEAD: &str = "infinitetalk";
const DEFAULT_LIPSYNC: &str = "veed-lipsync";

#[derive(Debug, Default, Deserialize)]
pub struct ModelQuery {
    #[serde(default)]
    pub model: Option<String>,
}

impl ModelQuery {
    fn key_or(&self, default: &'static str) -> String {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(default)
            .to_string()
    }
}

/// Last path segment of a media URL, without query or fragment.
fn filename_from_url(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/').next().filter(|n| !n.is_empty() && *n != "..")
}

#[derive(Debug, Default, Deserialize)]
pub struct SpeechRequest {
    #[serde(default)]
    pub text: Option<String>,
}

async fn speak(state: AppState, req: SpeechRequest, enrich: bool) -> ApiResult<Json<Value>> {
    let ctx = state.media_context().await?;
    let text = match req.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(text) => text.to_string(),
        None => ctx
            .snapshot
            .last_assistant_message()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("No assistant message to speak"))?,
    };
    let path = state
        .speech
        .synthesize(&ctx.snapshot, &ctx.character, &text, enrich)
        .await?;
    let media = state.record(&ctx.snapshot.id, MediaKind::Audio, &path).await?;
    Ok(Json(json!({ "tts_url": media.url })))
}

pub async fn tts(State(state): State<AppState>, Json(req): Json<SpeechRequest>) -> ApiResult<Json<Value>> {
    speak(state, req, true).await
}

/// Same as `/generate/tts` but the text goes to the voice backend as written.
pub async fn script_tts(
    State(state): State<AppState>,
    Json(req): Json<SpeechRequest>,
) -> ApiResult<Json<Value>> {
    speak(state, req, false).await
}

pub async fn image(State(state): State<AppState>, Query(query): Query<ModelQuery>) -> ApiResult<Json<Value>> {
    let ctx = state.media_context().await?;
    let model = ImageModel::from_key(query.model.as_deref());
    let image = state
        .images
        .generate(&ctx.snapshot, &ctx.character, &model, &ctx.cancel)
        .await?;
    let media = state.record(&ctx.snapshot.id, MediaKind::Image, &image.path).await?;
    Ok(Json(json!({ "image_url": media.url, "prompt": image.prompt })))
}

pub async fn image_direct(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
) -> ApiResult<Json<Value>> {
    let ctx = state.media_context().await?;
    let model = ImageModel::from_key(query.model.as_deref());
    let image = state
        .images
        .generate_from_last_message(&ctx.snapshot, &ctx.character, &model, &ctx.cancel)
        .await?;
    let media = state.record(&ctx.snapshot.id, MediaKind::Image, &image.path).await?;
    Ok(Json(json!({ "image_url": media.url, "prompt": image.prompt })))
}

async fn talking_head(state: AppState, key: String, family: Option<VideoFamily>) -> ApiResult<Json<Value>> {
    let ctx = state.media_context().await?;
    let video = state
        .videos
        .generate(&ctx.snapshot, &key, family, &ctx.cancel)
        .await?;
    let media = state.record(&ctx.snapshot.id, MediaKind::Video, &video.path).await?;
    Ok(Json(json!({
        "video_url": media.url,
        "prompt": video.prompt,
        "model": video.model,
    })))
}

pub async fn video(State(state): State<AppState>, Query(query): Query<ModelQuery>) -> ApiResult<Json<Value>> {
    talking_head(state, query.key_or(DEFAULT_TALKING_HEAD), None).await
}

pub async fn video_wavespeed(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
) -> ApiResult<Json<Value>> {
    talking_head(state, query.key_or(DEFAULT_TALKING_HEAD), Some(VideoFamily::WaveSpeed)).await
}

#[derive(Debug, Deserialize)]
pub struct LoraRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub loras: Vec<LoraWeight>,
    #[serde(default)]
    pub num_frames: Option<u32>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn video_lora(State(state): State<AppState>, Json(req): Json<LoraRequest>) -> ApiResult<Json<Value>> {
    let request = LoraVideoRequest {
        model: WanModel::from_key(req.model.as_deref())?,
        prompt: req.prompt,
        loras: req.loras,
        num_frames: req.num_frames.unwrap_or(lora::DEFAULT_FRAMES),
        fps: req.fps.unwrap_or(lora::DEFAULT_FPS),
    };
    let ctx = state.media_context().await?;
    let video = state
        .videos
        .generate_lora(&ctx.snapshot, request, &ctx.cancel)
        .await?;
    let media = state.record(&ctx.snapshot.id, MediaKind::Video, &video.path).await?;
    Ok(Json(json!({
        "video_url": media.url,
        "prompt": video.prompt,
        "model": video.model,
    })))
}

pub async fn lipsync(State(state): State<AppState>, Query(query): Query<ModelQuery>) -> ApiResult<Json<Value>> {
    let ctx = state.media_context().await?;
    let key = query.key_or(DEFAULT_LIPSYNC);
    let video = state.videos.lipsync(&ctx.snapshot, &key, &ctx.cancel).await?;
    let media = state.record(&ctx.snapshot.id, MediaKind::Video, &video.path).await?;
    Ok(Json(json!({ "video_url": media.url, "model": video.model })))
}

/// Last frame of the latest video, face-swapped, as the new latest image.
pub async fn extract_frame(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let ctx = state.media_context().await?;
    let video = ctx
        .snapshot
        .last_video_path
        .clone()
        .ok_or_else(|| ReverieError::PreconditionMissing(NO_RECENT_VIDEO.into()))?;
    ctx.snapshot.set_status("Extracting last frame");
    let frame = state.post.extract_last_frame(&video, &ctx.snapshot.folder).await?;
    let bytes = tokio::fs::read(&frame).await.map_err(ReverieError::from)?;
    let swapped = state.images.swap_for_character(bytes.clone(), &ctx.character).await;
    if swapped != bytes {
        tokio::fs::write(&frame, &swapped).await.map_err(ReverieError::from)?;
    }
    ctx.snapshot.set_status("Image ready");
    let media = state.record(&ctx.snapshot.id, MediaKind::Image, &frame).await?;
    Ok(Json(json!({ "image_url": media.url })))
}

#[derive(Debug, Deserialize)]
pub struct Scene {
    pub url: String,
    #[serde(rename = "mediaType", alias = "media_type")]
    pub media_type: ClipKind,
}

#[derive(Debug, Deserialize)]
pub struct CompileRequest {
    #[serde(default)]
    pub scenes: Vec<Scene>,
}

pub async fn compile_story(
    State(state): State<AppState>,
    Json(req): Json<CompileRequest>,
) -> ApiResult<Json<Value>> {
    let ctx = state.media_context().await?;
    let mut sources = Vec::with_capacity(req.scenes.len());
    for scene in &req.scenes {
        let name = filename_from_url(&scene.url)
            .ok_or_else(|| ApiError::bad_request(format!("Invalid scene url '{}'", scene.url)))?;
        sources.push(ClipSource {
            path: ctx.snapshot.folder.join(name),
            kind: scene.media_type,
        });
    }
    ctx.snapshot.set_status("Compiling story");
    let path = match state.post.concatenate(&sources, &ctx.snapshot.folder).await {
        Ok(path) => path,
        Err(err) => {
            ctx.snapshot.set_status("Story compilation failed");
            return Err(err.into());
        }
    };
    ctx.snapshot.set_status("Story ready");
    let media = state.record(&ctx.snapshot.id, MediaKind::Video, &path).await?;
    Ok(Json(json!({ "video_url": media.url })))
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub prompt: String,
}

pub async fn edit_image(State(state): State<AppState>, Json(req): Json<EditRequest>) -> ApiResult<Json<Value>> {
    let ctx = state.media_context().await?;
    let image = state
        .images
        .edit(&ctx.snapshot, &ctx.character, &req.prompt, &ctx.cancel)
        .await?;
    let media = state.record(&ctx.snapshot.id, MediaKind::Image, &image.path).await?;
    Ok(Json(json!({ "image_url": media.url, "prompt": image.prompt })))
}

#[derive(Debug, Default, Deserialize)]
pub struct FaceSwapRequest {
    #[serde(default)]
    pub image_url: Option<String>,
}

pub async fn faceswap(
    State(state): State<AppState>,
    body: Option<Json<FaceSwapRequest>>,
) -> ApiResult<Json<Value>> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let ctx = state.media_context().await?;
    let filename = req.image_url.as_deref().and_then(filename_from_url);
    let path = state
        .images
        .face_swap(&ctx.snapshot, &ctx.character, filename)
        .await?;
    let media = state.record(&ctx.snapshot.id, MediaKind::Image, &path).await?;
    Ok(Json(json!({ "image_url": media.url })))
}

pub async fn image_models(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "models": state.images.available_models().await }))
}

pub async fn cancel(State(state): State<AppState>) -> Json<Value> {
    state.cancel_jobs().await;
    tracing::info!(target: "reverie::gateway", "Media jobs cancelled");
    Json(json!({ "cancelled": true }))
}

pub async fn export_session(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let (session_id, character, log_path, folder) = {
        let guard = state.active.lock().await;
        let active = guard.as_ref().ok_or_else(ApiError::no_session)?;
        (
            active.session.id().to_string(),
            active.session.character_name().to_string(),
            active.session.log_path().to_path_buf(),
            active.session.folder().to_path_buf(),
        )
    };
    let id = session_id.clone();
    let archive = tokio::task::spawn_blocking(move || {
        export::build_archive(&id, &character, &log_path, &folder)
    })
    .await
    .map_err(|e| ReverieError::Io(std::io::Error::other(e)))??;
    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{session_id}.zip\""),
            ),
        ],
        archive,
    ))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_urls_resolve_to_filenames() {
        assert_eq!(
            filename_from_url("/output/alpha_1/selfie_image_20250101_120000.png?t=1"),
            Some("selfie_image_20250101_120000.png")
        );
        assert_eq!(filename_from_url("http://host/output/s/"), None);
        assert_eq!(filename_from_url("/output/s/.."), None);
    }

    #[test]
    fn model_query_defaults() {
        let empty = ModelQuery::default();
        assert_eq!(empty.key_or(DEFAULT_TALKING_HEAD), "infinitetalk");
        let given = ModelQuery {
            model: Some(" hedra ".into()),
        };
        assert_eq!(given.key_or(DEFAULT_TALKING_HEAD), "hedra");
    }
}
