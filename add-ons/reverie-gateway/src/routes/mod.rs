//! Route table.

pub mod llm;
pub mod media;
pub mod session;

use axum::http::Method;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::auth::require_auth;
use crate::state::AppState;

/// Full application. Serve it with `into_make_service_with_connect_info::<SocketAddr>()`;
/// the auth layer reads the peer address.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let protected = Router::new()
        .route("/init", post(session::init))
        .route("/sessions", get(session::list))
        .route("/history", get(session::history))
        .route("/chat", post(session::chat))
        .route("/message/delete-last", post(session::delete_last))
        .route("/message/edit-last", post(session::edit_last))
        .route("/llm", get(llm::get_llm).post(llm::set_llm))
        .route("/llm/models", get(llm::list_models))
        .route("/generate/tts", post(media::tts))
        .route("/generate/script-tts", post(media::script_tts))
        .route("/generate/image", post(media::image))
        .route("/generate/image/direct", post(media::image_direct))
        .route("/generate/video", post(media::video))
        .route("/generate/video/wavespeed", post(media::video_wavespeed))
        .route("/generate/video/lora", post(media::video_lora))
        .route("/generate/lipsync", post(media::lipsync))
        .route("/extract-frame", post(media::extract_frame))
        .route("/compile-story", post(media::compile_story))
        .route("/edit/image", post(media::edit_image))
        .route("/faceswap", post(media::faceswap))
        .route("/image-models", get(media::image_models))
        .route("/cancel", post(media::cancel))
        .route("/export", get(media::export_session))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let output_root = state.config.output_root.clone();
    Router::new()
        .route("/health", get(media::health))
        .route("/session", get(session::current))
        .route("/auth", post(session::auth))
        .merge(protected)
        .nest_service("/output", ServeDir::new(output_root))
        .layer(cors)
        .with_state(state)
}
