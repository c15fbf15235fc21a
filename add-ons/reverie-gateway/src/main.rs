use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reverie_core::{
    BackendSelection, CharacterRegistry, Credentials, Endpoints, ProviderKind, ProviderRouter,
    ReverieConfig, ReverieResult, SessionStore,
};
use reverie_gateway::{build_app, tunnel, AppState};
use reverie_media::wavespeed::WaveSpeedClient;
use reverie_media::{
    CloudImage, ElevenLabsTts, FaceSwapSettings, ImageSynthesizer, LocalDiffusion, PostProcessor,
    SpeechSynthesizer, VideoSynthesizer,
};

fn selection(provider: &str, model: &str) -> ReverieResult<BackendSelection> {
    Ok(BackendSelection::new(provider.parse::<ProviderKind>()?, model))
}

#[tokio::main]
async fn main() {
    // Credentials live in .env; the front-end never sees them.
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[reverie-gateway] .env not loaded: {} (using system environment)", e);
    }

    let config = match ReverieConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[reverie-gateway] invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "reverie-gateway.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    if let Err(e) = run(config).await {
        tracing::error!(target: "reverie::gateway", error = %e, "Gateway failed");
        std::process::exit(1);
    }
}

async fn run(config: ReverieConfig) -> ReverieResult<()> {
    let credentials = Credentials::from_env();
    let endpoints = Endpoints::from_env();

    let registry = CharacterRegistry::load(&config.characters_path, &config.imported_characters_path)?;
    tracing::info!(target: "reverie::gateway", characters = registry.len(), "Character catalogue loaded");

    let router = Arc::new(ProviderRouter::from_credentials(
        &credentials,
        &endpoints,
        selection(&config.default_llm, &config.default_model)?,
        selection(&config.auxiliary_llm, &config.auxiliary_model)?,
    ));

    let tts = ElevenLabsTts::new(credentials.elevenlabs_api_key.clone(), endpoints.elevenlabs_model.clone());
    let speech = SpeechSynthesizer::new(router.clone(), Arc::new(tts));

    let wavespeed = Arc::new(WaveSpeedClient::new(
        &endpoints.wavespeed_url,
        credentials.wavespeed_api_key.clone(),
    ));
    let images = ImageSynthesizer::new(
        router.clone(),
        LocalDiffusion::new(
            &endpoints.stable_diffusion_url,
            FaceSwapSettings::new(endpoints.faceswap_model_path.clone()),
        ),
        CloudImage::new(wavespeed),
    )
    .with_checkpoint_dir(config.checkpoint_dir.clone());
    let videos = VideoSynthesizer::from_credentials(router.clone(), &credentials, &endpoints);
    tracing::info!(
        target: "reverie::gateway",
        talking_heads = ?videos.talking_head_models(),
        lipsync = ?videos.lipsync_models(),
        "Video backends registered"
    );
    let post = PostProcessor::new(endpoints.ffmpeg_path.clone());

    std::fs::create_dir_all(&config.output_root)?;
    let store = SessionStore::new(&config.output_root, "/output");

    let host: std::net::IpAddr = config
        .host
        .parse()
        .map_err(|_| reverie_core::ReverieError::Config(format!("invalid host '{}'", config.host)))?;
    let addr = SocketAddr::new(host, config.port);
    let tunnel_enabled = config.tunnel_enabled;
    let tunnel_url_file = config.tunnel_url_file.clone();
    if config.requires_password() {
        tracing::info!(target: "reverie::gateway", "Remote callers must supply the shared password");
    }

    let state = AppState::new(config, registry, store, router, speech, images, videos, post);
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(target: "reverie::gateway", %addr, "Reverie gateway listening");

    // Held until shutdown; dropping it stops cloudflared.
    let _tunnel = if tunnel_enabled {
        match tunnel::spawn(addr.port(), &tunnel_url_file).await {
            Ok(child) => Some(child),
            Err(e) => {
                tracing::warn!(target: "reverie::gateway", error = %e, "Tunnel not started");
                None
            }
        }
    } else {
        None
    };

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>());
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(target: "reverie::gateway", error = %e, "Server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(target: "reverie::gateway", "Shutdown requested (Ctrl+C)");
        }
    }
    Ok(())
}
