//! Shared gateway state: the engines, plus the one live session this process serves.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use reverie_core::{
    Character, CharacterRegistry, MediaKind, MediaRef, ProviderRouter, ReverieConfig, Session,
    SessionSnapshot, SessionStore, TurnEngine,
};
use reverie_media::{ImageSynthesizer, PostProcessor, SpeechSynthesizer, VideoSynthesizer};

use crate::error::{ApiError, ApiResult};

/// The session currently bound to the front-end.
#[derive(Debug)]
pub struct ActiveSession {
    pub user: String,
    pub session: Session,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ReverieConfig>,
    pub registry: Arc<CharacterRegistry>,
    pub store: Arc<SessionStore>,
    pub router: Arc<ProviderRouter>,
    pub engine: Arc<TurnEngine>,
    pub speech: Arc<SpeechSynthesizer>,
    pub images: Arc<ImageSynthesizer>,
    pub videos: Arc<VideoSynthesizer>,
    pub post: Arc<PostProcessor>,
    /// Held across a chat turn; media handlers only hold it to snapshot and to record.
    pub active: Arc<Mutex<Option<ActiveSession>>>,
    /// Token handed to every media job; `/cancel` fires it and installs a fresh one.
    jobs: Arc<Mutex<CancellationToken>>,
}

/// Everything a media handler needs, taken without keeping the session locked.
pub struct MediaContext {
    pub snapshot: SessionSnapshot,
    pub character: Character,
    pub cancel: CancellationToken,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ReverieConfig,
        registry: CharacterRegistry,
        store: SessionStore,
        router: Arc<ProviderRouter>,
        speech: SpeechSynthesizer,
        images: ImageSynthesizer,
        videos: VideoSynthesizer,
        post: PostProcessor,
    ) -> Self {
        let registry = Arc::new(registry);
        Self {
            config: Arc::new(config),
            engine: Arc::new(TurnEngine::new(router.clone(), registry.clone())),
            registry,
            store: Arc::new(store),
            router,
            speech: Arc::new(speech),
            images: Arc::new(images),
            videos: Arc::new(videos),
            post: Arc::new(post),
            active: Arc::new(Mutex::new(None)),
            jobs: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    pub async fn job_token(&self) -> CancellationToken {
        self.jobs.lock().await.clone()
    }

    /// Cancel whatever is running; later jobs get a fresh token.
    pub async fn cancel_jobs(&self) {
        let mut token = self.jobs.lock().await;
        token.cancel();
        *token = CancellationToken::new();
    }

    pub async fn media_context(&self) -> ApiResult<MediaContext> {
        let snapshot = {
            let guard = self.active.lock().await;
            let active = guard.as_ref().ok_or_else(ApiError::no_session)?;
            active.session.snapshot()
        };
        let character = self.registry.get(&snapshot.character_name)?.clone();
        Ok(MediaContext {
            snapshot,
            character,
            cancel: self.job_token().await,
        })
    }

    /// Attach a finished artifact to the live session if it is still the one the job started
    /// from. Either way the caller gets the artifact's URL.
    pub async fn record(&self, session_id: &str, kind: MediaKind, path: &Path) -> ApiResult<MediaRef> {
        let mut guard = self.active.lock().await;
        if let Some(active) = guard.as_mut().filter(|a| a.session.id() == session_id) {
            return Ok(active.session.record_media(kind, path)?);
        }
        tracing::warn!(
            target: "reverie::gateway",
            session = session_id,
            file = %path.display(),
            "Session changed while the job ran; artifact not attached"
        );
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(MediaRef {
            kind,
            url: self.store.media_url(session_id, &filename),
            filename,
        })
    }
}
