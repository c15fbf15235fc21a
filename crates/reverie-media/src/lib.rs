//! # Reverie Media - artifact synthesis for a session
//!
//! Everything here reads a [`reverie_core::SessionSnapshot`] and writes new files into the
//! session folder; registering the artifact with the live session is the caller's job, so a
//! long render never holds the session lock.
//!
//! ```text
//!  snapshot ──► speech  (aux LLM direction ─► TTS)                 ─► tts_response_*.mp3
//!           ──► image   (aux LLM prompt ─► local | cloud ─► swap)  ─► selfie_image_*.png
//!           ──► video   (latest image + audio ─► submit ─► poll)   ─► <backend>_video_*.mp4
//!           ──► post    (ffmpeg: last frame, concatenate)
//! ```

pub mod artifact;
pub mod image;
pub mod jobs;
pub mod post;
pub mod speech;
pub mod video;
pub mod wavespeed;

pub use image::{
    CloudImage, FaceSwapSettings, GeneratedImage, ImageModel, ImageModelEntry, ImageSynthesizer,
    LocalDiffusion,
};
pub use jobs::{JobState, JobStatus, Poller};
pub use post::{ClipKind, ClipSource, PostProcessor};
pub use speech::{ElevenLabsTts, SpeechSynthesizer, TtsBackend};
pub use video::{
    GeneratedVideo, LoraVideoRequest, LoraWeight, VideoBackend, VideoFamily, VideoInputs,
    VideoSynthesizer, WanModel,
};
pub use wavespeed::WaveSpeedClient;
