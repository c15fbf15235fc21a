//! Session Store: one character, one transcript, one folder of artifacts, one metadata sidecar.
//!
//! On disk:
//!
//! ```text
//! <output_root>/<session_id>/
//!   <session_id>.txt         human-readable log, see [`log`]
//!   session_metadata.json    {session_id, character, created_at, last_message_preview}
//!   selfie_image_*.png, tts_response_*.mp3, <backend>_video_*.mp4
//!   status.txt               single-line live status
//! ```
//!
//! The transcript is append-only apart from [`Session::delete_last`] and [`Session::edit_last`].
//! Media entries always point forward from the transcript into the folder; on resume they are
//! rebuilt from the log and a folder scan, never persisted separately.

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ReverieError, ReverieResult};
use crate::providers::ChatMessage;

pub mod log;
pub mod store;

pub use store::SessionStore;

pub const METADATA_FILE: &str = "session_metadata.json";
pub const STATUS_FILE: &str = "status.txt";
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
}

impl MediaKind {
    /// Word used in `Generated <word>: <filename>` log lines.
    pub fn log_label(self) -> &'static str {
        match self {
            MediaKind::Image => "selfie",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    pub fn from_log_label(label: &str) -> Option<Self> {
        match label {
            "selfie" => Some(MediaKind::Image),
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "webp" => Some(MediaKind::Image),
            "mp3" | "wav" | "m4a" => Some(MediaKind::Audio),
            "mp4" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaRef>,
    /// Log timestamp; kept so a full save reproduces the original lines.
    #[serde(skip)]
    pub timestamp: Option<NaiveDateTime>,
}

impl TranscriptEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            media: Vec::new(),
            timestamp: Some(Local::now().naive_local()),
        }
    }
}

/// Equality ignores the timestamp.
impl PartialEq for TranscriptEntry {
    fn eq(&self, other: &Self) -> bool {
        self.role == other.role && self.content == other.content && self.media == other.media
    }
}

impl Eq for TranscriptEntry {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub character: String,
    pub created_at: DateTime<Local>,
    #[serde(default)]
    pub last_message_preview: String,
    /// Folder had no sidecar; fields were reconstructed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub legacy: bool,
}

/// Read-only view handed to media jobs so the live session stays unlocked while they run.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: String,
    pub character_name: String,
    pub folder: PathBuf,
    pub transcript: Vec<TranscriptEntry>,
    pub last_audio_path: Option<PathBuf>,
    pub last_image_path: Option<PathBuf>,
    pub last_video_path: Option<PathBuf>,
}

impl SessionSnapshot {
    pub fn last_assistant_message(&self) -> Option<&str> {
        last_assistant(&self.transcript)
    }

    /// Up to `n` trailing user/assistant entries, oldest first.
    pub fn recent_messages(&self, n: usize) -> &[TranscriptEntry] {
        let start = self.transcript.len().saturating_sub(n);
        &self.transcript[start..]
    }

    pub fn set_status(&self, status: &str) {
        write_status(&self.folder, status);
    }
}

fn last_assistant(transcript: &[TranscriptEntry]) -> Option<&str> {
    transcript
        .iter()
        .rev()
        .find(|e| e.role == Role::Assistant)
        .map(|e| e.content.as_str())
}

/// Overwrite `status.txt` with one line. Failures are logged, never raised.
pub fn write_status(folder: &Path, status: &str) {
    let line = status.replace(['\r', '\n'], " ");
    tracing::info!(target: "reverie::session", status = %line, "Status");
    if let Err(e) = std::fs::write(folder.join(STATUS_FILE), format!("{line}\n")) {
        tracing::warn!(target: "reverie::session", error = %e, "Failed to write status file");
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

#[derive(Debug)]
pub struct Session {
    id: String,
    character_name: String,
    created_at: DateTime<Local>,
    folder: PathBuf,
    log_file: PathBuf,
    url_prefix: String,
    transcript: Vec<TranscriptEntry>,
    last_audio_path: Option<PathBuf>,
    last_image_path: Option<PathBuf>,
    last_video_path: Option<PathBuf>,
    last_message_preview: String,
    legacy: bool,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn character_name(&self) -> &str {
        &self.character_name
    }

    /// Legacy sessions come back as "Unknown"; the caller picks the character on resume.
    pub fn set_character_name(&mut self, name: &str) -> ReverieResult<()> {
        self.character_name = name.to_string();
        self.legacy = false;
        self.write_metadata()
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn log_path(&self) -> &Path {
        &self.log_file
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn last_audio_path(&self) -> Option<&Path> {
        self.last_audio_path.as_deref()
    }

    pub fn last_image_path(&self) -> Option<&Path> {
        self.last_image_path.as_deref()
    }

    pub fn last_video_path(&self) -> Option<&Path> {
        self.last_video_path.as_deref()
    }

    pub fn last_message_preview(&self) -> &str {
        &self.last_message_preview
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    pub fn last_assistant_message(&self) -> Option<&str> {
        last_assistant(&self.transcript)
    }

    /// Public URL of a file in this session's folder.
    pub fn media_url(&self, filename: &str) -> String {
        format!("{}/{}", self.url_prefix, filename)
    }

    /// Transcript as provider messages. System entries are dropped: the character's system
    /// prompt is supplied separately on every call.
    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.transcript
            .iter()
            .filter_map(|e| match e.role {
                Role::User => Some(ChatMessage::user(e.content.clone())),
                Role::Assistant => Some(ChatMessage::assistant(e.content.clone())),
                Role::System => None,
            })
            .collect()
    }

    pub fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            session_id: self.id.clone(),
            character: self.character_name.clone(),
            created_at: self.created_at,
            last_message_preview: self.last_message_preview.clone(),
            legacy: self.legacy,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            character_name: self.character_name.clone(),
            folder: self.folder.clone(),
            transcript: self.transcript.clone(),
            last_audio_path: self.last_audio_path.clone(),
            last_image_path: self.last_image_path.clone(),
            last_video_path: self.last_video_path.clone(),
        }
    }

    pub fn set_status(&self, status: &str) {
        write_status(&self.folder, status);
    }

    /// Append to the transcript and the log; refresh the metadata preview.
    pub fn append(&mut self, role: Role, content: &str) -> ReverieResult<()> {
        let entry = TranscriptEntry::new(role, content);
        let timestamp = entry.timestamp.unwrap_or_else(|| Local::now().naive_local());
        self.append_log(&log::render_line(timestamp, role, content))?;
        self.transcript.push(entry);
        if role == Role::Assistant {
            self.last_message_preview = preview(content);
        }
        self.write_metadata()?;
        tracing::debug!(target: "reverie::session", session = %self.id, role = role.label(), "Appended message");
        Ok(())
    }

    /// Register an artifact produced inside the session folder: update the matching `last_*`
    /// slot, attach it to the latest assistant entry and log a `Generated ...` line.
    pub fn record_media(&mut self, kind: MediaKind, path: &Path) -> ReverieResult<MediaRef> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| ReverieError::NotFound(format!("artifact '{}'", path.display())))?;
        let local = self.folder.join(&filename);
        if !local.is_file() {
            return Err(ReverieError::NotFound(format!(
                "artifact '{filename}' in session folder"
            )));
        }
        let media = MediaRef {
            kind,
            filename: filename.clone(),
            url: self.media_url(&filename),
        };
        match kind {
            MediaKind::Image => self.last_image_path = Some(local),
            MediaKind::Audio => self.last_audio_path = Some(local),
            MediaKind::Video => self.last_video_path = Some(local),
        }
        if let Some(entry) = self.transcript.iter_mut().rev().find(|e| e.role == Role::Assistant) {
            entry.media.push(media.clone());
        }
        self.append_log(&log::render_media_line(Local::now().naive_local(), kind, &filename))?;
        tracing::info!(target: "reverie::session", session = %self.id, kind = kind.log_label(), file = %filename, "Artifact recorded");
        Ok(media)
    }

    /// Drop the last transcript entry. The log is only normalized by [`Session::save_full`].
    pub fn delete_last(&mut self) -> Option<TranscriptEntry> {
        let removed = self.transcript.pop();
        self.refresh_preview();
        removed
    }

    /// Replace the content of the last transcript entry.
    pub fn edit_last(&mut self, text: &str) -> ReverieResult<()> {
        let entry = self
            .transcript
            .last_mut()
            .ok_or_else(|| ReverieError::PreconditionMissing("No messages to edit".into()))?;
        entry.content = text.to_string();
        self.refresh_preview();
        Ok(())
    }

    /// Rewrite the log and the sidecar from the in-memory transcript.
    pub fn save_full(&self) -> ReverieResult<()> {
        let mut out = String::new();
        for entry in &self.transcript {
            let ts = entry.timestamp.unwrap_or_else(|| Local::now().naive_local());
            out.push_str(&log::render_line(ts, entry.role, &entry.content));
            for media in &entry.media {
                out.push_str(&log::render_media_line(ts, media.kind, &media.filename));
            }
        }
        std::fs::write(self.log_path(), out)?;
        self.write_metadata()
    }

    fn refresh_preview(&mut self) {
        self.last_message_preview = last_assistant(&self.transcript)
            .map(preview)
            .unwrap_or_default();
    }

    fn append_log(&self, line: &str) -> ReverieResult<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn write_metadata(&self) -> ReverieResult<()> {
        let json = serde_json::to_string_pretty(&self.metadata())?;
        std::fs::write(self.folder.join(METADATA_FILE), json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_from_extension() {
        assert_eq!(MediaKind::from_path(Path::new("a/selfie.PNG")), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path(Path::new("tts.mp3")), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_path(Path::new("x.mp4")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("status.txt")), None);
    }

    #[test]
    fn media_ref_serializes_type_field() {
        let media = MediaRef {
            kind: MediaKind::Audio,
            filename: "tts_response_1.mp3".into(),
            url: "/output/s/tts_response_1.mp3".into(),
        };
        let json = serde_json::to_value(&media).unwrap();
        assert_eq!(json["type"], "audio");
    }

    #[test]
    fn entry_equality_ignores_timestamp() {
        let a = TranscriptEntry::new(Role::User, "hi");
        let mut b = a.clone();
        b.timestamp = None;
        assert_eq!(a, b);
    }
}
