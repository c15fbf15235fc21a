//! Session folders under the output root: create (with collision suffixes), resume from the
//! text log, and list by metadata.

use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::log::{self, LogRecord};
use super::{
    MediaKind, MediaRef, Role, Session, SessionMetadata, TranscriptEntry, METADATA_FILE,
    STATUS_FILE,
};
use crate::error::{ReverieError, ReverieResult};

/// Character name given to sessions whose folder has no metadata sidecar.
pub const UNKNOWN_CHARACTER: &str = "Unknown";

/// Replace anything outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_id(desired: &str) -> String {
    let cleaned: String = desired
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}

fn modified(path: &Path) -> SystemTime {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Files in `folder` with a known media extension, oldest first (ties broken by name).
pub fn media_files(folder: &Path) -> ReverieResult<Vec<(MediaKind, PathBuf)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(kind) = MediaKind::from_path(&path) {
            files.push((kind, path));
        }
    }
    files.sort_by(|(_, a), (_, b)| modified(a).cmp(&modified(b)).then_with(|| a.cmp(b)));
    Ok(files)
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
    url_base: String,
}

impl SessionStore {
    /// `url_base` is the public prefix session folders are served under (e.g. `/output`).
    pub fn new(root: impl Into<PathBuf>, url_base: &str) -> Self {
        Self {
            root: root.into(),
            url_base: url_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Public URL of `filename` inside session `session_id`.
    pub fn media_url(&self, session_id: &str, filename: &str) -> String {
        format!("{}/{}/{}", self.url_base, session_id, filename)
    }

    /// Default folder name for a new session: `<character>_<YYYYmmdd_HHMMSS>`.
    pub fn default_session_id(character: &str) -> String {
        sanitize_id(&format!("{}_{}", character, Local::now().format("%Y%m%d_%H%M%S")))
    }

    fn blank_session(&self, id: String, character: &str, created_at: DateTime<Local>) -> Session {
        Session {
            url_prefix: format!("{}/{}", self.url_base, id),
            log_file: self.root.join(&id).join(format!("{id}.txt")),
            folder: self.root.join(&id),
            id,
            character_name: character.to_string(),
            created_at,
            transcript: Vec::new(),
            last_audio_path: None,
            last_image_path: None,
            last_video_path: None,
            last_message_preview: String::new(),
            legacy: false,
        }
    }

    /// Allocate `<desired>`, or `<desired>_1`, `<desired>_2`, ... if taken. Writes the metadata
    /// sidecar and an empty log immediately, so the folder is resumable from the start.
    pub fn create(&self, character: &str, desired_id: &str) -> ReverieResult<Session> {
        std::fs::create_dir_all(&self.root)?;
        let base = sanitize_id(desired_id);
        let mut id = base.clone();
        let mut counter = 1u32;
        loop {
            match std::fs::create_dir(self.root.join(&id)) {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    id = format!("{base}_{counter}");
                    counter += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
        let session = self.blank_session(id, character, Local::now());
        std::fs::File::create(session.log_path())?;
        session.write_metadata()?;
        tracing::info!(target: "reverie::session", session = %session.id, character, "Session created");
        Ok(session)
    }

    fn session_folder(&self, folder_name: &str) -> ReverieResult<PathBuf> {
        let trimmed = folder_name.trim();
        if trimmed.is_empty() || trimmed.contains(['/', '\\']) || trimmed == "." || trimmed == ".." {
            return Err(ReverieError::NotFound(format!("session '{folder_name}'")));
        }
        let folder = self.root.join(trimmed);
        if !folder.is_dir() {
            return Err(ReverieError::NotFound(format!("session '{folder_name}'")));
        }
        Ok(folder)
    }

    /// The log is `<id>.txt`; older folders may hold a differently named `.txt`.
    fn find_log(folder: &Path, id: &str) -> ReverieResult<Option<PathBuf>> {
        let preferred = folder.join(format!("{id}.txt"));
        if preferred.is_file() {
            return Ok(Some(preferred));
        }
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(folder)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.extension().is_some_and(|e| e == "txt")
                    && p.file_name().is_some_and(|n| n != STATUS_FILE)
            })
            .collect();
        candidates.sort();
        Ok(candidates.into_iter().next())
    }

    fn read_metadata(folder: &Path) -> Option<SessionMetadata> {
        let text = std::fs::read_to_string(folder.join(METADATA_FILE)).ok()?;
        match serde_json::from_str(&text) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!(target: "reverie::session", folder = %folder.display(), error = %e, "Unreadable session metadata");
                None
            }
        }
    }

    fn legacy_metadata(folder: &Path, id: &str) -> SessionMetadata {
        let created = std::fs::metadata(folder)
            .and_then(|m| m.created().or_else(|_| m.modified()))
            .map(DateTime::<Local>::from)
            .unwrap_or_else(|_| Local::now());
        SessionMetadata {
            session_id: id.to_string(),
            character: UNKNOWN_CHARACTER.to_string(),
            created_at: created,
            last_message_preview: String::new(),
            legacy: true,
        }
    }

    /// Rebuild a session from its folder.
    ///
    /// Media lines attach to the most recent assistant entry (and are dropped if there is
    /// none yet). Afterwards any `.mp4` the log never mentioned is attached to the last
    /// assistant entry, and the `last_*` slots point at the newest file of each kind.
    pub fn resume(&self, folder_name: &str) -> ReverieResult<Session> {
        let folder = self.session_folder(folder_name)?;
        let id = folder_name.trim().to_string();
        let log_path = Self::find_log(&folder, &id)?
            .ok_or_else(|| ReverieError::NotFound(format!("conversation log in '{id}'")))?;

        let meta = Self::read_metadata(&folder).unwrap_or_else(|| Self::legacy_metadata(&folder, &id));
        let mut session = self.blank_session(id.clone(), &meta.character, meta.created_at);
        session.legacy = meta.legacy;
        session.log_file = log_path.clone();

        let text = std::fs::read_to_string(&log_path)?;
        let mut attached: HashSet<String> = HashSet::new();
        for record in log::parse(&text) {
            match record {
                LogRecord::Message {
                    timestamp,
                    role,
                    content,
                } => session.transcript.push(TranscriptEntry {
                    role,
                    content,
                    media: Vec::new(),
                    timestamp,
                }),
                LogRecord::Media { kind, filename, .. } => {
                    if !folder.join(&filename).is_file() {
                        tracing::warn!(target: "reverie::session", file = %filename, "Logged artifact missing from folder");
                        continue;
                    }
                    let url = session.media_url(&filename);
                    match session.transcript.iter_mut().rev().find(|e| e.role == Role::Assistant) {
                        Some(entry) => {
                            attached.insert(filename.clone());
                            entry.media.push(MediaRef { kind, filename, url });
                        }
                        None => {
                            tracing::debug!(target: "reverie::session", file = %filename, "Media line before any assistant message discarded");
                        }
                    }
                }
            }
        }

        let files = media_files(&folder)?;
        let has_assistant = session.transcript.iter().any(|e| e.role == Role::Assistant);
        for (kind, path) in &files {
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if *kind == MediaKind::Video && has_assistant && !attached.contains(filename) {
                let url = session.media_url(filename);
                if let Some(entry) = session.transcript.iter_mut().rev().find(|e| e.role == Role::Assistant) {
                    entry.media.push(MediaRef {
                        kind: MediaKind::Video,
                        filename: filename.to_string(),
                        url,
                    });
                }
            }
            // Oldest first, so the last assignment per kind is the newest file.
            match kind {
                MediaKind::Image => session.last_image_path = Some(path.clone()),
                MediaKind::Audio => session.last_audio_path = Some(path.clone()),
                MediaKind::Video => session.last_video_path = Some(path.clone()),
            }
        }

        session.last_message_preview = meta.last_message_preview;
        if session.last_message_preview.is_empty() {
            session.refresh_preview();
        }
        tracing::info!(
            target: "reverie::session",
            session = %session.id,
            messages = session.transcript.len(),
            legacy = session.legacy,
            "Session resumed"
        );
        Ok(session)
    }

    /// Metadata for every session folder, newest first. Folders without a sidecar are listed
    /// as legacy entries (character "Unknown") regardless of the character filter.
    pub fn list_sessions(&self, character: Option<&str>) -> ReverieResult<Vec<SessionMetadata>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(id) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let meta = match Self::read_metadata(&path) {
                Some(meta) => meta,
                None => Self::legacy_metadata(&path, &id),
            };
            let wanted = meta.legacy || character.map_or(true, |c| c == meta.character);
            if wanted {
                sessions.push(meta);
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_id("Alpha_2024-01"), "Alpha_2024-01");
        assert_eq!(sanitize_id("Mia Lee/../x"), "Mia_Lee____x");
        assert_eq!(sanitize_id("   "), "session");
    }

    #[test]
    fn create_suffixes_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), "/output");
        let a = store.create("Alpha", "alpha_run").unwrap();
        let b = store.create("Alpha", "alpha_run").unwrap();
        let c = store.create("Alpha", "alpha_run").unwrap();
        assert_eq!(a.id(), "alpha_run");
        assert_eq!(b.id(), "alpha_run_1");
        assert_eq!(c.id(), "alpha_run_2");
        let re = regex::Regex::new(r"^alpha_run(_[0-9]+)?$").unwrap();
        for s in [&a, &b, &c] {
            assert!(re.is_match(s.id()));
            assert!(s.folder().join(METADATA_FILE).is_file());
        }
    }

    #[test]
    fn resume_rejects_path_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path(), "/output");
        assert!(matches!(store.resume("../etc"), Err(ReverieError::NotFound(_))));
        assert!(matches!(store.resume(".."), Err(ReverieError::NotFound(_))));
    }
}
