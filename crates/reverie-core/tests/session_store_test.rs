//! Session Store behaviour against a real folder tree.

use reverie_core::session::store::UNKNOWN_CHARACTER;
use reverie_core::session::METADATA_FILE;
use reverie_core::{MediaKind, ReverieError, Role, SessionStore, TranscriptEntry};
use std::path::Path;

fn store(root: &Path) -> SessionStore {
    SessionStore::new(root, "/output")
}

#[test]
fn fresh_session_resumes_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let created = store.create("Alpha", "alpha").unwrap();
    let resumed = store.resume(created.id()).unwrap();
    assert!(resumed.transcript().is_empty());
    assert_eq!(resumed.character_name(), "Alpha");
}

#[test]
fn appended_transcript_survives_resume() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let mut session = store.create("Alpha", "alpha").unwrap();
    session.append(Role::Assistant, "Welcome back.\n*She smiles.*").unwrap();
    session.append(Role::User, "hello").unwrap();
    session.append(Role::Assistant, "Hi there!").unwrap();

    let resumed = store.resume(session.id()).unwrap();
    assert_eq!(resumed.transcript(), session.transcript());
    assert_eq!(resumed.last_message_preview(), "Hi there!");

    let log = std::fs::read_to_string(session.log_path()).unwrap();
    assert_eq!(log.lines().filter(|l| l.starts_with('[')).count(), 3);
    assert!(log.contains("**User**: hello"));
}

#[test]
fn preview_is_first_hundred_chars_of_last_assistant() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let mut session = store.create("Alpha", "alpha").unwrap();
    let long = "x".repeat(150);
    session.append(Role::Assistant, &long).unwrap();
    session.append(Role::User, "short").unwrap();
    assert_eq!(session.last_message_preview().len(), 100);

    let meta: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(session.folder().join(METADATA_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(meta["last_message_preview"].as_str().unwrap().len(), 100);
    assert_eq!(meta["character"], "Alpha");
    assert_eq!(meta["session_id"], "alpha");
}

#[test]
fn media_is_recorded_and_reattached() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let mut session = store.create("Alpha", "alpha").unwrap();
    session.append(Role::Assistant, "Look at this.").unwrap();

    let image = session.folder().join("selfie_image_20240101_000000.png");
    std::fs::write(&image, b"png").unwrap();
    let media = session.record_media(MediaKind::Image, &image).unwrap();
    assert_eq!(media.url, "/output/alpha/selfie_image_20240101_000000.png");
    assert_eq!(session.last_image_path(), Some(image.as_path()));

    // A video dropped in without a log line is picked up by the folder scan.
    let video = session.folder().join("infinitetalk_video_20240101_000001.mp4");
    std::fs::write(&video, b"mp4").unwrap();

    let resumed = store.resume(session.id()).unwrap();
    let last = resumed.transcript().last().unwrap();
    let kinds: Vec<MediaKind> = last.media.iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![MediaKind::Image, MediaKind::Video]);
    assert_eq!(resumed.last_video_path(), Some(video.as_path()));
    assert_eq!(resumed.last_image_path(), Some(image.as_path()));
    assert!(resumed.last_audio_path().is_none());
}

#[test]
fn record_media_outside_folder_fails() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let mut session = store.create("Alpha", "alpha").unwrap();
    let err = session
        .record_media(MediaKind::Audio, Path::new("/nonexistent/tts_response_1.mp3"))
        .unwrap_err();
    assert!(matches!(err, ReverieError::NotFound(_)));
    assert!(session.last_audio_path().is_none());
}

#[test]
fn folder_without_log_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("empty")).unwrap();
    let err = store(dir.path()).resume("empty").unwrap_err();
    assert!(matches!(err, ReverieError::NotFound(_)));
    assert!(matches!(store(dir.path()).resume("missing"), Err(ReverieError::NotFound(_))));
}

#[test]
fn media_only_log_yields_empty_transcript() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("old");
    std::fs::create_dir(&folder).unwrap();
    std::fs::write(folder.join("a.png"), b"png").unwrap();
    std::fs::write(
        folder.join("old.txt"),
        "[2024-01-01 10:00:00] **Bot**: Generated selfie: a.png\n",
    )
    .unwrap();
    let session = store(dir.path()).resume("old").unwrap();
    assert!(session.transcript().is_empty());
    assert!(session.is_legacy());
    assert_eq!(session.character_name(), UNKNOWN_CHARACTER);
}

#[test]
fn status_file_is_not_mistaken_for_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("legacy");
    std::fs::create_dir(&folder).unwrap();
    std::fs::write(folder.join("status.txt"), "Generating video\n").unwrap();
    assert!(matches!(store(dir.path()).resume("legacy"), Err(ReverieError::NotFound(_))));

    std::fs::write(
        folder.join("conversation_2023.txt"),
        "[2023-06-01 09:00:00] **User**: hey\n[2023-06-01 09:00:01] **Bot**: hello you\n",
    )
    .unwrap();
    let session = store(dir.path()).resume("legacy").unwrap();
    assert_eq!(session.transcript().len(), 2);
    assert_eq!(session.transcript()[1].role, Role::Assistant);
}

#[test]
fn editors_and_full_save() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    let mut session = store.create("Alpha", "alpha").unwrap();
    session.append(Role::User, "one").unwrap();
    session.append(Role::Assistant, "two").unwrap();
    session.append(Role::User, "three").unwrap();

    let removed = session.delete_last().unwrap();
    assert_eq!(removed.content, "three");
    session.edit_last("TWO").unwrap();

    // The log still carries the old tail until a full save.
    let before = store.resume(session.id()).unwrap();
    assert_eq!(before.transcript().len(), 3);

    session.save_full().unwrap();
    let after = store.resume(session.id()).unwrap();
    assert_eq!(
        after.transcript(),
        &[
            TranscriptEntry::new(Role::User, "one"),
            TranscriptEntry::new(Role::Assistant, "TWO"),
        ]
    );
}

#[test]
fn list_sessions_sorted_with_legacy_entries() {
    let dir = tempfile::tempdir().unwrap();
    let store = store(dir.path());
    store.create("Alpha", "first").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    store.create("Beta", "second").unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    store.create("Alpha", "third").unwrap();
    std::fs::create_dir(dir.path().join("ancient")).unwrap();

    let all = store.list_sessions(None).unwrap();
    assert_eq!(all.len(), 4);
    let ids: Vec<&str> = all
        .iter()
        .filter(|m| !m.legacy)
        .map(|m| m.session_id.as_str())
        .collect();
    assert_eq!(ids, vec!["third", "second", "first"]);
    assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));

    let alpha = store.list_sessions(Some("Alpha")).unwrap();
    assert!(alpha.iter().all(|m| m.character == "Alpha" || m.legacy));
    assert_eq!(alpha.iter().filter(|m| !m.legacy).count(), 2);
    let legacy = alpha.iter().find(|m| m.legacy).unwrap();
    assert_eq!(legacy.character, UNKNOWN_CHARACTER);
}
