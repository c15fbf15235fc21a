//! Session export: one ZIP with the log, every artifact renamed `NNN_<name>` in chronological
//! order, and a standalone `index.html` gallery.

use chrono::{DateTime, Local, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::ZipWriter;

use reverie_core::session::store::media_files;
use reverie_core::{MediaKind, ReverieError, ReverieResult};

pub const LOG_ENTRY: &str = "conversation_log.txt";
pub const GALLERY_ENTRY: &str = "index.html";

static STAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_(\d{8}_\d{6})(?:_(\d+))?\.[A-Za-z0-9]+$").expect("valid stamp regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportItem {
    pub archive_name: String,
    pub kind: MediaKind,
    pub source: PathBuf,
}

/// Creation order: the `_%Y%m%d_%H%M%S[_n]` artifact suffix (`n` numerically, none first),
/// else the file's mtime.
fn creation_key(path: &Path) -> (NaiveDateTime, u32) {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    if let Some(caps) = STAMP_RE.captures(&name) {
        if let Ok(ts) = NaiveDateTime::parse_from_str(&caps[1], "%Y%m%d_%H%M%S") {
            let collision = caps
                .get(2)
                .and_then(|n| n.as_str().parse().ok())
                .unwrap_or(0);
            return (ts, collision);
        }
    }
    (modified_at(path), 0)
}

fn modified_at(path: &Path) -> NaiveDateTime {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    DateTime::<Local>::from(modified).naive_local()
}

/// Media in the folder, oldest first, with their prefixed archive names.
pub fn plan(folder: &Path) -> ReverieResult<Vec<ExportItem>> {
    let mut files = media_files(folder)?;
    files.sort_by_cached_key(|(_, path)| (creation_key(path), path.clone()));
    Ok(files
        .into_iter()
        .enumerate()
        .map(|(i, (kind, source))| {
            let name = source.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            ExportItem {
                archive_name: format!("{:03}_{name}", i + 1),
                kind,
                source,
            }
        })
        .collect())
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn gallery_html(session_id: &str, character: &str, items: &[ExportItem]) -> String {
    let mut body = String::new();
    for item in items {
        let name = escape_html(&item.archive_name);
        let tag = match item.kind {
            MediaKind::Image => format!(r#"<img src="{name}" alt="{name}">"#),
            MediaKind::Audio => format!(r#"<audio controls src="{name}"></audio>"#),
            MediaKind::Video => format!(r#"<video controls src="{name}"></video>"#),
        };
        body.push_str(&format!(
            "<figure>{tag}<figcaption>{name}</figcaption></figure>\n"
        ));
    }
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: sans-serif; background: #111; color: #eee; margin: 2rem; }}
figure {{ margin: 0 0 2rem 0; }}
img, video {{ max-width: 640px; display: block; }}
figcaption {{ font-size: 0.8rem; color: #999; }}
</style>
</head>
<body>
<h1>{title}</h1>
<p><a href="{log}">Conversation log</a></p>
{body}</body>
</html>
"#,
        title = escape_html(&format!("{character} - {session_id}")),
        log = LOG_ENTRY,
    )
}

fn zip_err(err: zip::result::ZipError) -> ReverieError {
    ReverieError::Io(std::io::Error::other(err))
}

/// Build the archive in memory. Blocking; run it off the async executor.
pub fn build_archive(
    session_id: &str,
    character: &str,
    log_path: &Path,
    folder: &Path,
) -> ReverieResult<Vec<u8>> {
    let items = plan(folder)?;
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let log = std::fs::read(log_path).unwrap_or_default();
    zip.start_file(LOG_ENTRY, options).map_err(zip_err)?;
    zip.write_all(&log)?;

    // Media is already compressed.
    let stored = options.compression_method(zip::CompressionMethod::Stored);
    for item in &items {
        zip.start_file(item.archive_name.as_str(), stored).map_err(zip_err)?;
        zip.write_all(&std::fs::read(&item.source)?)?;
    }

    zip.start_file(GALLERY_ENTRY, options).map_err(zip_err)?;
    zip.write_all(gallery_html(session_id, character, &items).as_bytes())?;

    let cursor = zip.finish().map_err(zip_err)?;
    tracing::info!(target: "reverie::gateway", session = session_id, media = items.len(), "Export built");
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_stamp_wins_over_mtime() {
        let dir = tempfile::tempdir().unwrap();
        // Written in reverse chronological order on purpose.
        for name in [
            "tts_response_20250101_120500.mp3",
            "selfie_image_20250101_120000_1.png",
            "selfie_image_20250101_120000.png",
            "wan_s2v_video_20250101_121000.mp4",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let names: Vec<String> = plan(dir.path())
            .unwrap()
            .into_iter()
            .map(|i| i.archive_name)
            .collect();
        assert_eq!(
            names,
            vec![
                "001_selfie_image_20250101_120000.png",
                "002_selfie_image_20250101_120000_1.png",
                "003_tts_response_20250101_120500.mp3",
                "004_wan_s2v_video_20250101_121000.mp4",
            ]
        );
    }

    #[test]
    fn same_second_collisions_sort_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "selfie_image_20250101_120000_10.png",
            "selfie_image_20250101_120000_2.png",
            "selfie_image_20250101_120000.png",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let names: Vec<String> = plan(dir.path())
            .unwrap()
            .into_iter()
            .map(|i| i.archive_name)
            .collect();
        assert_eq!(
            names,
            vec![
                "001_selfie_image_20250101_120000.png",
                "002_selfie_image_20250101_120000_2.png",
                "003_selfie_image_20250101_120000_10.png",
            ]
        );
    }

    #[test]
    fn gallery_escapes_and_references_prefixed_names() {
        let items = vec![ExportItem {
            archive_name: "001_a.png".into(),
            kind: MediaKind::Image,
            source: PathBuf::from("/x/a.png"),
        }];
        let html = gallery_html("s<1>", "Alpha", &items);
        assert!(html.contains(r#"<img src="001_a.png""#));
        assert!(html.contains("s&lt;1&gt;"));
    }
}
