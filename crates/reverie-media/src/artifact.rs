//! Shared plumbing for artifact producers: HTTP client, data URIs, downloads and
//! collision-free artifact names inside a session folder.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{Local, NaiveDateTime};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reverie_core::{ReverieError, ReverieResult};

/// Per-request deadline for media vendors.
pub const MEDIA_TIMEOUT: Duration = Duration::from_secs(300);

const ARTIFACT_TIMESTAMP: &str = "%Y%m%d_%H%M%S";

pub fn media_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(MEDIA_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// `data:<mime>;base64,<payload>` for a local file.
pub async fn data_uri(path: &Path) -> ReverieResult<String> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ReverieError::NotFound(format!("file '{}'", path.display()))
        } else {
            ReverieError::Io(e)
        }
    })?;
    Ok(format!("data:{};base64,{}", mime_for(path), STANDARD.encode(bytes)))
}

/// Decode plain base64 or a `data:...;base64,` URI.
pub fn decode_base64(payload: &str) -> ReverieResult<Vec<u8>> {
    let body = match payload.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => payload,
    };
    STANDARD
        .decode(body.trim())
        .map_err(|e| ReverieError::Malformed(format!("invalid base64 payload: {e}")))
}

pub async fn download(client: &reqwest::Client, url: &str) -> ReverieResult<Vec<u8>> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(ReverieError::from_response(resp).await);
    }
    Ok(resp.bytes().await?.to_vec())
}

/// Image extension from magic bytes; PNG when unrecognised.
pub fn sniff_image_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "jpg"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "webp"
    } else {
        "png"
    }
}

/// `<folder>/<prefix>_<YYYYmmdd_HHMMSS>.<ext>`, with `_<n>` before the extension when taken.
pub fn artifact_path(folder: &Path, prefix: &str, ext: &str) -> PathBuf {
    artifact_path_at(folder, prefix, ext, Local::now().naive_local())
}

fn artifact_path_at(folder: &Path, prefix: &str, ext: &str, at: NaiveDateTime) -> PathBuf {
    let stem = format!("{prefix}_{}", at.format(ARTIFACT_TIMESTAMP));
    let first = folder.join(format!("{stem}.{ext}"));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| folder.join(format!("{stem}_{n}.{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

/// Write bytes as a fresh artifact and return its path.
pub async fn write_artifact(
    folder: &Path,
    prefix: &str,
    ext: &str,
    bytes: &[u8],
) -> ReverieResult<PathBuf> {
    let path = artifact_path(folder, prefix, ext);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn artifact_names_get_numeric_suffix_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let at = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 30, 5)
            .unwrap();
        let first = artifact_path_at(dir.path(), "tts_response", "mp3", at);
        assert_eq!(first.file_name().unwrap(), "tts_response_20240501_123005.mp3");
        std::fs::write(&first, b"a").unwrap();
        let second = artifact_path_at(dir.path(), "tts_response", "mp3", at);
        assert_eq!(second.file_name().unwrap(), "tts_response_20240501_123005_1.mp3");
    }

    #[test]
    fn sniffs_common_image_formats() {
        assert_eq!(sniff_image_extension(&[0xFF, 0xD8, 0xFF, 0xE0]), "jpg");
        assert_eq!(sniff_image_extension(b"RIFF\0\0\0\0WEBPVP8 "), "webp");
        assert_eq!(sniff_image_extension(b"\x89PNG\r\n"), "png");
    }

    #[test]
    fn decodes_data_uri_and_bare_base64() {
        assert_eq!(decode_base64("data:image/png;base64,aGk=").unwrap(), b"hi");
        assert_eq!(decode_base64("aGk=").unwrap(), b"hi");
        assert!(matches!(decode_base64("***"), Err(ReverieError::Malformed(_))));
    }

    #[tokio::test]
    async fn data_uri_carries_mime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.mp3");
        std::fs::write(&path, b"hi").unwrap();
        assert_eq!(data_uri(&path).await.unwrap(), "data:audio/mpeg;base64,aGk=");
        let missing = data_uri(&dir.path().join("nope.png")).await.unwrap_err();
        assert!(matches!(missing, ReverieError::NotFound(_)));
    }
}
