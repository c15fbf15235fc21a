//! **Post-processor**: ffmpeg wrappers for last-frame extraction and multi-clip concatenation.
//!
//! Every clip is normalised to 1280x720 at 30 fps (scale + pad letterboxing, stereo AAC, silent
//! track when the source has none) so the final concat can stream-copy. Scratch files live in a
//! temporary directory that is removed on every exit path.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use reverie_core::{ReverieError, ReverieResult};

use crate::artifact;

pub const TARGET_WIDTH: u32 = 1280;
pub const TARGET_HEIGHT: u32 = 720;
pub const TARGET_FPS: u32 = 30;
/// Length of the clip made from a still image.
pub const IMAGE_CLIP_SECONDS: u32 = 2;
const STDERR_TAIL_LINES: usize = 15;
const SILENCE: &str = "anullsrc=channel_layout=stereo:sample_rate=44100";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipKind {
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipSource {
    pub path: PathBuf,
    pub kind: ClipKind,
}

fn scale_pad_filter() -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,fps={TARGET_FPS},format=yuv420p",
        w = TARGET_WIDTH,
        h = TARGET_HEIGHT
    )
}

fn encode_args() -> Vec<String> {
    [
        "-c:v", "libx264", "-preset", "veryfast", "-crf", "20", "-pix_fmt", "yuv420p",
        "-r", "30", "-c:a", "aac", "-ar", "44100", "-ac", "2", "-shortest",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// ffmpeg arguments that turn one source into a normalised clip at `out`.
pub fn normalize_args(source: &ClipSource, has_audio: bool, out: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".into(), "-hide_banner".into()];
    match source.kind {
        ClipKind::Image => {
            let seconds = IMAGE_CLIP_SECONDS.to_string();
            args.extend([
                "-loop".into(), "1".into(), "-t".into(), seconds.clone(),
                "-i".into(), path_arg(&source.path),
                "-f".into(), "lavfi".into(), "-t".into(), seconds,
                "-i".into(), SILENCE.into(),
                "-map".into(), "0:v:0".into(), "-map".into(), "1:a:0".into(),
            ]);
        }
        ClipKind::Video if has_audio => {
            args.extend([
                "-i".into(), path_arg(&source.path),
                "-map".into(), "0:v:0".into(), "-map".into(), "0:a:0".into(),
            ]);
        }
        ClipKind::Video => {
            args.extend([
                "-i".into(), path_arg(&source.path),
                "-f".into(), "lavfi".into(), "-i".into(), SILENCE.into(),
                "-map".into(), "0:v:0".into(), "-map".into(), "1:a:0".into(),
            ]);
        }
    }
    args.extend(["-vf".into(), scale_pad_filter()]);
    args.extend(encode_args());
    args.push(path_arg(out));
    args
}

/// Concat-demuxer list file body. Single quotes in names are escaped the ffmpeg way.
pub fn concat_list(clips: &[PathBuf]) -> String {
    clips
        .iter()
        .map(|p| format!("file '{}'\n", path_arg(p).replace('\'', "'\\''")))
        .collect()
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Move a finished render into the session folder. Only complete files ever appear there:
/// across filesystems the copy goes to a `.part` name first and is renamed into place.
async fn publish(rendered: &Path, out: PathBuf) -> ReverieResult<PathBuf> {
    if tokio::fs::rename(rendered, &out).await.is_ok() {
        return Ok(out);
    }
    let mut partial = out.clone().into_os_string();
    partial.push(".part");
    let partial = PathBuf::from(partial);
    if let Err(err) = tokio::fs::copy(rendered, &partial).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(err.into());
    }
    tokio::fs::rename(&partial, &out).await?;
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct PostProcessor {
    ffmpeg: String,
    scratch_root: Option<PathBuf>,
}

impl PostProcessor {
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            scratch_root: None,
        }
    }

    /// Parent for scratch directories; the system temp dir by default.
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    fn scratch_dir(&self, prefix: &str) -> ReverieResult<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        Ok(match &self.scratch_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        })
    }

    async fn ffmpeg(&self, args: &[String]) -> ReverieResult<std::process::Output> {
        tracing::debug!(target: "reverie::post", args = ?args, "ffmpeg");
        Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ReverieError::BackendUnavailable(format!("ffmpeg not found at '{}'", self.ffmpeg))
                } else {
                    ReverieError::Io(e)
                }
            })
    }

    async fn run(&self, args: &[String]) -> ReverieResult<()> {
        let output = self.ffmpeg(args).await?;
        if output.status.success() {
            return Ok(());
        }
        let tail = stderr_tail(&output.stderr);
        tracing::error!(target: "reverie::post", status = %output.status, stderr = %tail, "ffmpeg failed");
        Err(ReverieError::Subprocess(format!("ffmpeg exited with {}: {tail}", output.status)))
    }

    /// `ffmpeg -i <file>` without an output exits non-zero but lists the streams on stderr.
    pub async fn has_audio(&self, path: &Path) -> ReverieResult<bool> {
        let output = self
            .ffmpeg(&["-hide_banner".into(), "-i".into(), path_arg(path)])
            .await?;
        Ok(String::from_utf8_lossy(&output.stderr).contains("Audio:"))
    }

    /// Seek to 0.1 s before the end and write one PNG into `folder`.
    pub async fn extract_last_frame(&self, video: &Path, folder: &Path) -> ReverieResult<PathBuf> {
        if !video.is_file() {
            return Err(ReverieError::NotFound(format!("video '{}'", video.display())));
        }
        let scratch = self.scratch_dir("reverie-frame")?;
        let rendered = scratch.path().join("last_frame.png");
        let args: Vec<String> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-sseof".into(),
            "-0.1".into(),
            "-i".into(),
            path_arg(video),
            "-frames:v".into(),
            "1".into(),
            "-update".into(),
            "1".into(),
            path_arg(&rendered),
        ];
        self.run(&args).await?;
        if !rendered.is_file() {
            return Err(ReverieError::Subprocess("ffmpeg wrote no frame".into()));
        }
        let out = publish(&rendered, artifact::artifact_path(folder, "last_frame", "png")).await?;
        tracing::info!(target: "reverie::post", file = %out.display(), "Last frame extracted");
        Ok(out)
    }

    /// Normalise each source, then stream-copy them into one MP4 in `folder`.
    pub async fn concatenate(&self, sources: &[ClipSource], folder: &Path) -> ReverieResult<PathBuf> {
        if sources.is_empty() {
            return Err(ReverieError::PreconditionMissing("No scenes to compile".into()));
        }
        for source in sources {
            if !source.path.is_file() {
                return Err(ReverieError::NotFound(format!("scene '{}'", source.path.display())));
            }
        }

        let scratch = self.scratch_dir("reverie-concat")?;
        let mut clips = Vec::with_capacity(sources.len());
        for (i, source) in sources.iter().enumerate() {
            let clip = scratch.path().join(format!("clip_{i:03}.mp4"));
            let has_audio = match source.kind {
                ClipKind::Video => self.has_audio(&source.path).await?,
                ClipKind::Image => false,
            };
            self.run(&normalize_args(source, has_audio, &clip)).await?;
            clips.push(clip);
        }

        let list = scratch.path().join("clips.txt");
        tokio::fs::write(&list, concat_list(&clips)).await?;
        let rendered = scratch.path().join("story.mp4");
        let args: Vec<String> = vec![
            "-y".into(),
            "-hide_banner".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            path_arg(&list),
            "-c".into(),
            "copy".into(),
            path_arg(&rendered),
        ];
        self.run(&args).await?;
        let out = publish(&rendered, artifact::artifact_path(folder, "story_video", "mp4")).await?;
        tracing::info!(target: "reverie::post", clips = clips.len(), file = %out.display(), "Story compiled");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_become_two_second_clips_with_silence() {
        let source = ClipSource {
            path: PathBuf::from("/s/a.png"),
            kind: ClipKind::Image,
        };
        let args = normalize_args(&source, false, Path::new("/t/clip_000.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-loop 1 -t 2 -i /s/a.png"));
        assert!(joined.contains("anullsrc"));
        assert!(joined.contains("pad=1280:720"));
        assert_eq!(args.last().unwrap(), "/t/clip_000.mp4");
    }

    #[test]
    fn videos_keep_their_own_audio_when_present() {
        let source = ClipSource {
            path: PathBuf::from("/s/v.mp4"),
            kind: ClipKind::Video,
        };
        let with = normalize_args(&source, true, Path::new("/t/o.mp4")).join(" ");
        assert!(with.contains("-map 0:a:0"));
        assert!(!with.contains("anullsrc"));
        let without = normalize_args(&source, false, Path::new("/t/o.mp4")).join(" ");
        assert!(without.contains("-map 1:a:0"));
    }

    #[test]
    fn concat_list_quotes_paths() {
        let list = concat_list(&[PathBuf::from("/t/clip_000.mp4"), PathBuf::from("/t/it's.mp4")]);
        assert_eq!(list, "file '/t/clip_000.mp4'\nfile '/t/it'\\''s.mp4'\n");
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let stderr: String = (0..30).map(|i| format!("line {i}\n")).collect();
        let tail = stderr_tail(stderr.as_bytes());
        assert!(tail.starts_with("line 15"));
        assert!(tail.ends_with("line 29"));
    }

    #[tokio::test]
    async fn missing_binary_is_backend_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("v.mp4");
        std::fs::write(&video, b"x").unwrap();
        let post = PostProcessor::new("/nonexistent/ffmpeg");
        let err = post.extract_last_frame(&video, dir.path()).await.unwrap_err();
        assert!(matches!(err, ReverieError::BackendUnavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_reports_stderr_and_cleans_scratch() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("ffmpeg");
        std::fs::write(&fake, "#!/bin/sh\necho 'Invalid data found when processing input' >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();
        let image = dir.path().join("a.png");
        std::fs::write(&image, b"png").unwrap();

        let scratch = tempfile::tempdir().unwrap();
        let post = PostProcessor::new(fake.to_string_lossy()).with_scratch_root(scratch.path());
        let err = post
            .concatenate(
                &[ClipSource {
                    path: image,
                    kind: ClipKind::Image,
                }],
                dir.path(),
            )
            .await
            .unwrap_err();
        match err {
            ReverieError::Subprocess(msg) => assert!(msg.contains("Invalid data found")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_concat_leaves_no_story_in_the_session_folder() {
        use std::os::unix::fs::PermissionsExt;
        let tools = tempfile::tempdir().unwrap();
        let fake = tools.path().join("ffmpeg");
        // Writes a partial output for every pass, then fails the concat pass.
        std::fs::write(
            &fake,
            "#!/bin/sh\nfor last; do :; done\necho partial > \"$last\"\ncase \"$*\" in *concat*) echo 'Conversion failed!' >&2; exit 1;; esac\nexit 0\n",
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let session = tempfile::tempdir().unwrap();
        let image = session.path().join("selfie_image_20250101_120000.png");
        std::fs::write(&image, b"png").unwrap();

        let post = PostProcessor::new(fake.to_string_lossy()).with_scratch_root(tools.path());
        let err = post
            .concatenate(
                &[ClipSource {
                    path: image,
                    kind: ClipKind::Image,
                }],
                session.path(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReverieError::Subprocess(ref msg) if msg.contains("Conversion failed")));
        let names: Vec<String> = std::fs::read_dir(session.path())
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["selfie_image_20250101_120000.png".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_concat_publishes_one_story() {
        use std::os::unix::fs::PermissionsExt;
        let tools = tempfile::tempdir().unwrap();
        let fake = tools.path().join("ffmpeg");
        std::fs::write(&fake, "#!/bin/sh\nfor last; do :; done\necho rendered > \"$last\"\nexit 0\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let session = tempfile::tempdir().unwrap();
        let image = session.path().join("a.png");
        std::fs::write(&image, b"png").unwrap();

        let post = PostProcessor::new(fake.to_string_lossy());
        let out = post
            .concatenate(
                &[ClipSource {
                    path: image,
                    kind: ClipKind::Image,
                }],
                session.path(),
            )
            .await
            .unwrap();
        assert_eq!(out.parent().unwrap(), session.path());
        assert!(out.file_name().unwrap().to_string_lossy().starts_with("story_video_"));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "rendered\n");
    }
}
