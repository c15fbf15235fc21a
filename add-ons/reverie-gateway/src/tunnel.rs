//! Optional public URL through a `cloudflared` quick tunnel.
//!
//! The child is spawned with `kill_on_drop`, so the returned handle must outlive the server.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use reverie_core::{ReverieError, ReverieResult};

static TUNNEL_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://[a-z0-9-]+\.trycloudflare\.com").expect("valid tunnel url regex")
});

pub fn find_tunnel_url(line: &str) -> Option<&str> {
    TUNNEL_URL_RE.find(line).map(|m| m.as_str())
}

pub async fn spawn(port: u16, url_file: &Path) -> ReverieResult<Child> {
    let mut child = Command::new("cloudflared")
        .args(["tunnel", "--url", &format!("http://127.0.0.1:{port}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReverieError::BackendUnavailable("cloudflared is not installed".into())
            } else {
                ReverieError::Io(e)
            }
        })?;

    // cloudflared prints its banner, including the URL, on stderr.
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ReverieError::Subprocess("cloudflared stderr not captured".into()))?;
    let url_file: PathBuf = url_file.to_path_buf();
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut published = false;
        while let Ok(Some(line)) = lines.next_line().await {
            if published {
                continue;
            }
            if let Some(url) = find_tunnel_url(&line) {
                published = true;
                match tokio::fs::write(&url_file, format!("{url}\n")).await {
                    Ok(()) => tracing::info!(target: "reverie::gateway", %url, file = %url_file.display(), "Tunnel published"),
                    Err(e) => tracing::warn!(target: "reverie::gateway", error = %e, "Could not write tunnel URL file"),
                }
            }
        }
        tracing::warn!(target: "reverie::gateway", "cloudflared exited");
    });
    Ok(child)
}
