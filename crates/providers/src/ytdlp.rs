use crate::{MediaMetadata, MetadataResolver, MetadataStream, ResolveError, SearchProvider};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

const SEARCH_CANDIDATES: usize = 5;

#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    url: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
}

impl YtDlp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub async fn version(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program))?;
        if !output.status.success() {
            return Err(anyhow!("{} --version exited with {}", self.program, output.status));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn fetch_info(&self, locator: &str) -> Result<MediaMetadata, ResolveError> {
        let output = Command::new(&self.program)
            .args(["-j", "--no-playlist", "-f", "bestaudio/best"])
            .arg(locator)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program))
            .map_err(|err| ResolveError::Upstream(format!("{err:#}")))?;

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        parse_video_info(&output.stdout)
    }

    async fn spawn_flat_listing(&self, target: &str) -> Result<Child> {
        Command::new(&self.program)
            .args(["--flat-playlist", "--print", "url"])
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))
    }
}

#[async_trait]
impl MetadataResolver for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn resolve_one(&self, locator: &str) -> Result<MediaMetadata, ResolveError> {
        self.fetch_info(locator).await
    }

    async fn resolve_playlist(&self, locator: &str) -> Result<MetadataStream, ResolveError> {
        let mut child = self
            .spawn_flat_listing(locator)
            .await
            .map_err(|err| ResolveError::Upstream(format!("{err:#}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ResolveError::Upstream("playlist listing has no stdout".to_string()))?;

        let state = PlaylistCursor {
            resolver: self.clone(),
            lines: BufReader::new(stdout).lines(),
            _child: child,
        };

        // Each entry is resolved only when the consumer asks for it, so a
        // consumer that stops early never pays for the rest of the playlist.
        let entries = stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            loop {
                match state.lines.next_line().await {
                    Ok(Some(line)) => {
                        let url = line.trim().to_string();
                        if url.is_empty() {
                            continue;
                        }
                        debug!(%url, "resolving playlist entry");
                        let item = state.resolver.fetch_info(&url).await;
                        return Some((item, Some(state)));
                    }
                    Ok(None) => return None,
                    Err(err) => {
                        warn!(error=%err, "playlist listing read failed");
                        return Some((Err(ResolveError::Upstream(err.to_string())), None));
                    }
                }
            }
        });

        Ok(entries.boxed())
    }
}

#[async_trait]
impl SearchProvider for YtDlp {
    async fn search(&self, term: &str) -> Result<Vec<String>, ResolveError> {
        let target = format!("ytsearch{SEARCH_CANDIDATES}:{term}");
        let output = Command::new(&self.program)
            .args(["--flat-playlist", "--print", "url"])
            .arg(&target)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program))
            .map_err(|err| ResolveError::Upstream(format!("{err:#}")))?;

        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

struct PlaylistCursor {
    resolver: YtDlp,
    lines: Lines<BufReader<ChildStdout>>,
    // Held so the listing process lives as long as the stream; killed on drop.
    _child: Child,
}

fn parse_video_info(raw: &[u8]) -> Result<MediaMetadata, ResolveError> {
    let info: VideoInfo = serde_json::from_slice(raw)
        .map_err(|err| ResolveError::Upstream(format!("invalid JSON from resolver: {err}")))?;

    let stream_locator = info
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ResolveError::Value("no playable stream".to_string()))?;
    let length_seconds = info
        .duration
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| d.round() as u64)
        .unwrap_or(0);

    Ok(MediaMetadata {
        stream_locator,
        title: info.title.unwrap_or_else(|| "Unknown Title".to_string()),
        length_seconds,
        artwork_url: info.thumbnail,
        canonical_url: info.webpage_url,
    })
}

fn classify_failure(stderr: &str) -> ResolveError {
    const VALUE_MARKERS: [&str; 4] = [
        "Unsupported URL",
        "is not a valid URL",
        "Incomplete YouTube ID",
        "Video unavailable",
    ];
    let message = stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .unwrap_or(stderr)
        .trim()
        .to_string();
    if VALUE_MARKERS.iter().any(|m| stderr.contains(m)) {
        ResolveError::Value(message)
    } else {
        ResolveError::Upstream(message)
    }
}
