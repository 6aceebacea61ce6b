//! yt-dlp subprocess implementation of the media fetcher. Extraction,
//! format negotiation, and trimming all happen inside yt-dlp; this module
//! only builds the command line and translates its stdout into events.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::SystemTime,
};

use async_trait::async_trait;
use tokio::{
    fs,
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::Command,
    sync::mpsc,
};
use tracing::{debug, warn};

use crate::{
    fetcher::{FetchError, FetchRequest, MediaFetcher, MediaInfo, ProgressEvent},
    media::QualityTier,
};

/// Marker prepended to progress-template output so transfer snapshots can be
/// told apart from the rest of yt-dlp's stdout chatter.
const PROGRESS_TAG: &str = "clipfetch-progress";

pub struct YtDlpFetcher {
    bin: PathBuf,
}

impl YtDlpFetcher {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }
}

fn progress_template() -> String {
    format!(
        "download:{PROGRESS_TAG} %(progress.downloaded_bytes)s \
         %(progress.total_bytes)s %(progress.total_bytes_estimate)s"
    )
}

fn format_selector(quality: QualityTier) -> String {
    match quality.height_cap() {
        Some(h) => format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]"),
        None => "best".to_string(),
    }
}

fn section_arg(start_seconds: u64, end_seconds: Option<u64>) -> Option<String> {
    match (start_seconds, end_seconds) {
        (0, None) => None,
        (start, None) => Some(format!("*{start}-inf")),
        (start, Some(end)) => Some(format!("*{start}-{end}")),
    }
}

/// Parse one tagged progress-template line. yt-dlp prints `NA` for fields it
/// does not know and occasionally floats for the ones it does.
fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let rest = line.trim().strip_prefix(PROGRESS_TAG)?;
    let mut fields = rest.split_whitespace();
    let downloaded_bytes = parse_bytes_field(fields.next()?)?;
    let total_bytes = fields.next().and_then(parse_bytes_field);
    let total_bytes_estimate = fields.next().and_then(parse_bytes_field);
    Some(ProgressEvent::Transferred {
        downloaded_bytes,
        total_bytes,
        total_bytes_estimate,
    })
}

fn parse_bytes_field(raw: &str) -> Option<u64> {
    raw.parse::<f64>().ok().filter(|v| *v >= 0.0).map(|v| v as u64)
}

/// Pull the output path out of yt-dlp's destination announcements. The
/// merger line supersedes per-stream destinations, so the last match wins.
fn parse_destination_line(line: &str) -> Option<String> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix("[download] Destination:") {
        let path = rest.trim();
        if !path.is_empty() {
            return Some(path.to_string());
        }
    }

    if let Some(rest) = line.strip_prefix("[Merger] Merging formats into \"") {
        let path = rest.trim_end_matches('"');
        if !path.is_empty() {
            return Some(path.to_string());
        }
    }

    None
}

fn stderr_tail(stderr: &str) -> String {
    let tail: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .rev()
        .take(3)
        .collect();
    if tail.is_empty() {
        "yt-dlp exited with a failure status".to_string()
    } else {
        tail.into_iter().rev().collect::<Vec<_>>().join("; ")
    }
}

/// Fallback when no destination line was seen: newest finished file in the
/// scratch directory.
async fn newest_media_file(dir: &Path) -> Result<Option<PathBuf>, std::io::Error> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if name.ends_with(".part") || name.ends_with(".ytdl") {
            continue;
        }
        let modified = entry
            .metadata()
            .await?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().map(|(t, _)| modified > *t).unwrap_or(true) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn probe(&self, url: &str) -> Result<MediaInfo, FetchError> {
        let output = Command::new(&self.bin)
            .arg("-J")
            .arg("--no-playlist")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(FetchError::Spawn)?;

        if !output.status.success() {
            return Err(FetchError::Extraction(stderr_tail(
                &String::from_utf8_lossy(&output.stderr),
            )));
        }

        let json: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|err| FetchError::Extraction(format!("unreadable metadata: {err}")))?;
        let title = json
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let duration_seconds = json
            .get("duration")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0) as u64;

        Ok(MediaInfo {
            title,
            duration_seconds,
        })
    }

    async fn fetch(
        &self,
        request: FetchRequest,
        events: mpsc::Sender<ProgressEvent>,
    ) -> Result<PathBuf, FetchError> {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("--newline")
            .arg("--no-playlist")
            .arg("--progress-template")
            .arg(progress_template())
            .arg("-f")
            .arg(format_selector(request.quality))
            .arg("-o")
            .arg(request.dest_dir.join("%(title)s.%(ext)s"));
        if let Some(section) = section_arg(request.start_seconds, request.end_seconds) {
            cmd.arg("--download-sections").arg(section);
            cmd.arg("--force-keyframes-at-cuts");
        }
        cmd.arg(&request.url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(FetchError::Spawn)?;

        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let mut destination: Option<PathBuf> = None;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(event) = parse_progress_line(&line) {
                    let _ = events.send(event).await;
                    continue;
                }
                if let Some(path) = parse_destination_line(&line) {
                    if line.trim_start().starts_with("[Merger]") {
                        // Raw transfer is done once merging starts.
                        let _ = events.send(ProgressEvent::Finished).await;
                    }
                    debug!(destination = %path, "yt-dlp destination");
                    destination = Some(PathBuf::from(path));
                }
            }
        }

        let stderr_buf = stderr_task.await.unwrap_or_default();
        let status = child.wait().await?;
        if !status.success() {
            return Err(FetchError::Extraction(stderr_tail(&stderr_buf)));
        }

        let _ = events.send(ProgressEvent::Finished).await;

        if let Some(path) = destination {
            if fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(path);
            }
            warn!(
                path = %path.display(),
                "announced destination missing, scanning scratch dir"
            );
        }

        newest_media_file(&request.dest_dir)
            .await?
            .ok_or(FetchError::MissingOutput)
    }
}
