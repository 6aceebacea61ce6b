use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::media::QualityTier;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to launch fetcher process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("fetcher reported success but produced no output file")]
    MissingOutput,
}

/// One download order for the fetcher. Time bounds are already normalized:
/// a zero start means no leading trim and `end_seconds` is only present when
/// it lies strictly after the start.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub quality: QualityTier,
    pub start_seconds: u64,
    pub end_seconds: Option<u64>,
    pub dest_dir: PathBuf,
}

/// Push notification from the fetcher. `Finished` marks the end of the raw
/// transfer; post-processing (merge/trim) may still follow before `fetch`
/// returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Transferred {
        downloaded_bytes: u64,
        total_bytes: Option<u64>,
        total_bytes_estimate: Option<u64>,
    },
    Finished,
}

#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub title: String,
    pub duration_seconds: u64,
}

/// Boundary to the external media-extraction capability. `probe` is a
/// metadata-only query; `fetch` writes the media below `dest_dir` and emits
/// progress events, in order, on the given channel.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn probe(&self, url: &str) -> Result<MediaInfo, FetchError>;

    async fn fetch(
        &self,
        request: FetchRequest,
        events: mpsc::Sender<ProgressEvent>,
    ) -> Result<PathBuf, FetchError>;
}
