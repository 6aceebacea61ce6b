use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::media::QualityTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Downloading,
    Processing,
    Complete,
    Error,
    Expired,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Expired)
    }
}

/// One download request and its tracked lifecycle. Owned exclusively by the
/// `JobStore`; the worker mutates it through `JobStore::update` and pollers
/// only ever see cloned snapshots.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub output_path: Option<PathBuf>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            status: JobStatus::Starting,
            progress: 0,
            output_path: None,
            error: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    pub fn to_response(&self) -> DownloadStatusResponse {
        DownloadStatusResponse {
            job_id: self.id.clone(),
            status: self.status.as_str().to_string(),
            progress: self.progress,
            error: self.error.clone(),
            file_name: self
                .output_path
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned()),
        }
    }
}

/// Submission payload. Quality and both time bounds are optional; unknown
/// quality falls back to the best tier and unparseable times are treated as
/// zero rather than rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

/// Normalized inputs handed from the gateway to the worker.
#[derive(Debug, Clone)]
pub struct DownloadSpec {
    pub url: String,
    pub quality: QualityTier,
    pub start_seconds: u64,
    pub end_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadAcceptedResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStatusResponse {
    pub job_id: String,
    pub status: String,
    pub progress: u8,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl DownloadStatusResponse {
    /// Soft projection for ids that were never created. Pollers get this as a
    /// regular 200 body instead of a hard failure.
    pub fn not_found(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: "not_found".to_string(),
            progress: 0,
            error: Some("Download not found".to_string()),
            file_name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfoResponse {
    pub title: String,
    pub duration_seconds: u64,
    pub formatted_duration: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_empty() {
        let job = Job::new("abc");
        assert_eq!(job.status, JobStatus::Starting);
        assert_eq!(job.progress, 0);
        assert!(job.output_path.is_none());
        assert!(job.error.is_none());
    }

    #[test]
    fn not_found_projection_is_soft() {
        let response = DownloadStatusResponse::not_found("missing");
        assert_eq!(response.status, "not_found");
        assert_eq!(response.progress, 0);
        assert_eq!(response.error.as_deref(), Some("Download not found"));
    }

    #[test]
    fn response_exposes_file_name_only() {
        let mut job = Job::new("abc");
        job.status = JobStatus::Complete;
        job.output_path = Some(PathBuf::from("/data/downloads/abc/clip.mp4"));
        let response = job.to_response();
        assert_eq!(response.status, "complete");
        assert_eq!(response.file_name.as_deref(), Some("clip.mp4"));
    }
}
