use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, Response, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::fs;
use tracing::warn;
use url::Url;
use uuid::Uuid;

use crate::{
    media::{format_duration, normalize_clip_range, parse_time_spec, QualityTier},
    models::{
        DownloadAcceptedResponse, DownloadRequest, DownloadSpec, DownloadStatusResponse,
        JobStatus, VideoInfoResponse,
    },
    worker, AppState,
};

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true, "timestamp": Utc::now() }))
}

/// Accept a submission, create the job, and hand it to a worker. URL
/// validation is the only synchronous rejection; bad quality or time inputs
/// fall back silently.
pub async fn create_download(
    State(state): State<AppState>,
    Json(payload): Json<DownloadRequest>,
) -> impl IntoResponse {
    if let Err(message) = validate_media_url(&payload.url) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "code": "INVALID_URL",
                    "message": message
                }
            })),
        )
            .into_response();
    }

    let quality = QualityTier::parse(payload.quality.as_deref());
    let start = parse_time_spec(payload.start_time.as_deref().unwrap_or(""));
    let end = payload
        .end_time
        .as_deref()
        .filter(|raw| !raw.trim().is_empty())
        .map(parse_time_spec);
    let (start_seconds, end_seconds) = normalize_clip_range(start, end);

    let job_id = Uuid::new_v4().to_string();
    let job = match state.jobs.create(&job_id).await {
        Ok(job) => job,
        Err(err) => {
            // Unreachable with uuid ids, but never panic on it.
            warn!("Failed to create job record: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": {
                        "code": "JOB_CREATE_FAILED",
                        "message": "Could not create download job."
                    }
                })),
            )
                .into_response();
        }
    };

    let spec = DownloadSpec {
        url: payload.url.trim().to_string(),
        quality,
        start_seconds,
        end_seconds,
    };
    worker::spawn_download(state.clone(), job_id.clone(), spec);

    let response = DownloadAcceptedResponse {
        job_id,
        status: JobStatus::Starting,
        progress: 0,
        created_at: job.created_at,
    };

    (StatusCode::ACCEPTED, Json(response)).into_response()
}

/// Poll projection of a job. Unknown ids get the soft not-found body with a
/// 200 status instead of a hard failure.
pub async fn get_download(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let body = match state.jobs.get(&job_id).await {
        Some(job) => job.to_response(),
        None => DownloadStatusResponse::not_found(&job_id),
    };
    (StatusCode::OK, Json(body))
}

/// Serve the finished file. The recorded path is re-checked on disk; a
/// vanished file is a user-visible 410, not a crash.
pub async fn download_file(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> impl IntoResponse {
    let Some(job) = state.jobs.get(&job_id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": {
                    "code": "JOB_NOT_FOUND",
                    "message": "Download not found"
                }
            })),
        )
            .into_response();
    };

    if job.status != JobStatus::Complete {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "error": {
                    "code": "FILE_NOT_READY",
                    "message": "Download is not complete."
                }
            })),
        )
            .into_response();
    }

    let Some(path) = job.output_path else {
        return file_gone();
    };

    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return file_gone();
        }
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": {
                        "code": "FILE_READ_FAILED",
                        "message": format!("Failed to read download file: {err}")
                    }
                })),
            )
                .into_response();
        }
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{job_id}.mp4"));
    let content_disposition = format!("attachment; filename=\"{file_name}\"");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_DISPOSITION, content_disposition)
        .body(Body::from(bytes))
        .unwrap_or_else(|_| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": {
                        "code": "RESPONSE_BUILD_FAILED",
                        "message": "Failed to build download response."
                    }
                })),
            )
                .into_response()
        })
}

fn file_gone() -> axum::response::Response {
    (
        StatusCode::GONE,
        Json(json!({
            "error": {
                "code": "FILE_MISSING",
                "message": "Download file no longer exists."
            }
        })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct VideoInfoQuery {
    pub url: String,
}

/// Synchronous metadata probe; never creates a job.
pub async fn video_info(
    State(state): State<AppState>,
    Query(query): Query<VideoInfoQuery>,
) -> impl IntoResponse {
    if let Err(message) = validate_media_url(&query.url) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "code": "INVALID_URL",
                    "message": message
                }
            })),
        )
            .into_response();
    }

    match state.fetcher.probe(query.url.trim()).await {
        Ok(info) => {
            let response = VideoInfoResponse {
                title: info.title,
                duration_seconds: info.duration_seconds,
                formatted_duration: format_duration(info.duration_seconds),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(err) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": {
                    "code": "PROBE_FAILED",
                    "message": err.to_string()
                }
            })),
        )
            .into_response(),
    }
}

fn validate_media_url(raw: &str) -> Result<(), String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("URL must not be empty.".to_string());
    }
    let parsed = Url::parse(trimmed).map_err(|_| "URL is not well formed.".to_string())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err("URL must use http or https.".to_string());
    }
    if parsed.host_str().is_none() {
        return Err("URL must include a host.".to_string());
    }
    Ok(())
}
