use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use tokio::{sync::mpsc, time};
use tracing::{error, info, warn};

use crate::{
    fetcher::{FetchRequest, ProgressEvent},
    media::percent_complete,
    media_store,
    models::{DownloadSpec, JobStatus},
    AppState,
};

/// Spawn one worker task for a submitted job. Tasks are never pooled or
/// reused; admission is bounded by the process-wide download semaphore so
/// the submit path itself never blocks.
pub fn spawn_download(state: AppState, job_id: String, spec: DownloadSpec) {
    tokio::spawn(async move {
        if let Err(err) = run_download(&state, &job_id, spec).await {
            error!("Download job {job_id} failed: {err:#}");
            // run_download only errors before reaching a terminal state, so
            // nothing in the scratch dir will ever be served.
            let scratch_dir = media_store::job_scratch_dir(&state.config.download_root, &job_id);
            media_store::delete_dir_if_exists(&scratch_dir).await.ok();
            state
                .jobs
                .update(&job_id, |job| {
                    if !job.status.is_terminal() {
                        job.status = JobStatus::Error;
                        job.error = Some(err.to_string());
                        job.output_path = None;
                    }
                })
                .await;
        }
    });
}

/// Drive one download to its single terminal state. Fetch failures are
/// recorded on the job record, never propagated; pollers discover them on a
/// later poll.
async fn run_download(state: &AppState, job_id: &str, spec: DownloadSpec) -> Result<()> {
    let _permit = state
        .download_permits
        .clone()
        .acquire_owned()
        .await
        .context("download semaphore closed")?;

    let scratch_dir = media_store::job_scratch_dir(&state.config.download_root, job_id);
    media_store::create_scratch_dir(&scratch_dir).await?;

    state
        .jobs
        .update(job_id, |job| job.status = JobStatus::Downloading)
        .await;
    info!(job_id = %job_id, url = %spec.url, "Download started");

    let (events_tx, mut events_rx) = mpsc::channel(32);
    let fetcher = state.fetcher.clone();
    let request = FetchRequest {
        url: spec.url.clone(),
        quality: spec.quality,
        start_seconds: spec.start_seconds,
        end_seconds: spec.end_seconds,
        dest_dir: scratch_dir.clone(),
    };
    let fetch_task = tokio::spawn(async move { fetcher.fetch(request, events_tx).await });

    // Single consumer keeps per-job event ordering intact.
    while let Some(event) = events_rx.recv().await {
        apply_progress_event(state, job_id, event).await;
    }

    match fetch_task.await.context("fetch task panicked")? {
        Ok(output_path) => {
            let now = Utc::now();
            let expires_at = now + ChronoDuration::seconds(state.config.retention_seconds as i64);
            state
                .jobs
                .update(job_id, |job| {
                    job.status = JobStatus::Complete;
                    job.progress = 100;
                    job.output_path = Some(output_path.clone());
                    job.error = None;
                    job.expires_at = Some(expires_at);
                })
                .await;
            info!(
                job_id = %job_id,
                output = %output_path.display(),
                "Download job completed"
            );
        }
        Err(err) => {
            warn!(job_id = %job_id, "Download job failed: {err}");
            media_store::delete_dir_if_exists(&scratch_dir).await.ok();
            state
                .jobs
                .update(job_id, |job| {
                    job.status = JobStatus::Error;
                    job.error = Some(err.to_string());
                    job.output_path = None;
                })
                .await;
        }
    }

    Ok(())
}

/// Apply one fetcher event to the job record. Progress only moves while the
/// job is downloading and never regresses; `Finished` pins it at 100 and
/// marks the post-processing gap before completion.
async fn apply_progress_event(state: &AppState, job_id: &str, event: ProgressEvent) {
    match event {
        ProgressEvent::Transferred {
            downloaded_bytes,
            total_bytes,
            total_bytes_estimate,
        } => {
            state
                .jobs
                .update(job_id, |job| {
                    if job.status == JobStatus::Downloading {
                        job.progress = percent_complete(
                            downloaded_bytes,
                            total_bytes,
                            total_bytes_estimate,
                            job.progress,
                        );
                    }
                })
                .await;
        }
        ProgressEvent::Finished => {
            state
                .jobs
                .update(job_id, |job| {
                    if !job.status.is_terminal() {
                        job.progress = 100;
                        job.status = JobStatus::Processing;
                    }
                })
                .await;
        }
    }
}

/// Periodic sweep that reclaims completed artifacts once their retention
/// lapses. Job records stay around so late pollers still see a real status.
pub fn spawn_cleanup_worker(state: AppState) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            if let Err(err) = sweep_expired(&state).await {
                warn!("Cleanup worker error: {err:#}");
            }
        }
    });
}

async fn sweep_expired(state: &AppState) -> Result<()> {
    let expired = state.jobs.expire_stale(Utc::now()).await;
    for job_id in expired {
        info!(job_id = %job_id, "Expiring download artifact");
        let scratch_dir = media_store::job_scratch_dir(&state.config.download_root, &job_id);
        if let Err(err) = media_store::delete_dir_if_exists(&scratch_dir).await {
            warn!(
                "Failed to delete expired scratch dir {}: {err:#}",
                scratch_dir.display()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        fetcher::{FetchError, MediaFetcher, MediaInfo},
        media::QualityTier,
        store::JobStore,
    };
    use async_trait::async_trait;
    use std::{path::PathBuf, sync::Arc};
    use tokio::sync::Semaphore;

    /// Fetcher double that replays a fixed event script and then either
    /// writes an output file or fails.
    struct ScriptedFetcher {
        events: Vec<ProgressEvent>,
        failure: Option<String>,
    }

    #[async_trait]
    impl MediaFetcher for ScriptedFetcher {
        async fn probe(&self, _url: &str) -> Result<MediaInfo, FetchError> {
            Ok(MediaInfo {
                title: "clip".to_string(),
                duration_seconds: 3723,
            })
        }

        async fn fetch(
            &self,
            request: FetchRequest,
            events: mpsc::Sender<ProgressEvent>,
        ) -> Result<PathBuf, FetchError> {
            for event in &self.events {
                let _ = events.send(*event).await;
            }
            if let Some(message) = &self.failure {
                return Err(FetchError::Extraction(message.clone()));
            }
            let path = request.dest_dir.join("clip.mp4");
            tokio::fs::write(&path, b"media").await?;
            let _ = events.send(ProgressEvent::Finished).await;
            Ok(path)
        }
    }

    /// Fetcher double whose task dies mid-flight, exercising the outer
    /// failure path in `spawn_download`.
    struct DyingFetcher;

    #[async_trait]
    impl MediaFetcher for DyingFetcher {
        async fn probe(&self, _url: &str) -> Result<MediaInfo, FetchError> {
            Ok(MediaInfo {
                title: "clip".to_string(),
                duration_seconds: 3723,
            })
        }

        async fn fetch(
            &self,
            _request: FetchRequest,
            _events: mpsc::Sender<ProgressEvent>,
        ) -> Result<PathBuf, FetchError> {
            panic!("fetch task died");
        }
    }

    fn test_state(download_root: PathBuf, fetcher: impl MediaFetcher + 'static) -> AppState {
        AppState {
            config: Config {
                bind_addr: "127.0.0.1:0".parse().unwrap(),
                download_root,
                retention_seconds: 3600,
                max_active_downloads: 2,
                ytdlp_bin: PathBuf::from("yt-dlp"),
            },
            jobs: JobStore::new(),
            fetcher: Arc::new(fetcher),
            download_permits: Arc::new(Semaphore::new(2)),
        }
    }

    fn spec() -> DownloadSpec {
        DownloadSpec {
            url: "https://videos.example/watch?v=abc123def45".to_string(),
            quality: QualityTier::P360,
            start_seconds: 0,
            end_seconds: None,
        }
    }

    #[tokio::test]
    async fn successful_run_reaches_complete_with_output() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(
            root.path().to_path_buf(),
            ScriptedFetcher {
                events: vec![ProgressEvent::Transferred {
                    downloaded_bytes: 50,
                    total_bytes: Some(100),
                    total_bytes_estimate: None,
                }],
                failure: None,
            },
        );
        state.jobs.create("job-1").await.unwrap();

        run_download(&state, "job-1", spec()).await.unwrap();

        let job = state.jobs.get("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.progress, 100);
        assert!(job.error.is_none());
        assert!(job.expires_at.is_some());
        let output = job.output_path.expect("output path recorded");
        assert!(output.exists());
    }

    #[tokio::test]
    async fn failed_run_records_error_and_no_output() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(
            root.path().to_path_buf(),
            ScriptedFetcher {
                events: vec![],
                failure: Some("unsupported source".to_string()),
            },
        );
        state.jobs.create("job-1").await.unwrap();

        run_download(&state, "job-1", spec()).await.unwrap();

        let job = state.jobs.get("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert!(job.output_path.is_none());
        let message = job.error.expect("error message recorded");
        assert!(message.contains("unsupported source"));
        assert!(!media_store::job_scratch_dir(root.path(), "job-1").exists());
    }

    #[tokio::test]
    async fn progress_events_drive_the_state_machine() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(
            root.path().to_path_buf(),
            ScriptedFetcher {
                events: vec![],
                failure: None,
            },
        );
        state.jobs.create("job-1").await.unwrap();
        state
            .jobs
            .update("job-1", |job| job.status = JobStatus::Downloading)
            .await;

        apply_progress_event(
            &state,
            "job-1",
            ProgressEvent::Transferred {
                downloaded_bytes: 50,
                total_bytes: Some(100),
                total_bytes_estimate: None,
            },
        )
        .await;
        let job = state.jobs.get("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Downloading);
        assert_eq!(job.progress, 50);

        // Unknown total leaves the stored value alone.
        apply_progress_event(
            &state,
            "job-1",
            ProgressEvent::Transferred {
                downloaded_bytes: 999,
                total_bytes: None,
                total_bytes_estimate: None,
            },
        )
        .await;
        assert_eq!(state.jobs.get("job-1").await.unwrap().progress, 50);

        apply_progress_event(&state, "job-1", ProgressEvent::Finished).await;
        let job = state.jobs.get("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 100);

        // Straggler transfer events after the finished marker are inert.
        apply_progress_event(
            &state,
            "job-1",
            ProgressEvent::Transferred {
                downloaded_bytes: 10,
                total_bytes: Some(100),
                total_bytes_estimate: None,
            },
        )
        .await;
        let job = state.jobs.get("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 100);
    }

    #[tokio::test]
    async fn dead_worker_records_error_and_reclaims_scratch_dir() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(root.path().to_path_buf(), DyingFetcher);
        state.jobs.create("job-1").await.unwrap();

        spawn_download(state.clone(), "job-1".to_string(), spec());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = state.jobs.get("job-1").await.unwrap();
            if job.status == JobStatus::Error {
                assert!(job.error.is_some());
                assert!(job.output_path.is_none());
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "worker never failed the job"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!media_store::job_scratch_dir(root.path(), "job-1").exists());
    }

    #[tokio::test]
    async fn sweep_expires_lapsed_jobs_and_reclaims_disk() {
        let root = tempfile::tempdir().unwrap();
        let state = test_state(
            root.path().to_path_buf(),
            ScriptedFetcher {
                events: vec![],
                failure: None,
            },
        );
        state.jobs.create("job-1").await.unwrap();
        let scratch_dir = media_store::job_scratch_dir(root.path(), "job-1");
        media_store::create_scratch_dir(&scratch_dir).await.unwrap();
        let output = scratch_dir.join("clip.mp4");
        tokio::fs::write(&output, b"media").await.unwrap();
        state
            .jobs
            .update("job-1", |job| {
                job.status = JobStatus::Complete;
                job.progress = 100;
                job.output_path = Some(output.clone());
                job.expires_at = Some(Utc::now() - ChronoDuration::seconds(1));
            })
            .await;

        sweep_expired(&state).await.unwrap();

        let job = state.jobs.get("job-1").await.unwrap();
        assert_eq!(job.status, JobStatus::Expired);
        assert!(job.output_path.is_none());
        assert!(!scratch_dir.exists());
    }
}
