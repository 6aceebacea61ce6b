mod api;
mod config;
mod fetcher;
mod media;
mod media_store;
mod models;
mod store;
mod worker;
mod ytdlp;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use config::Config;
use fetcher::MediaFetcher;
use store::JobStore;
use tokio::sync::Semaphore;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub jobs: JobStore,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub download_permits: Arc<Semaphore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipfetch_api=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    media_store::ensure_download_root(&config.download_root).await?;

    let state = AppState {
        jobs: JobStore::new(),
        fetcher: Arc::new(ytdlp::YtDlpFetcher::new(config.ytdlp_bin.clone())),
        download_permits: Arc::new(Semaphore::new(config.max_active_downloads)),
        config: config.clone(),
    };

    worker::spawn_cleanup_worker(state.clone());

    let app = Router::new()
        .route("/healthz", get(api::healthz))
        .route("/v1/downloads", post(api::create_download))
        .route("/v1/downloads/{job_id}", get(api::get_download))
        .route("/v1/downloads/{job_id}/file", get(api::download_file))
        .route("/v1/videos/info", get(api::video_info))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("clipfetch-api listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
