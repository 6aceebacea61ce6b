use std::{env, net::SocketAddr, path::PathBuf};

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub download_root: PathBuf,
    pub retention_seconds: u64,
    pub max_active_downloads: usize,
    pub ytdlp_bin: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_raw =
            env::var("CLIPFETCH_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_addr = bind_raw
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .parse::<SocketAddr>()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)));

        let download_root = PathBuf::from(
            env::var("CLIPFETCH_DOWNLOAD_ROOT").unwrap_or_else(|_| "/data/downloads".to_string()),
        );

        let retention_seconds = env::var("CLIPFETCH_RETENTION_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(24 * 60 * 60);

        let max_active_downloads = env::var("CLIPFETCH_MAX_ACTIVE_DOWNLOADS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(4);

        let ytdlp_bin =
            PathBuf::from(env::var("CLIPFETCH_YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

        Ok(Self {
            bind_addr,
            download_root,
            retention_seconds,
            max_active_downloads,
            ytdlp_bin,
        })
    }
}
