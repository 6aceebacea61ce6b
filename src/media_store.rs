use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

pub async fn ensure_download_root(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create download root at {}", path.display()))
}

/// Each job gets a private scratch directory keyed by its id; the output
/// file lands inside it and the expiry sweep removes the whole directory.
pub fn job_scratch_dir(download_root: &Path, job_id: &str) -> PathBuf {
    download_root.join(job_id)
}

pub async fn create_scratch_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create scratch directory {}", path.display()))
}

pub async fn delete_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("Failed to delete {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delete_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let dir = job_scratch_dir(root.path(), "job-1");
        create_scratch_dir(&dir).await.unwrap();
        tokio::fs::write(dir.join("clip.mp4"), b"media").await.unwrap();

        delete_dir_if_exists(&dir).await.unwrap();
        assert!(!dir.exists());
        delete_dir_if_exists(&dir).await.unwrap();
    }
}
