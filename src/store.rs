use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{Job, JobStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("download id already exists: {0}")]
    DuplicateId(String),
}

/// Concurrency-safe job table. One worker writes to a given record during
/// its lifetime while pollers read concurrently; every mutation goes through
/// a single write guard so transitions are atomic per id.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh record and return its snapshot so callers can echo the
    /// stored timestamps instead of minting their own.
    pub async fn create(&self, id: &str) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(id) {
            return Err(StoreError::DuplicateId(id.to_string()));
        }
        let job = Job::new(id);
        jobs.insert(id.to_string(), job.clone());
        Ok(job)
    }

    /// Snapshot of the current state; absent ids are `None`, never an error.
    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Apply a transition under the write lock. Returns false when the id
    /// does not exist.
    pub async fn update<F>(&self, id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(id) {
            Some(job) => {
                mutate(job);
                job.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Flip completed jobs whose artifact retention has lapsed to `expired`
    /// and return their ids so the sweep can reclaim the files on disk.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut expired = Vec::new();
        let mut jobs = self.jobs.write().await;
        for job in jobs.values_mut() {
            if job.status != JobStatus::Complete {
                continue;
            }
            let Some(expires_at) = job.expires_at else {
                continue;
            };
            if expires_at <= now {
                job.status = JobStatus::Expired;
                job.output_path = None;
                job.expires_at = None;
                job.updated_at = now;
                expired.push(job.id.clone());
            }
        }
        expired
    }
}
