//! Job persistence boundary.
//!
//! The store is called on every job mutation and once at startup, so the
//! registry can be rebuilt after a restart. The default implementation
//! keeps one JSON file per job; swapping in a database-backed store only
//! requires implementing [`JobStore`].

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

use clipforge_core::types::JobId;

use crate::job::Job;

/// Errors from job persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job store I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Job store serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Persistence boundary for jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save(&self, job: &Job) -> Result<(), StoreError>;
    async fn load_all(&self) -> Result<Vec<Job>, StoreError>;
    async fn delete(&self, id: JobId) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// JsonFileStore
// ---------------------------------------------------------------------------

/// One pretty-printed JSON file per job under a directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn job_file(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

#[async_trait]
impl JobStore for JsonFileStore {
    /// Write-then-rename so a crash mid-save never leaves a truncated
    /// job file behind; the record either has its old content or its new
    /// content. Temp names are unique per call because concurrent saves
    /// of the same job may overlap.
    async fn save(&self, job: &Job) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let text = serde_json::to_string_pretty(job)?;
        let tmp = self.dir.join(format!("{}-{}.tmp", job.id, Uuid::new_v4()));
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, self.job_file(job.id)).await?;
        Ok(())
    }

    /// Load every parseable job file; corrupt files are logged and
    /// skipped so one bad record cannot wedge startup.
    async fn load_all(&self) -> Result<Vec<Job>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut jobs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<Job>(&text) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable job file");
                }
            }
        }
        Ok(jobs)
    }

    async fn delete(&self, id: JobId) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.job_file(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
