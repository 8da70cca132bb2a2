//! Download service seam between the orchestrator and the daemon stack.
//!
//! The orchestrator talks to this trait, never to the supervisor or the
//! transfer client directly, so the pipeline can be tested against a
//! scripted implementation with no daemon process involved.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use clipforge_aria2::client::{SubmitItem, TransferClient};
use clipforge_aria2::supervisor::DaemonSupervisor;
use clipforge_core::progress::BatchProgress;
use clipforge_core::status::TransferStatus;
use clipforge_core::types::Gid;

use crate::error::JobError;

// ---------------------------------------------------------------------------
// DownloadService
// ---------------------------------------------------------------------------

/// Terminal view of one transfer, joined with what was submitted.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub gid: Gid,
    pub status: TransferStatus,
    pub source_url: String,
    pub dest_path: PathBuf,
}

/// Everything the job pipeline needs from the download side.
#[async_trait]
pub trait DownloadService: Send + Sync {
    /// Make sure a daemon is up and answering before submitting work.
    async fn ensure_running(&self) -> Result<(), JobError>;

    /// Submit a batch of transfers; returns how many were accepted.
    async fn submit_batch(&self, items: &[SubmitItem], batch_id: &str)
        -> Result<usize, JobError>;

    /// Re-submit errored members of a batch that still have restart
    /// budget; returns how many were restarted.
    async fn restart_errored(&self, batch_id: &str) -> usize;

    /// Aggregate progress for a batch; `None` if the batch is unknown.
    async fn batch_progress(&self, batch_id: &str) -> Result<Option<BatchProgress>, JobError>;

    /// Per-transfer outcomes for a batch; `None` if the batch is
    /// unknown. Members the daemon no longer knows are omitted.
    async fn batch_outcomes(&self, batch_id: &str)
        -> Result<Option<Vec<TransferOutcome>>, JobError>;

    /// Cancel all members of a batch; returns how many were cancelled.
    async fn cancel_batch(&self, batch_id: &str) -> usize;
}

// ---------------------------------------------------------------------------
// Aria2DownloadService
// ---------------------------------------------------------------------------

/// Production implementation backed by the supervisor and RPC client.
pub struct Aria2DownloadService {
    supervisor: Arc<DaemonSupervisor>,
    client: TransferClient,
}

impl Aria2DownloadService {
    pub fn new(supervisor: Arc<DaemonSupervisor>, client: TransferClient) -> Self {
        Self { supervisor, client }
    }
}

#[async_trait]
impl DownloadService for Aria2DownloadService {
    async fn ensure_running(&self) -> Result<(), JobError> {
        let outcome = self.supervisor.start().await?;
        tracing::debug!(pid = outcome.pid(), "Daemon ready for submissions");
        Ok(())
    }

    async fn submit_batch(
        &self,
        items: &[SubmitItem],
        batch_id: &str,
    ) -> Result<usize, JobError> {
        Ok(self.client.submit_batch(items, batch_id).await)
    }

    async fn restart_errored(&self, batch_id: &str) -> usize {
        self.client.restart_errored_in_batch(batch_id).await
    }

    async fn batch_progress(&self, batch_id: &str) -> Result<Option<BatchProgress>, JobError> {
        Ok(self.client.query_batch_progress(batch_id).await?)
    }

    async fn batch_outcomes(
        &self,
        batch_id: &str,
    ) -> Result<Option<Vec<TransferOutcome>>, JobError> {
        let Some(gids) = self.client.batch_members(batch_id).await else {
            return Ok(None);
        };

        let mut outcomes = Vec::with_capacity(gids.len());
        for gid in gids {
            let Some(snapshot) = self.client.query_progress(&gid).await? else {
                continue;
            };
            let Some(submission) = self.client.submission(&gid).await else {
                continue;
            };
            outcomes.push(TransferOutcome {
                gid,
                status: snapshot.status,
                source_url: submission.source_url,
                dest_path: submission.dest_path,
            });
        }
        Ok(Some(outcomes))
    }

    async fn cancel_batch(&self, batch_id: &str) -> usize {
        self.client.cancel_batch(batch_id).await
    }
}
