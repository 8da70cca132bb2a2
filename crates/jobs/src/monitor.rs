//! Background progress sweep over downloading jobs.
//!
//! The pipeline task already polls its own batch; this monitor is the
//! safety net that keeps stored snapshots and subscribers fresh even if a
//! pipeline task stalls on a slow daemon call, and it is the only poller
//! for jobs restored into DOWNLOADING by an operator fixing up state.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use clipforge_core::status::JobStatus;
use clipforge_core::types::JobId;

use crate::context::JobContext;
use crate::error::JobError;

pub struct ProgressMonitor {
    ctx: Arc<JobContext>,
    interval: Duration,
}

impl ProgressMonitor {
    pub fn new(ctx: Arc<JobContext>, interval: Duration) -> Self {
        Self { ctx, interval }
    }

    /// Sweep until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Progress monitor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Progress monitor stopping");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep().await;
                }
            }
        }
    }

    /// Refresh every downloading job. One job's failure never stops the
    /// sweep for the others.
    pub async fn sweep(&self) {
        let downloading = self.ctx.registry.by_status(JobStatus::Downloading).await;

        for job in downloading {
            if let Err(err) = self.refresh_job(job.id, job.batch_id.as_deref()).await {
                tracing::warn!(job_id = %job.id, error = %err, "Progress refresh failed");
            }
        }
    }

    async fn refresh_job(&self, id: JobId, batch_id: Option<&str>) -> Result<(), JobError> {
        let Some(batch_id) = batch_id else {
            return Ok(());
        };
        let Some(progress) = self.ctx.downloads.batch_progress(batch_id).await? else {
            return Ok(());
        };

        let updated = self
            .ctx
            .registry
            .update(id, |job| {
                // The job may have finished between the list and now.
                if job.status == JobStatus::Downloading {
                    job.progress = Some(progress.clone());
                    job.touch();
                }
            })
            .await;
        let Some(job) = updated else {
            return Ok(());
        };
        if job.status != JobStatus::Downloading {
            return Ok(());
        }

        self.ctx.store.save(&job).await?;
        self.ctx.notify_progress(id, &progress).await;
        Ok(())
    }
}
