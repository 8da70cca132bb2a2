//! Job lifecycle orchestration.
//!
//! `JobOrchestrator` owns the job state machine: PENDING → DOWNLOADING →
//! PROCESSING → COMPLETED, with FAILED and CANCELLED as terminal exits
//! reachable from PENDING/DOWNLOADING. Each created job runs its pipeline
//! on a spawned task; any error fails the job instead of tearing down the
//! process.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use clipforge_aria2::client::SubmitItem;
use clipforge_core::job_events::{
    EVENT_JOB_CANCELLED, EVENT_JOB_COMPLETED, EVENT_JOB_FAILED, EVENT_JOB_STATUS,
};
use clipforge_core::media;
use clipforge_core::naming;
use clipforge_core::status::{JobStatus, TransferStatus};
use clipforge_core::types::JobId;

use crate::config::{OrchestratorConfig, PartialFailurePolicy};
use crate::context::JobContext;
use crate::error::JobError;
use crate::job::Job;

/// Cheap-to-clone handle; clones share the same context and registries.
#[derive(Clone)]
pub struct JobOrchestrator {
    config: OrchestratorConfig,
    ctx: Arc<JobContext>,
}

impl JobOrchestrator {
    pub fn new(config: OrchestratorConfig, ctx: Arc<JobContext>) -> Self {
        Self { config, ctx }
    }

    // -----------------------------------------------------------------------
    // Public surface
    // -----------------------------------------------------------------------

    /// Register a new job and kick off its pipeline in the background.
    pub async fn create_job(&self, params: Value) -> Result<JobId, JobError> {
        let job = Job::new(params);
        let id = job.id;

        self.ctx.store.save(&job).await?;
        self.ctx.registry.insert(job.clone()).await;
        tracing::info!(job_id = %id, "Job created");
        self.notify_status(&job).await;

        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Err(err) = orchestrator.run_pipeline(id).await {
                orchestrator.fail_job(id, &err.to_string()).await;
            }
        });

        Ok(id)
    }

    pub async fn get_job(&self, id: JobId) -> Option<Job> {
        self.ctx.registry.get(id).await
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Vec<Job> {
        self.ctx.registry.list(status, limit, offset).await
    }

    /// Cancel a job that has not started assembly. Returns `false` for a
    /// missing job or one already past DOWNLOADING.
    pub async fn cancel_job(&self, id: JobId) -> bool {
        let Some(job) = self.ctx.registry.get(id).await else {
            return false;
        };
        if !job.status.can_cancel() {
            return false;
        }

        // Re-check under the write lock so a racing transition wins cleanly.
        let mut did_cancel = false;
        let updated = self
            .ctx
            .registry
            .update(id, |job| {
                if job.status.can_cancel() {
                    job.transition(JobStatus::Cancelled);
                    did_cancel = true;
                }
            })
            .await;
        let Some(job) = updated else {
            return false;
        };
        if !did_cancel {
            return false;
        }

        if let Some(batch_id) = job.batch_id.as_deref() {
            let cancelled = self.ctx.downloads.cancel_batch(batch_id).await;
            tracing::debug!(job_id = %id, cancelled, "Cancelled outstanding transfers");
        }

        if let Err(err) = self.ctx.store.save(&job).await {
            tracing::warn!(job_id = %id, error = %err, "Failed to persist cancelled job");
        }
        tracing::info!(job_id = %id, "Job cancelled");
        self.notify_status(&job).await;
        true
    }

    /// Remove a finished job from the registry and the store. Active jobs
    /// must be cancelled first.
    pub async fn delete_job(&self, id: JobId) -> Result<bool, JobError> {
        let Some(job) = self.ctx.registry.get(id).await else {
            return Ok(false);
        };
        if !job.status.is_terminal() {
            return Err(JobError::StillActive { id });
        }

        self.ctx.registry.remove(id).await;
        self.ctx.subscribers.clear_job(id).await;
        self.ctx.store.delete(id).await?;
        tracing::info!(job_id = %id, "Job deleted");
        Ok(true)
    }

    pub async fn subscribe(&self, id: JobId, client: &str) -> Result<(), JobError> {
        if self.ctx.registry.get(id).await.is_none() {
            return Err(JobError::NotFound(id));
        }
        self.ctx.subscribers.subscribe(id, client).await;
        Ok(())
    }

    pub async fn unsubscribe(&self, id: JobId, client: &str) {
        self.ctx.subscribers.unsubscribe(id, client).await;
    }

    /// Seed the registry from the store at startup. Jobs that were still
    /// PENDING or DOWNLOADING are marked failed: the daemon-side batch
    /// state they depended on did not survive the restart.
    pub async fn restore(&self) -> Result<usize, JobError> {
        let jobs = self.ctx.store.load_all().await?;
        let total = jobs.len();
        let mut interrupted = 0;

        for mut job in jobs {
            if matches!(job.status, JobStatus::Pending | JobStatus::Downloading) {
                job.error = Some("interrupted by restart".to_string());
                job.transition(JobStatus::Failed);
                interrupted += 1;
                if let Err(err) = self.ctx.store.save(&job).await {
                    tracing::warn!(job_id = %job.id, error = %err, "Failed to persist interrupted job");
                }
            }
            self.ctx.registry.insert(job).await;
        }

        tracing::info!(total, interrupted, "Restored jobs from store");
        Ok(total)
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    async fn run_pipeline(&self, id: JobId) -> Result<(), JobError> {
        let job = self
            .ctx
            .registry
            .get(id)
            .await
            .ok_or(JobError::NotFound(id))?;

        let refs = media::extract_remote_refs(&job.params);
        if refs.is_empty() {
            tracing::info!(job_id = %id, "No remote references; assembling directly");
            return self.assemble(id).await;
        }

        for url in &refs {
            media::validate_remote_url(url)?;
        }
        let items = self.plan_downloads(&refs);

        self.ctx.downloads.ensure_running().await?;

        let batch_id = id.to_string();
        let accepted = self.ctx.downloads.submit_batch(&items, &batch_id).await?;
        tracing::info!(job_id = %id, accepted, total = items.len(), "Submitted download batch");

        // An empty batch never reports completion, so polling it would
        // hang the job. Fail it before entering the download phase.
        if accepted == 0 {
            return Err(JobError::BatchFailed {
                batch_id,
                failed: refs.len(),
                total: refs.len(),
                failed_urls: refs,
            });
        }

        let job = self
            .update_job(id, |job| {
                job.batch_id = Some(batch_id.clone());
                job.transition(JobStatus::Downloading);
            })
            .await?;
        self.notify_status(&job).await;

        self.poll_batch(id, &batch_id).await?;

        // Poll loop exits either on completion or because the job left
        // DOWNLOADING (cancelled). Only the former continues the pipeline.
        let Some(job) = self.ctx.registry.get(id).await else {
            return Err(JobError::NotFound(id));
        };
        if job.status != JobStatus::Downloading {
            tracing::info!(job_id = %id, status = job.status.as_str(), "Pipeline stopped early");
            return Ok(());
        }

        self.resolve_batch(id, &batch_id, &refs).await?;
        self.assemble(id).await
    }

    /// Derive a destination under the download dir for every reference,
    /// keeping names unique within the batch.
    fn plan_downloads(&self, refs: &[String]) -> Vec<SubmitItem> {
        let mut taken: HashSet<String> = HashSet::new();
        refs.iter()
            .map(|url| {
                let stem = Uuid::new_v4().to_string();
                let mut name = naming::derive_filename(url, &stem);
                if !taken.insert(name.clone()) {
                    name = format!("{}.{}", Uuid::new_v4(), naming::guess_extension(url));
                    taken.insert(name.clone());
                }
                SubmitItem {
                    url: url.clone(),
                    dest: self.config.download_dir.join(&name),
                }
            })
            .collect()
    }

    /// Poll batch progress until it completes or the job leaves
    /// DOWNLOADING. Errored transfers are restarted (within their cap)
    /// before each progress read so a batch with restart budget left is
    /// never considered settled.
    async fn poll_batch(&self, id: JobId, batch_id: &str) -> Result<(), JobError> {
        loop {
            tokio::time::sleep(self.config.poll_interval()).await;

            let Some(job) = self.ctx.registry.get(id).await else {
                return Err(JobError::NotFound(id));
            };
            if job.status != JobStatus::Downloading {
                return Ok(());
            }

            let restarted = self.ctx.downloads.restart_errored(batch_id).await;
            if restarted > 0 {
                tracing::info!(job_id = %id, restarted, "Restarted errored transfers");
            }

            let Some(progress) = self.ctx.downloads.batch_progress(batch_id).await? else {
                return Err(JobError::BatchMissing(batch_id.to_string()));
            };

            let updated = self
                .ctx
                .registry
                .update(id, |job| {
                    // The job may have been cancelled since the status
                    // check above; leave it untouched if so.
                    if job.status == JobStatus::Downloading {
                        job.progress = Some(progress.clone());
                        job.touch();
                    }
                })
                .await;
            match updated {
                Some(job) if job.status == JobStatus::Downloading => {
                    if let Err(err) = self.ctx.store.save(&job).await {
                        tracing::warn!(job_id = %id, error = %err, "Failed to persist progress");
                    }
                    self.ctx.notify_progress(id, &progress).await;
                }
                _ => continue,
            }

            if progress.is_complete {
                return Ok(());
            }
        }
    }

    /// Map completed downloads back onto the job parameters and decide
    /// what to do about references that never made it.
    async fn resolve_batch(
        &self,
        id: JobId,
        batch_id: &str,
        refs: &[String],
    ) -> Result<(), JobError> {
        let Some(outcomes) = self.ctx.downloads.batch_outcomes(batch_id).await? else {
            return Err(JobError::BatchMissing(batch_id.to_string()));
        };

        let mut mapping: HashMap<String, String> = HashMap::new();
        for outcome in &outcomes {
            if outcome.status == TransferStatus::Complete && outcome.dest_path.exists() {
                mapping.insert(
                    outcome.source_url.clone(),
                    outcome.dest_path.to_string_lossy().into_owned(),
                );
            }
        }

        let failed_urls: Vec<String> = refs
            .iter()
            .filter(|url| !mapping.contains_key(*url))
            .cloned()
            .collect();
        if !failed_urls.is_empty() {
            match self.config.partial_failure {
                PartialFailurePolicy::Abort => {
                    return Err(JobError::BatchFailed {
                        batch_id: batch_id.to_string(),
                        failed: failed_urls.len(),
                        total: refs.len(),
                        failed_urls,
                    });
                }
                PartialFailurePolicy::Proceed => {
                    tracing::warn!(
                        job_id = %id,
                        failed = failed_urls.len(),
                        total = refs.len(),
                        "Proceeding to assembly with unresolved references"
                    );
                }
            }
        }

        let mut rewritten = 0;
        self.update_job(id, |job| {
            rewritten = media::rewrite_refs(&mut job.params, &mapping);
            job.touch();
        })
        .await?;
        tracing::debug!(job_id = %id, rewritten, "Rewrote remote references to local paths");
        Ok(())
    }

    /// Run the assembly step on the blocking pool and finish the job.
    async fn assemble(&self, id: JobId) -> Result<(), JobError> {
        let job = self
            .update_job(id, |job| {
                if matches!(job.status, JobStatus::Pending | JobStatus::Downloading) {
                    job.transition(JobStatus::Processing);
                }
            })
            .await?;
        if job.status != JobStatus::Processing {
            tracing::info!(job_id = %id, status = job.status.as_str(), "Skipping assembly");
            return Ok(());
        }
        self.notify_status(&job).await;

        let assembly = Arc::clone(&self.ctx.assembly);
        let params = job.params.clone();
        let result_path = tokio::task::spawn_blocking(move || assembly.run(id, &params))
            .await
            .map_err(|err| JobError::AssemblyJoin(err.to_string()))??;

        tracing::info!(job_id = %id, result = %result_path.display(), "Job completed");
        let job = self
            .update_job(id, move |job| {
                job.result_path = Some(result_path);
                job.transition(JobStatus::Completed);
            })
            .await?;
        self.notify_status(&job).await;
        Ok(())
    }

    /// Mark a job failed unless it already reached a terminal state.
    async fn fail_job(&self, id: JobId, message: &str) {
        let mut failed_now = false;
        let updated = self
            .ctx
            .registry
            .update(id, |job| {
                if !job.status.is_terminal() {
                    job.error = Some(message.to_string());
                    job.transition(JobStatus::Failed);
                    failed_now = true;
                }
            })
            .await;

        let Some(job) = updated else {
            tracing::warn!(job_id = %id, error = message, "Failed job is no longer registered");
            return;
        };
        if !failed_now {
            return;
        }

        tracing::warn!(job_id = %id, error = message, "Job failed");
        if let Err(err) = self.ctx.store.save(&job).await {
            tracing::warn!(job_id = %id, error = %err, "Failed to persist failed job");
        }
        self.notify_status(&job).await;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Mutate a job, persist the result, return the updated snapshot.
    async fn update_job<F>(&self, id: JobId, f: F) -> Result<Job, JobError>
    where
        F: FnOnce(&mut Job),
    {
        let job = self
            .ctx
            .registry
            .update(id, f)
            .await
            .ok_or(JobError::NotFound(id))?;
        self.ctx.store.save(&job).await?;
        Ok(job)
    }

    /// Push a status event for the job's current state.
    async fn notify_status(&self, job: &Job) {
        let event = match job.status {
            JobStatus::Completed => EVENT_JOB_COMPLETED,
            JobStatus::Failed => EVENT_JOB_FAILED,
            JobStatus::Cancelled => EVENT_JOB_CANCELLED,
            _ => EVENT_JOB_STATUS,
        };
        let mut payload = json!({ "status": job.status.as_str() });
        if let Some(path) = &job.result_path {
            payload["result_path"] = json!(path.to_string_lossy());
        }
        if let Some(error) = &job.error {
            payload["error"] = json!(error);
        }
        self.ctx.sink.push(job.id, event, payload).await;
    }
}
