//! Shared dependencies handed to the orchestrator and monitor.

use std::sync::Arc;

use serde_json::json;

use clipforge_core::job_events::EVENT_JOB_PROGRESS;
use clipforge_core::progress::BatchProgress;
use clipforge_core::types::JobId;
use clipforge_events::NotificationSink;

use crate::assembly::AssemblyService;
use crate::registry::{JobRegistry, SubscriberRegistry};
use crate::service::DownloadService;
use crate::store::JobStore;

/// Everything job machinery needs, bundled for cheap cloning via `Arc`.
pub struct JobContext {
    pub registry: Arc<JobRegistry>,
    pub subscribers: Arc<SubscriberRegistry>,
    pub downloads: Arc<dyn DownloadService>,
    pub store: Arc<dyn JobStore>,
    pub assembly: Arc<dyn AssemblyService>,
    pub sink: Arc<dyn NotificationSink>,
}

impl JobContext {
    /// Publish a progress event for a job, but only when someone is
    /// actually subscribed to it. Status events always go out; progress
    /// ticks are frequent enough to be worth gating.
    pub async fn notify_progress(&self, job_id: JobId, progress: &BatchProgress) {
        let subscribers = self.subscribers.subscribers_of(job_id).await;
        if subscribers.is_empty() {
            return;
        }

        let progress_value = match serde_json::to_value(progress) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "Failed to serialize progress");
                return;
            }
        };

        self.sink
            .push(
                job_id,
                EVENT_JOB_PROGRESS,
                json!({
                    "subscribers": subscribers,
                    "progress": progress_value,
                }),
            )
            .await;
    }
}
