//! Notification sink abstraction over the event bus.
//!
//! The orchestrator and progress monitor push job updates through a
//! [`NotificationSink`] rather than talking to the bus directly, so
//! deployments can swap in external transports (WebSocket broadcast,
//! webhooks) without touching the pipeline. Delivery is best-effort:
//! a sink handles its own failures and never propagates them into the
//! job pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use clipforge_core::types::JobId;
use serde_json::Value;

use crate::bus::{EventBus, JobEvent};

/// Receives job lifecycle notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Push one event for a job. Must not fail the caller; sinks log and
    /// swallow their own delivery errors.
    async fn push(&self, job_id: JobId, event_type: &str, payload: Value);
}

// ---------------------------------------------------------------------------
// BusSink
// ---------------------------------------------------------------------------

/// Default sink: publishes every notification onto the in-process [`EventBus`].
pub struct BusSink {
    bus: Arc<EventBus>,
}

impl BusSink {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl NotificationSink for BusSink {
    async fn push(&self, job_id: JobId, event_type: &str, payload: Value) {
        tracing::debug!(job_id = %job_id, event_type, "Publishing job event");
        self.bus
            .publish(JobEvent::new(event_type).with_job(job_id).with_payload(payload));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
