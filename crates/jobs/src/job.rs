//! The job model persisted across restarts.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use clipforge_core::progress::BatchProgress;
use clipforge_core::status::JobStatus;
use clipforge_core::types::JobId;

/// One submitted assembly job and everything captured about its run.
///
/// `params` is opaque to the orchestrator except for remote references,
/// which are rewritten in place to local paths once their downloads
/// complete. The stored copy always reflects the latest rewrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Transfer batch backing the download phase, once submitted.
    pub batch_id: Option<String>,
    /// Assembly parameters as submitted, references rewritten in place.
    pub params: Value,
    /// Latest batch progress snapshot while downloading.
    pub progress: Option<BatchProgress>,
    /// Where the assembled result landed, once completed.
    pub result_path: Option<PathBuf>,
    /// Failure detail for FAILED jobs.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A fresh PENDING job with a new id.
    pub fn new(params: Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new_v4(),
            status: JobStatus::Pending,
            batch_id: None,
            params,
            progress: None,
            result_path: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Move to `status`, stamping `updated_at` and, for terminal states,
    /// `completed_at`.
    pub fn transition(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
        if status.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
    }

    /// Bump `updated_at` after a non-status mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
