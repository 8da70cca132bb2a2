//! Error type for the job pipeline boundary.

use clipforge_aria2::rpc::RpcError;
use clipforge_aria2::supervisor::SupervisorError;
use clipforge_core::error::CoreError;
use clipforge_core::types::JobId;

use crate::assembly::AssemblyError;
use crate::store::StoreError;

/// Everything a job pipeline step can fail with.
///
/// Pipeline errors never crash the orchestrator: they are recorded on
/// the job (status FAILED, message stored) by the task that hit them.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job {id} is still active and cannot be deleted")]
    StillActive { id: JobId },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Daemon lifecycle failed: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Daemon RPC failed: {0}")]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("Assembly task did not complete: {0}")]
    AssemblyJoin(String),

    #[error("Batch {0} is no longer tracked")]
    BatchMissing(String),

    #[error("{failed} of {total} downloads failed: {}", .failed_urls.join(", "))]
    BatchFailed {
        batch_id: String,
        failed: usize,
        total: usize,
        failed_urls: Vec<String>,
    },
}
