//! Event type constants for job lifecycle events.
//!
//! The job pipeline publishes these through its notification sink;
//! consumers match on the strings to route updates.

/// Job moved to a new lifecycle status.
pub const EVENT_JOB_STATUS: &str = "job_status";

/// Progress update while a job's downloads are running.
pub const EVENT_JOB_PROGRESS: &str = "job_progress";

/// Job completed successfully.
pub const EVENT_JOB_COMPLETED: &str = "job_completed";

/// Job failed with an error.
pub const EVENT_JOB_FAILED: &str = "job_failed";

/// Job was cancelled (by user or system).
pub const EVENT_JOB_CANCELLED: &str = "job_cancelled";
