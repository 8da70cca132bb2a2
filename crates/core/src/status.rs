//! Job and transfer lifecycle enums.
//!
//! `JobStatus` is the orchestrator-side state machine; `TransferStatus`
//! mirrors the states the download daemon reports for a single transfer.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a submitted job.
///
/// `Pending → Downloading → Processing → Completed`, with `Failed` reachable
/// from any non-terminal state and `Cancelled` reachable only before
/// `Processing` begins (the assembly step is treated as irreversible).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Downloading,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether the job will make no further progress.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether a cancellation request is still honoured in this state.
    pub fn can_cancel(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Downloading)
    }

    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// TransferStatus
// ---------------------------------------------------------------------------

/// Daemon-reported state of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Waiting,
    Active,
    Paused,
    Error,
    Complete,
    /// Removed from the daemon by an explicit cancel; terminal.
    Removed,
}

impl TransferStatus {
    /// Terminal means no further progress without an explicit resubmission.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Error | TransferStatus::Complete | TransferStatus::Removed
        )
    }

    /// Parse the daemon's wire representation.
    ///
    /// Unknown strings map to `Waiting` so that a daemon newer than this
    /// client keeps the transfer in a non-terminal, still-polled state.
    pub fn from_wire(s: &str) -> TransferStatus {
        match s {
            "waiting" => TransferStatus::Waiting,
            "active" => TransferStatus::Active,
            "paused" => TransferStatus::Paused,
            "error" => TransferStatus::Error,
            "complete" => TransferStatus::Complete,
            "removed" => TransferStatus::Removed,
            _ => TransferStatus::Waiting,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- JobStatus -----------------------------------------------------------

    #[test]
    fn terminal_job_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Downloading.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn cancellation_window_closes_at_processing() {
        assert!(JobStatus::Pending.can_cancel());
        assert!(JobStatus::Downloading.can_cancel());
        assert!(!JobStatus::Processing.can_cancel());
        assert!(!JobStatus::Completed.can_cancel());
    }

    #[test]
    fn job_status_serde_is_lowercase() {
        let json = serde_json::to_string(&JobStatus::Downloading).unwrap();
        assert_eq!(json, "\"downloading\"");
        let back: JobStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(back, JobStatus::Failed);
    }

    // -- TransferStatus ------------------------------------------------------

    #[test]
    fn terminal_transfer_statuses() {
        assert!(TransferStatus::Complete.is_terminal());
        assert!(TransferStatus::Error.is_terminal());
        assert!(TransferStatus::Removed.is_terminal());
        assert!(!TransferStatus::Active.is_terminal());
        assert!(!TransferStatus::Waiting.is_terminal());
        assert!(!TransferStatus::Paused.is_terminal());
    }

    #[test]
    fn wire_parse_known_statuses() {
        assert_eq!(TransferStatus::from_wire("active"), TransferStatus::Active);
        assert_eq!(TransferStatus::from_wire("error"), TransferStatus::Error);
        assert_eq!(
            TransferStatus::from_wire("complete"),
            TransferStatus::Complete
        );
    }

    #[test]
    fn wire_parse_unknown_status_stays_nonterminal() {
        let status = TransferStatus::from_wire("verifying");
        assert_eq!(status, TransferStatus::Waiting);
        assert!(!status.is_terminal());
    }
}
