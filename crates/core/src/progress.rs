//! Batch progress aggregation.
//!
//! A batch's progress is never stored — it is recomputed on demand from the
//! per-transfer snapshots the daemon reports. The aggregation is a pure
//! function so every caller (orchestrator poll loop, monitor loop, API
//! consumers) derives identical numbers from the same snapshots.

use serde::{Deserialize, Serialize};

use crate::status::TransferStatus;
use crate::types::Gid;

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// Point-in-time view of one transfer, as reported by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSnapshot {
    pub gid: Gid,
    pub status: TransferStatus,
    /// Total length in bytes; `0` while the daemon has not resolved it yet.
    pub total_length: u64,
    pub completed_length: u64,
    /// Instantaneous download speed in bytes per second.
    pub download_speed: u64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// Resolved local file path, once the daemon has assigned one.
    pub file_path: Option<String>,
}

impl TransferSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Aggregate progress over one batch of transfers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total_files: usize,
    pub completed_files: usize,
    pub failed_files: usize,
    /// Waiting, active, or paused — anything that can still move.
    pub active_files: usize,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    /// Sum of instantaneous per-transfer speeds, bytes per second.
    pub speed_bps: u64,
    /// 0.0–100.0.
    pub percent: f64,
    pub eta_seconds: Option<u64>,
    /// True iff the batch is non-empty and every member is terminal.
    pub is_complete: bool,
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Compute batch-level totals from a batch's transfer snapshots.
///
/// An empty batch is never complete: a batch whose submissions all failed
/// must not be mistaken for a finished one.
pub fn aggregate(transfers: &[TransferSnapshot]) -> BatchProgress {
    let mut completed_files = 0usize;
    let mut failed_files = 0usize;
    let mut active_files = 0usize;
    let mut total_bytes = 0u64;
    let mut downloaded_bytes = 0u64;
    let mut speed_bps = 0u64;

    for t in transfers {
        total_bytes += t.total_length;
        downloaded_bytes += t.completed_length;
        speed_bps += t.download_speed;

        match t.status {
            TransferStatus::Complete => completed_files += 1,
            TransferStatus::Error => failed_files += 1,
            TransferStatus::Removed => {}
            TransferStatus::Waiting | TransferStatus::Active | TransferStatus::Paused => {
                active_files += 1
            }
        }
    }

    let is_complete = !transfers.is_empty() && transfers.iter().all(TransferSnapshot::is_terminal);

    BatchProgress {
        total_files: transfers.len(),
        completed_files,
        failed_files,
        active_files,
        total_bytes,
        downloaded_bytes,
        speed_bps,
        percent: batch_percent(downloaded_bytes, total_bytes, is_complete),
        eta_seconds: eta_seconds(total_bytes, downloaded_bytes, speed_bps),
        is_complete,
    }
}

/// Percentage of bytes downloaded, capped at 100.
///
/// When the daemon has not resolved any sizes yet (`total == 0`), a finished
/// batch reports 100 and an unfinished one 0 rather than dividing by zero.
fn batch_percent(downloaded: u64, total: u64, is_complete: bool) -> f64 {
    if total > 0 {
        ((downloaded as f64 / total as f64) * 100.0).min(100.0)
    } else if is_complete {
        100.0
    } else {
        0.0
    }
}

/// Estimated seconds until all remaining bytes arrive at the current speed.
///
/// `None` when the speed is zero or the remaining size is unknown.
pub fn eta_seconds(total: u64, downloaded: u64, speed_bps: u64) -> Option<u64> {
    if speed_bps > 0 && total > downloaded {
        Some((total - downloaded) / speed_bps)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
