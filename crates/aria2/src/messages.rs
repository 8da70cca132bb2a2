//! aria2 wire message structs.
//!
//! aria2 serializes every numeric field as a JSON string (`"1024"`, not
//! `1024`). The structs here mirror that wire shape exactly and convert
//! into the crate-level domain types (`TransferSnapshot`,
//! [`GlobalStats`]) in one place, so nothing downstream deals with
//! string-typed numbers.

use clipforge_core::progress::TransferSnapshot;
use clipforge_core::status::TransferStatus;
use serde::Deserialize;

/// Status keys requested from `aria2.tellStatus`.
///
/// Narrowing the key set keeps responses small for large torrent-style
/// transfers with many files.
pub const TELL_STATUS_KEYS: &[&str] = &[
    "gid",
    "status",
    "totalLength",
    "completedLength",
    "downloadSpeed",
    "errorCode",
    "errorMessage",
    "files",
];

/// Parse one of aria2's string-encoded numbers, defaulting to zero.
fn parse_u64(value: Option<&str>) -> u64 {
    value.and_then(|s| s.parse().ok()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// tellStatus
// ---------------------------------------------------------------------------

/// Wire shape of an `aria2.tellStatus` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TellStatusResponse {
    pub gid: String,
    pub status: String,
    #[serde(default)]
    pub total_length: Option<String>,
    #[serde(default)]
    pub completed_length: Option<String>,
    #[serde(default)]
    pub download_speed: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// One entry of the `files` array in a status response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    #[serde(default)]
    pub path: String,
}

impl TellStatusResponse {
    /// Convert the wire representation into a domain snapshot.
    pub fn into_snapshot(self) -> TransferSnapshot {
        let file_path = self
            .files
            .into_iter()
            .map(|f| f.path)
            .find(|p| !p.is_empty());

        TransferSnapshot {
            gid: self.gid,
            status: TransferStatus::from_wire(&self.status),
            total_length: parse_u64(self.total_length.as_deref()),
            completed_length: parse_u64(self.completed_length.as_deref()),
            download_speed: parse_u64(self.download_speed.as_deref()),
            error_code: self.error_code,
            error_message: self.error_message,
            file_path,
        }
    }
}

// ---------------------------------------------------------------------------
// getGlobalStat
// ---------------------------------------------------------------------------

/// Wire shape of an `aria2.getGlobalStat` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStatResponse {
    #[serde(default)]
    pub download_speed: Option<String>,
    #[serde(default)]
    pub num_active: Option<String>,
    #[serde(default)]
    pub num_waiting: Option<String>,
    #[serde(default)]
    pub num_stopped: Option<String>,
}

/// Daemon-wide transfer statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalStats {
    /// Aggregate download speed in bytes/sec.
    pub download_speed: u64,
    /// Transfers currently downloading.
    pub num_active: u64,
    /// Transfers queued behind the concurrency limit.
    pub num_waiting: u64,
    /// Transfers in a terminal state still known to the daemon.
    pub num_stopped: u64,
}

impl GlobalStatResponse {
    pub fn into_stats(self) -> GlobalStats {
        GlobalStats {
            download_speed: parse_u64(self.download_speed.as_deref()),
            num_active: parse_u64(self.num_active.as_deref()),
            num_waiting: parse_u64(self.num_waiting.as_deref()),
            num_stopped: parse_u64(self.num_stopped.as_deref()),
        }
    }
}

// ---------------------------------------------------------------------------
// getVersion
// ---------------------------------------------------------------------------

/// Wire shape of an `aria2.getVersion` response (the liveness probe).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    pub version: String,
    #[serde(default)]
    pub enabled_features: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
