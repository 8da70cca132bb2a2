//! Typed transfer client over the daemon's RPC surface.
//!
//! [`TransferClient`] wraps [`RpcClient`] with per-call retry and two
//! in-memory registries: gid → originating submission (source URL,
//! destination, options, restart counter — everything needed to resubmit
//! a failed transfer) and batch → member gids. The daemon holds the
//! authoritative transfer state; these registries only remember what the
//! daemon cannot tell us back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use clipforge_core::progress::{self, BatchProgress, TransferSnapshot};
use clipforge_core::status::TransferStatus;
use clipforge_core::types::Gid;

use crate::config::Aria2Config;
use crate::messages::{GlobalStatResponse, GlobalStats, TellStatusResponse, TELL_STATUS_KEYS};
use crate::retry::{call_with_retry, RetryPolicy};
use crate::rpc::{RpcClient, RpcError};

/// Prefix marking gids satisfied locally without a daemon transfer.
pub const LOCAL_GID_PREFIX: &str = "local-";

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Bookkeeping for one submitted transfer.
#[derive(Debug, Clone)]
struct TransferRecord {
    source_url: String,
    dest_path: PathBuf,
    options: Value,
    restart_count: u32,
}

/// Member gids of one batch, in submission order.
#[derive(Debug, Clone)]
struct BatchRecord {
    gids: Vec<Gid>,
    created_at: DateTime<Utc>,
}

/// One (source, destination) pair for batch submission.
#[derive(Debug, Clone)]
pub struct SubmitItem {
    pub url: String,
    pub dest: PathBuf,
}

/// Originating submission recorded for a gid.
#[derive(Debug, Clone)]
pub struct RecordedSubmission {
    pub source_url: String,
    pub dest_path: PathBuf,
    pub restart_count: u32,
}

// ---------------------------------------------------------------------------
// TransferClient
// ---------------------------------------------------------------------------

/// Client for submitting and tracking transfers on the daemon.
pub struct TransferClient {
    rpc: RpcClient,
    retry: RetryPolicy,
    restart_cap: u32,
    transfers: RwLock<HashMap<Gid, TransferRecord>>,
    batches: RwLock<HashMap<String, BatchRecord>>,
}

impl TransferClient {
    pub fn new(rpc: RpcClient, retry: RetryPolicy, restart_cap: u32) -> Self {
        Self {
            rpc,
            retry,
            restart_cap,
            transfers: RwLock::new(HashMap::new()),
            batches: RwLock::new(HashMap::new()),
        }
    }

    /// Build a client from daemon configuration.
    pub fn from_config(config: &Aria2Config) -> Self {
        let rpc = RpcClient::new(config.rpc_url(), config.rpc_secret.clone());
        Self::new(rpc, config.retry.clone(), config.transfer_restart_cap)
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Submit one transfer, returning its gid.
    ///
    /// A destination already present on disk needs no transfer: the
    /// submission completes immediately with a synthetic `local-` gid
    /// that reports Complete, and no RPC is issued.
    pub async fn submit(
        &self,
        url: &str,
        dest: &Path,
        options: Option<Value>,
    ) -> Result<Gid, RpcError> {
        let options = options.unwrap_or_else(|| json!({}));

        if dest.exists() {
            let gid = format!("{LOCAL_GID_PREFIX}{}", Uuid::new_v4());
            tracing::info!(
                url,
                dest = %dest.display(),
                gid = %gid,
                "Destination already present, skipping download"
            );
            self.record_transfer(&gid, url, dest, options, 0).await;
            return Ok(gid);
        }

        let gid = self.add_uri(url, dest, &options).await?;
        tracing::info!(url, dest = %dest.display(), gid = %gid, "Transfer submitted");
        self.record_transfer(&gid, url, dest, options, 0).await;
        Ok(gid)
    }

    /// Submit every item under `batch_id`, continuing past failures.
    ///
    /// A failed submission simply does not join the batch. Returns the
    /// number of items submitted.
    pub async fn submit_batch(&self, items: &[SubmitItem], batch_id: &str) -> usize {
        let mut gids = Vec::with_capacity(items.len());
        for item in items {
            match self.submit(&item.url, &item.dest, None).await {
                Ok(gid) => gids.push(gid),
                Err(e) => {
                    tracing::error!(
                        batch_id,
                        url = %item.url,
                        error = %e,
                        "Batch item submission failed"
                    );
                }
            }
        }

        let submitted = gids.len();
        self.batches.write().await.insert(
            batch_id.to_string(),
            BatchRecord {
                gids,
                created_at: Utc::now(),
            },
        );
        tracing::info!(batch_id, submitted, requested = items.len(), "Batch submitted");
        submitted
    }

    async fn add_uri(&self, url: &str, dest: &Path, extra: &Value) -> Result<Gid, RpcError> {
        let mut options = serde_json::Map::new();
        if let Some(dir) = dest.parent() {
            options.insert("dir".into(), json!(dir.to_string_lossy()));
        }
        if let Some(name) = dest.file_name() {
            options.insert("out".into(), json!(name.to_string_lossy()));
        }
        if let Some(extra) = extra.as_object() {
            for (key, value) in extra {
                options.insert(key.clone(), value.clone());
            }
        }

        let params = vec![json!([url]), Value::Object(options)];
        let rpc = &self.rpc;
        call_with_retry(&self.retry, "aria2.addUri", move || {
            rpc.call::<Gid>("aria2.addUri", params.clone())
        })
        .await
    }

    async fn record_transfer(
        &self,
        gid: &str,
        url: &str,
        dest: &Path,
        options: Value,
        restart_count: u32,
    ) {
        self.transfers.write().await.insert(
            gid.to_string(),
            TransferRecord {
                source_url: url.to_string(),
                dest_path: dest.to_path_buf(),
                options,
                restart_count,
            },
        );
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Fetch one transfer's progress; `Ok(None)` when the daemon no
    /// longer knows the gid.
    pub async fn query_progress(&self, gid: &str) -> Result<Option<TransferSnapshot>, RpcError> {
        if gid.starts_with(LOCAL_GID_PREFIX) {
            return Ok(self.local_snapshot(gid).await);
        }

        let rpc = &self.rpc;
        let result = call_with_retry(&self.retry, "aria2.tellStatus", move || {
            rpc.call::<TellStatusResponse>(
                "aria2.tellStatus",
                vec![json!(gid), json!(TELL_STATUS_KEYS)],
            )
        })
        .await;

        match result {
            Ok(response) => Ok(Some(response.into_snapshot())),
            Err(e) if e.is_unknown_gid() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Per-member snapshots for a batch; `Ok(None)` for an unknown batch.
    ///
    /// Members the daemon has forgotten contribute nothing; an empty
    /// snapshot list still aggregates to a never-complete batch.
    pub async fn batch_snapshots(
        &self,
        batch_id: &str,
    ) -> Result<Option<Vec<TransferSnapshot>>, RpcError> {
        let Some(gids) = self.batch_members(batch_id).await else {
            return Ok(None);
        };

        let mut snapshots = Vec::with_capacity(gids.len());
        for gid in &gids {
            if let Some(snapshot) = self.query_progress(gid).await? {
                snapshots.push(snapshot);
            }
        }
        Ok(Some(snapshots))
    }

    /// Aggregate batch progress; `Ok(None)` for an unknown batch.
    pub async fn query_batch_progress(
        &self,
        batch_id: &str,
    ) -> Result<Option<BatchProgress>, RpcError> {
        Ok(self
            .batch_snapshots(batch_id)
            .await?
            .map(|snapshots| progress::aggregate(&snapshots)))
    }

    /// Daemon-wide statistics.
    pub async fn global_stats(&self) -> Result<GlobalStats, RpcError> {
        let rpc = &self.rpc;
        let response = call_with_retry(&self.retry, "aria2.getGlobalStat", move || {
            rpc.call::<GlobalStatResponse>("aria2.getGlobalStat", vec![])
        })
        .await?;
        Ok(response.into_stats())
    }

    async fn local_snapshot(&self, gid: &str) -> Option<TransferSnapshot> {
        let transfers = self.transfers.read().await;
        let record = transfers.get(gid)?;
        let size = std::fs::metadata(&record.dest_path)
            .map(|m| m.len())
            .unwrap_or(0);
        Some(TransferSnapshot {
            gid: gid.to_string(),
            status: TransferStatus::Complete,
            total_length: size,
            completed_length: size,
            download_speed: 0,
            error_code: None,
            error_message: None,
            file_path: Some(record.dest_path.to_string_lossy().into_owned()),
        })
    }

    // -----------------------------------------------------------------------
    // Cancel / pause / resume
    // -----------------------------------------------------------------------

    /// Remove one transfer from the daemon.
    ///
    /// Returns whether the daemon accepted the removal; RPC-level
    /// rejections (already finished, unknown gid) are a `false`, not an
    /// error. Connectivity failures still surface.
    pub async fn cancel(&self, gid: &str) -> Result<bool, RpcError> {
        if gid.starts_with(LOCAL_GID_PREFIX) {
            return Ok(true);
        }

        let rpc = &self.rpc;
        let result = call_with_retry(&self.retry, "aria2.remove", move || {
            rpc.call::<Gid>("aria2.remove", vec![json!(gid)])
        })
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if e.is_connectivity() => Err(e),
            Err(e) => {
                tracing::debug!(gid, error = %e, "Remove rejected by daemon");
                Ok(false)
            }
        }
    }

    /// Best-effort concurrent cancel of every batch member.
    ///
    /// Returns how many members the daemon accepted a removal for; an
    /// unknown batch cancels nothing.
    pub async fn cancel_batch(&self, batch_id: &str) -> usize {
        let Some(gids) = self.batch_members(batch_id).await else {
            return 0;
        };

        let results = join_all(gids.iter().map(|gid| self.cancel(gid))).await;
        let cancelled = results
            .iter()
            .filter(|result| matches!(result, Ok(true)))
            .count();
        tracing::info!(batch_id, cancelled, members = gids.len(), "Batch cancel issued");
        cancelled
    }

    pub async fn pause(&self, gid: &str) -> Result<bool, RpcError> {
        self.pause_or_resume("aria2.pause", gid).await
    }

    pub async fn resume(&self, gid: &str) -> Result<bool, RpcError> {
        self.pause_or_resume("aria2.unpause", gid).await
    }

    /// Best-effort concurrent pause of every batch member.
    pub async fn pause_batch(&self, batch_id: &str) -> usize {
        let Some(gids) = self.batch_members(batch_id).await else {
            return 0;
        };
        let results = join_all(gids.iter().map(|gid| self.pause(gid))).await;
        results
            .iter()
            .filter(|result| matches!(result, Ok(true)))
            .count()
    }

    /// Best-effort concurrent resume of every batch member.
    pub async fn resume_batch(&self, batch_id: &str) -> usize {
        let Some(gids) = self.batch_members(batch_id).await else {
            return 0;
        };
        let results = join_all(gids.iter().map(|gid| self.resume(gid))).await;
        results
            .iter()
            .filter(|result| matches!(result, Ok(true)))
            .count()
    }

    async fn pause_or_resume(&self, method: &'static str, gid: &str) -> Result<bool, RpcError> {
        // Local gids have no daemon-side state to pause.
        if gid.starts_with(LOCAL_GID_PREFIX) {
            return Ok(false);
        }

        let rpc = &self.rpc;
        let result = call_with_retry(&self.retry, method, move || {
            rpc.call::<Gid>(method, vec![json!(gid)])
        })
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if e.is_connectivity() => Err(e),
            Err(e) => {
                tracing::debug!(gid, method, error = %e, "State change rejected by daemon");
                Ok(false)
            }
        }
    }

    /// Ask the daemon to shut down gracefully.
    ///
    /// No retry wrapping: an unreachable daemon is already what the
    /// caller wants.
    pub async fn shutdown_daemon(&self) -> Result<(), RpcError> {
        self.rpc.call::<String>("aria2.shutdown", vec![]).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Restart-on-failure
    // -----------------------------------------------------------------------

    /// Resubmit a transfer using its recorded submission.
    ///
    /// Returns the replacement gid, or `None` when the gid is unknown or
    /// its restart counter has reached the cap. The counter carries
    /// forward (+1) onto the new gid and batch membership is swapped in
    /// place. The destination-exists shortcut is deliberately bypassed:
    /// a failed transfer may leave a partial file at the destination.
    pub async fn restart_failed(&self, gid: &str) -> Result<Option<Gid>, RpcError> {
        let record = {
            let transfers = self.transfers.read().await;
            match transfers.get(gid) {
                Some(record) => record.clone(),
                None => return Ok(None),
            }
        };

        if record.restart_count >= self.restart_cap {
            tracing::warn!(
                gid,
                restarts = record.restart_count,
                cap = self.restart_cap,
                "Transfer reached restart cap, leaving failed"
            );
            return Ok(None);
        }

        // Drop the old handle first so the daemon frees the destination.
        let _ = self.cancel(gid).await;

        let new_gid = self
            .add_uri(&record.source_url, &record.dest_path, &record.options)
            .await?;

        {
            let mut transfers = self.transfers.write().await;
            transfers.remove(gid);
            transfers.insert(
                new_gid.clone(),
                TransferRecord {
                    restart_count: record.restart_count + 1,
                    ..record
                },
            );
        }
        {
            let mut batches = self.batches.write().await;
            for batch in batches.values_mut() {
                for member in batch.gids.iter_mut() {
                    if member == gid {
                        *member = new_gid.clone();
                    }
                }
            }
        }

        tracing::info!(old_gid = gid, new_gid = %new_gid, "Restarted failed transfer");
        Ok(Some(new_gid))
    }

    /// Restart every errored member of a batch that is below the cap.
    ///
    /// Called from polling loops so that a batch only settles once its
    /// failures are out of restarts. Returns how many were resubmitted.
    pub async fn restart_errored_in_batch(&self, batch_id: &str) -> usize {
        let Some(gids) = self.batch_members(batch_id).await else {
            return 0;
        };

        let mut restarted = 0;
        for gid in gids {
            let errored = matches!(
                self.query_progress(&gid).await,
                Ok(Some(snapshot)) if snapshot.status == TransferStatus::Error
            );
            if !errored {
                continue;
            }
            match self.restart_failed(&gid).await {
                Ok(Some(new_gid)) => {
                    tracing::info!(batch_id, old_gid = %gid, new_gid = %new_gid, "Auto-restarted errored transfer");
                    restarted += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(batch_id, gid = %gid, error = %e, "Auto-restart failed");
                }
            }
        }
        restarted
    }

    /// Manual retry-everything: zero every restart counter, then restart
    /// every transfer currently in the error state. Returns the count.
    pub async fn restart_all_failed(&self) -> usize {
        let gids: Vec<Gid> = {
            let mut transfers = self.transfers.write().await;
            for record in transfers.values_mut() {
                record.restart_count = 0;
            }
            transfers.keys().cloned().collect()
        };

        let mut restarted = 0;
        for gid in gids {
            let errored = matches!(
                self.query_progress(&gid).await,
                Ok(Some(snapshot)) if snapshot.status == TransferStatus::Error
            );
            if !errored {
                continue;
            }
            match self.restart_failed(&gid).await {
                Ok(Some(_)) => restarted += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(gid = %gid, error = %e, "Bulk restart of transfer failed");
                }
            }
        }
        tracing::info!(restarted, "Bulk restart of failed transfers finished");
        restarted
    }

    // -----------------------------------------------------------------------
    // Registry accessors
    // -----------------------------------------------------------------------

    /// The submission recorded for a gid, if known.
    pub async fn submission(&self, gid: &str) -> Option<RecordedSubmission> {
        let transfers = self.transfers.read().await;
        transfers.get(gid).map(|record| RecordedSubmission {
            source_url: record.source_url.clone(),
            dest_path: record.dest_path.clone(),
            restart_count: record.restart_count,
        })
    }

    /// Member gids of a batch, in submission order.
    pub async fn batch_members(&self, batch_id: &str) -> Option<Vec<Gid>> {
        let batches = self.batches.read().await;
        batches.get(batch_id).map(|batch| batch.gids.clone())
    }

    /// When a batch was registered.
    pub async fn batch_created_at(&self, batch_id: &str) -> Option<DateTime<Utc>> {
        let batches = self.batches.read().await;
        batches.get(batch_id).map(|batch| batch.created_at)
    }

    /// Drop a batch's bookkeeping (the daemon-side transfers survive).
    pub async fn forget_batch(&self, batch_id: &str) {
        let removed = {
            let mut batches = self.batches.write().await;
            batches.remove(batch_id)
        };
        if let Some(batch) = removed {
            let mut transfers = self.transfers.write().await;
            for gid in &batch.gids {
                transfers.remove(gid);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
