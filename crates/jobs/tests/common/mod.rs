use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::Mutex;

use clipforge_aria2::client::SubmitItem;
use clipforge_core::progress::{self, BatchProgress, TransferSnapshot};
use clipforge_core::status::{JobStatus, TransferStatus};
use clipforge_core::types::JobId;
use clipforge_events::NotificationSink;
use clipforge_jobs::assembly::{AssemblyError, AssemblyService};
use clipforge_jobs::config::{OrchestratorConfig, PartialFailurePolicy};
use clipforge_jobs::context::JobContext;
use clipforge_jobs::error::JobError;
use clipforge_jobs::job::Job;
use clipforge_jobs::orchestrator::JobOrchestrator;
use clipforge_jobs::registry::{JobRegistry, SubscriberRegistry};
use clipforge_jobs::service::{DownloadService, TransferOutcome};
use clipforge_jobs::store::{JobStore, StoreError};

/// How the scripted download service should behave for one test.
#[derive(Clone)]
pub struct DownloadScript {
    /// URLs that error on every attempt, restarts included.
    pub failing: Vec<String>,
    /// Progress polls before healthy transfers report complete.
    pub settle_after_polls: u32,
    /// Restart budget per failing URL before it stays errored.
    pub restart_cap: u32,
    /// Keep every transfer active forever (for cancellation tests).
    pub never_settle: bool,
    /// Refuse every submission, leaving the batch registered but empty.
    pub reject_submissions: bool,
}

impl Default for DownloadScript {
    fn default() -> Self {
        Self {
            failing: Vec::new(),
            settle_after_polls: 1,
            restart_cap: 2,
            never_settle: false,
            reject_submissions: false,
        }
    }
}

struct ScriptedTransfer {
    gid: String,
    url: String,
    dest: PathBuf,
}

#[derive(Default)]
struct ScriptState {
    batches: HashMap<String, Vec<ScriptedTransfer>>,
    polls: HashMap<String, u32>,
    restarts: HashMap<String, u32>,
    next_gid: u32,
    ensure_calls: u32,
    restart_calls: Vec<String>,
    cancel_calls: Vec<String>,
}

/// In-memory stand-in for the daemon stack, driven by a [`DownloadScript`].
///
/// Healthy submissions get a stub file written at their destination so the
/// orchestrator's local-existence check passes; failing URLs cycle through
/// the restart budget and then stay errored.
pub struct ScriptedDownloadService {
    script: DownloadScript,
    failing: HashSet<String>,
    state: Mutex<ScriptState>,
}

impl ScriptedDownloadService {
    pub fn new(script: DownloadScript) -> Self {
        let failing = script.failing.iter().cloned().collect();
        Self {
            script,
            failing,
            state: Mutex::new(ScriptState::default()),
        }
    }

    pub async fn ensure_calls(&self) -> u32 {
        self.state.lock().await.ensure_calls
    }

    pub async fn restart_calls(&self) -> Vec<String> {
        self.state.lock().await.restart_calls.clone()
    }

    pub async fn cancel_calls(&self) -> Vec<String> {
        self.state.lock().await.cancel_calls.clone()
    }

    pub async fn restarts_of(&self, url: &str) -> u32 {
        self.state.lock().await.restarts.get(url).copied().unwrap_or(0)
    }

    fn snapshot_for(&self, transfer: &ScriptedTransfer, polls: u32, restarts: u32) -> TransferSnapshot {
        let mut snapshot = TransferSnapshot {
            gid: transfer.gid.clone(),
            status: TransferStatus::Active,
            total_length: 1000,
            completed_length: 400,
            download_speed: 100,
            error_code: None,
            error_message: None,
            file_path: None,
        };

        if self.failing.contains(&transfer.url) {
            if restarts >= self.script.restart_cap {
                snapshot.status = TransferStatus::Error;
                snapshot.completed_length = 0;
                snapshot.download_speed = 0;
                snapshot.error_code = Some("1".to_string());
                snapshot.error_message = Some("download failed".to_string());
            } else {
                // Restart budget left: the replacement is queued again.
                snapshot.status = TransferStatus::Waiting;
                snapshot.completed_length = 0;
                snapshot.download_speed = 0;
            }
        } else if !self.script.never_settle && polls >= self.script.settle_after_polls {
            snapshot.status = TransferStatus::Complete;
            snapshot.completed_length = 1000;
            snapshot.download_speed = 0;
        }

        snapshot
    }
}

#[async_trait]
impl DownloadService for ScriptedDownloadService {
    async fn ensure_running(&self) -> Result<(), JobError> {
        self.state.lock().await.ensure_calls += 1;
        Ok(())
    }

    async fn submit_batch(
        &self,
        items: &[SubmitItem],
        batch_id: &str,
    ) -> Result<usize, JobError> {
        let mut state = self.state.lock().await;
        if self.script.reject_submissions {
            state.batches.insert(batch_id.to_string(), Vec::new());
            return Ok(0);
        }
        let mut members = Vec::with_capacity(items.len());
        for item in items {
            state.next_gid += 1;
            members.push(ScriptedTransfer {
                gid: format!("t{}", state.next_gid),
                url: item.url.clone(),
                dest: item.dest.clone(),
            });
            if !self.failing.contains(&item.url) {
                if let Some(parent) = item.dest.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(&item.dest, b"downloaded").unwrap();
            }
        }
        let accepted = members.len();
        state.batches.insert(batch_id.to_string(), members);
        Ok(accepted)
    }

    async fn restart_errored(&self, batch_id: &str) -> usize {
        let mut state = self.state.lock().await;
        state.restart_calls.push(batch_id.to_string());
        let urls: Vec<String> = state
            .batches
            .get(batch_id)
            .map(|members| members.iter().map(|t| t.url.clone()).collect())
            .unwrap_or_default();

        let mut restarted = 0;
        for url in urls {
            if self.failing.contains(&url) {
                let count = state.restarts.entry(url).or_insert(0);
                if *count < self.script.restart_cap {
                    *count += 1;
                    restarted += 1;
                }
            }
        }
        restarted
    }

    async fn batch_progress(&self, batch_id: &str) -> Result<Option<BatchProgress>, JobError> {
        let mut state = self.state.lock().await;
        if !state.batches.contains_key(batch_id) {
            return Ok(None);
        }
        let polls = state.polls.entry(batch_id.to_string()).or_insert(0);
        *polls += 1;
        let polls = *polls;

        let members = &state.batches[batch_id];
        let snapshots: Vec<TransferSnapshot> = members
            .iter()
            .map(|t| {
                let restarts = state.restarts.get(&t.url).copied().unwrap_or(0);
                self.snapshot_for(t, polls, restarts)
            })
            .collect();
        Ok(Some(progress::aggregate(&snapshots)))
    }

    async fn batch_outcomes(
        &self,
        batch_id: &str,
    ) -> Result<Option<Vec<TransferOutcome>>, JobError> {
        let state = self.state.lock().await;
        let Some(members) = state.batches.get(batch_id) else {
            return Ok(None);
        };
        let polls = state.polls.get(batch_id).copied().unwrap_or(0);

        let outcomes = members
            .iter()
            .map(|t| {
                let restarts = state.restarts.get(&t.url).copied().unwrap_or(0);
                let snapshot = self.snapshot_for(t, polls, restarts);
                TransferOutcome {
                    gid: t.gid.clone(),
                    status: snapshot.status,
                    source_url: t.url.clone(),
                    dest_path: t.dest.clone(),
                }
            })
            .collect();
        Ok(Some(outcomes))
    }

    async fn cancel_batch(&self, batch_id: &str) -> usize {
        let mut state = self.state.lock().await;
        state.cancel_calls.push(batch_id.to_string());
        state
            .batches
            .get(batch_id)
            .map(|members| members.len())
            .unwrap_or(0)
    }
}

/// Job store that keeps everything in a map; no disk involved.
#[derive(Default)]
pub struct MemoryStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.lock().await.get(&id).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn save(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.lock().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.jobs.lock().await.values().cloned().collect())
    }

    async fn delete(&self, id: JobId) -> Result<(), StoreError> {
        self.jobs.lock().await.remove(&id);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RecordedEvent {
    pub job_id: JobId,
    pub event_type: String,
    pub payload: Value,
}

/// Notification sink that records every pushed event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().await.clone()
    }

    /// The `status` payload fields of all recorded events, in push order.
    pub async fn statuses(&self) -> Vec<String> {
        self.events()
            .await
            .iter()
            .filter_map(|e| e.payload.get("status"))
            .filter_map(|s| s.as_str())
            .map(str::to_string)
            .collect()
    }

    pub async fn events_of(&self, event_type: &str) -> Vec<RecordedEvent> {
        self.events()
            .await
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn push(&self, job_id: JobId, event_type: &str, payload: Value) {
        self.events.lock().await.push(RecordedEvent {
            job_id,
            event_type: event_type.to_string(),
            payload,
        });
    }
}

/// Assembly service that records its calls and writes a stub result file.
pub struct RecordingAssembly {
    output_dir: PathBuf,
    calls: StdMutex<Vec<(JobId, Value)>>,
}

impl RecordingAssembly {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            calls: StdMutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(JobId, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

impl AssemblyService for RecordingAssembly {
    fn run(&self, job_id: JobId, params: &Value) -> Result<PathBuf, AssemblyError> {
        self.calls.lock().unwrap().push((job_id, params.clone()));
        let path = self.output_dir.join(format!("{job_id}.out"));
        std::fs::create_dir_all(&self.output_dir)?;
        std::fs::write(&path, b"assembled")?;
        Ok(path)
    }
}

/// Fully wired orchestrator over scripted collaborators.
pub struct Harness {
    pub orchestrator: JobOrchestrator,
    pub ctx: Arc<JobContext>,
    pub downloads: Arc<ScriptedDownloadService>,
    pub store: Arc<MemoryStore>,
    pub assembly: Arc<RecordingAssembly>,
    pub sink: Arc<RecordingSink>,
    pub dir: TempDir,
}

pub fn harness(script: DownloadScript, partial_failure: PartialFailurePolicy) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = OrchestratorConfig {
        download_dir: dir.path().join("downloads"),
        output_dir: dir.path().join("output"),
        store_dir: dir.path().join("jobs"),
        poll_interval_ms: 20,
        monitor_interval_ms: 50,
        partial_failure,
    };

    let downloads = Arc::new(ScriptedDownloadService::new(script));
    let store = Arc::new(MemoryStore::new());
    let assembly = Arc::new(RecordingAssembly::new(config.output_dir.clone()));
    let sink = Arc::new(RecordingSink::new());

    let ctx = Arc::new(JobContext {
        registry: Arc::new(JobRegistry::new()),
        subscribers: Arc::new(SubscriberRegistry::new()),
        downloads: downloads.clone(),
        store: store.clone(),
        assembly: assembly.clone(),
        sink: sink.clone(),
    });
    let orchestrator = JobOrchestrator::new(config, ctx.clone());

    Harness {
        orchestrator,
        ctx,
        downloads,
        store,
        assembly,
        sink,
        dir,
    }
}

/// Poll until the job reaches `status`; panics on timeout or if the job
/// lands on a different terminal status first.
pub async fn wait_for_status(orchestrator: &JobOrchestrator, id: JobId, status: JobStatus) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(job) = orchestrator.get_job(id).await {
            if job.status == status {
                return job;
            }
            if job.status.is_terminal() {
                panic!(
                    "job reached {} while waiting for {} (error: {:?})",
                    job.status.as_str(),
                    status.as_str(),
                    job.error
                );
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for job {id} to reach {}", status.as_str());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
