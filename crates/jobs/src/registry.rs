//! In-memory job registry and per-job subscriber tracking.
//!
//! The registry is the authoritative live view of jobs; the JSON store
//! trails it for crash recovery. Subscribers are opaque client labels
//! used to decide whether progress events are worth publishing.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

use clipforge_core::paging;
use clipforge_core::status::JobStatus;
use clipforge_core::types::JobId;

use crate::job::Job;

// ---------------------------------------------------------------------------
// JobRegistry
// ---------------------------------------------------------------------------

/// Thread-safe map of all known jobs.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a job.
    pub async fn insert(&self, job: Job) {
        self.jobs.write().await.insert(job.id, job);
    }

    /// Fetch a snapshot of one job.
    pub async fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// Remove a job, returning it if present.
    pub async fn remove(&self, id: JobId) -> Option<Job> {
        self.jobs.write().await.remove(&id)
    }

    pub async fn count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// All jobs currently in one status, unordered and unpaged.
    pub async fn by_status(&self, status: JobStatus) -> Vec<Job> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect()
    }

    /// List jobs newest-first, optionally filtered by status, with
    /// clamped limit/offset paging.
    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Vec<Job> {
        let limit = paging::clamp_limit(limit, paging::DEFAULT_LIST_LIMIT, paging::MAX_LIST_LIMIT);
        let offset = paging::clamp_offset(offset);

        let jobs = self.jobs.read().await;
        let mut matched: Vec<Job> = jobs
            .values()
            .filter(|job| status.map_or(true, |s| job.status == s))
            .cloned()
            .collect();
        // Newest first; ties broken by id so ordering is stable.
        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        matched.into_iter().skip(offset).take(limit).collect()
    }

    /// Apply a mutation to one job under the write lock and return the
    /// updated snapshot. Returns `None` if the job does not exist.
    pub async fn update<F>(&self, id: JobId, f: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id)?;
        f(job);
        Some(job.clone())
    }
}

// ---------------------------------------------------------------------------
// SubscriberRegistry
// ---------------------------------------------------------------------------

/// Tracks which client labels are subscribed to each job's progress.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<JobId, HashSet<String>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, job_id: JobId, client: &str) {
        self.subscribers
            .write()
            .await
            .entry(job_id)
            .or_default()
            .insert(client.to_string());
    }

    pub async fn unsubscribe(&self, job_id: JobId, client: &str) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(set) = subscribers.get_mut(&job_id) {
            set.remove(client);
            if set.is_empty() {
                subscribers.remove(&job_id);
            }
        }
    }

    /// Sorted subscriber labels for a job; empty when nobody listens.
    pub async fn subscribers_of(&self, job_id: JobId) -> Vec<String> {
        let subscribers = self.subscribers.read().await;
        let mut labels: Vec<String> = subscribers
            .get(&job_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        labels.sort();
        labels
    }

    /// Drop all subscriptions for a job (job deleted or finished).
    pub async fn clear_job(&self, job_id: JobId) {
        self.subscribers.write().await.remove(&job_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
