//! Progress monitor sweep tests.
//!
//! Jobs are seeded straight into the registry with no pipeline task
//! attached, so every refresh observed here came from the monitor.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use clipforge_aria2::client::SubmitItem;
use clipforge_core::status::JobStatus;
use clipforge_jobs::config::PartialFailurePolicy;
use clipforge_jobs::job::Job;
use clipforge_jobs::monitor::ProgressMonitor;
use clipforge_jobs::service::DownloadService;

use common::{harness, DownloadScript, Harness};

/// Seed a DOWNLOADING job with a live scripted batch and no pipeline.
async fn seed_downloading(h: &Harness, url: &str, batch_id: &str) -> Job {
    let items = [SubmitItem {
        url: url.to_string(),
        dest: h.dir.path().join("downloads").join("seeded.mp4"),
    }];
    h.downloads.submit_batch(&items, batch_id).await.unwrap();

    let mut job = Job::new(json!({"src": url}));
    job.batch_id = Some(batch_id.to_string());
    job.transition(JobStatus::Downloading);
    h.ctx.registry.insert(job.clone()).await;
    job
}

#[tokio::test]
async fn sweep_refreshes_downloading_jobs_only() {
    let script = DownloadScript {
        never_settle: true,
        ..DownloadScript::default()
    };
    let h = harness(script, PartialFailurePolicy::Abort);

    let active = seed_downloading(&h, "https://cdn.example.com/slow.mp4", "batch-a").await;
    h.ctx.subscribers.subscribe(active.id, "mon").await;

    let mut finished = Job::new(json!({"title": "done"}));
    finished.transition(JobStatus::Processing);
    finished.transition(JobStatus::Completed);
    h.ctx.registry.insert(finished.clone()).await;

    let monitor = ProgressMonitor::new(h.ctx.clone(), Duration::from_millis(10));
    monitor.sweep().await;

    let refreshed = h.ctx.registry.get(active.id).await.unwrap();
    let progress = refreshed.progress.expect("sweep stored a snapshot");
    assert_eq!(progress.total_files, 1);
    assert_eq!(progress.active_files, 1);
    assert!(!progress.is_complete);

    // Persisted and published, and only for the downloading job.
    assert!(h.store.get(active.id).await.unwrap().progress.is_some());
    let events = h.sink.events_of("job_progress").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].job_id, active.id);

    // The finished job was left untouched.
    assert!(h.ctx.registry.get(finished.id).await.unwrap().progress.is_none());
}

#[tokio::test]
async fn sweep_skips_jobs_without_batches_or_unknown_batches() {
    let h = harness(DownloadScript::default(), PartialFailurePolicy::Abort);

    let mut no_batch = Job::new(json!({"src": "https://cdn.example.com/x.mp4"}));
    no_batch.transition(JobStatus::Downloading);
    h.ctx.registry.insert(no_batch.clone()).await;

    let mut gone_batch = Job::new(json!({"src": "https://cdn.example.com/y.mp4"}));
    gone_batch.batch_id = Some("batch-gone".to_string());
    gone_batch.transition(JobStatus::Downloading);
    h.ctx.registry.insert(gone_batch.clone()).await;

    let monitor = ProgressMonitor::new(h.ctx.clone(), Duration::from_millis(10));
    monitor.sweep().await;

    // Neither job gained a snapshot; the sweep did not error out.
    assert!(h.ctx.registry.get(no_batch.id).await.unwrap().progress.is_none());
    assert!(h.ctx.registry.get(gone_batch.id).await.unwrap().progress.is_none());
    assert!(h.sink.events().await.is_empty());
}

#[tokio::test]
async fn repeated_sweeps_report_nondecreasing_progress() {
    let script = DownloadScript {
        settle_after_polls: 3,
        ..DownloadScript::default()
    };
    let h = harness(script, PartialFailurePolicy::Abort);

    let active = seed_downloading(&h, "https://cdn.example.com/big.mp4", "batch-c").await;

    let monitor = ProgressMonitor::new(h.ctx.clone(), Duration::from_millis(10));
    let mut observed = Vec::new();
    for _ in 0..4 {
        monitor.sweep().await;
        let job = h.ctx.registry.get(active.id).await.unwrap();
        observed.push(job.progress.expect("snapshot stored").downloaded_bytes);
    }

    assert!(
        observed.windows(2).all(|w| w[0] <= w[1]),
        "downloaded bytes went backwards: {observed:?}"
    );
    let last = h.ctx.registry.get(active.id).await.unwrap();
    assert!(last.progress.unwrap().is_complete);
}

#[tokio::test]
async fn run_sweeps_until_cancelled() {
    let script = DownloadScript {
        never_settle: true,
        ..DownloadScript::default()
    };
    let h = harness(script, PartialFailurePolicy::Abort);

    let active = seed_downloading(&h, "https://cdn.example.com/slow.mp4", "batch-b").await;
    h.ctx.subscribers.subscribe(active.id, "mon").await;

    let monitor = Arc::new(ProgressMonitor::new(h.ctx.clone(), Duration::from_millis(10)));
    let cancel = CancellationToken::new();
    let task = {
        let monitor = monitor.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { monitor.run(cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("monitor loop stops on cancel")
        .unwrap();

    // Several sweeps happened while the loop was alive.
    assert!(h.sink.events_of("job_progress").await.len() > 1);
}
