//! `clipforge-worker` -- job orchestration daemon.
//!
//! Boots the aria2 supervisor, restores persisted jobs, and runs the
//! health and progress loops until SIGINT/SIGTERM. Configuration comes
//! from the environment; see `Aria2Config::from_env` and
//! `OrchestratorConfig::from_env` for the variable tables.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clipforge_aria2::client::TransferClient;
use clipforge_aria2::config::Aria2Config;
use clipforge_aria2::supervisor::DaemonSupervisor;
use clipforge_events::{BusSink, EventBus};
use clipforge_jobs::assembly::ParamsDumpAssembly;
use clipforge_jobs::config::OrchestratorConfig;
use clipforge_jobs::context::JobContext;
use clipforge_jobs::monitor::ProgressMonitor;
use clipforge_jobs::orchestrator::JobOrchestrator;
use clipforge_jobs::registry::{JobRegistry, SubscriberRegistry};
use clipforge_jobs::service::Aria2DownloadService;
use clipforge_jobs::store::JsonFileStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "clipforge_worker=debug,clipforge_jobs=debug,clipforge_aria2=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let aria2_config = Aria2Config::from_env();
    let jobs_config = OrchestratorConfig::from_env();
    tracing::info!(
        rpc_port = aria2_config.rpc_port,
        download_dir = %jobs_config.download_dir.display(),
        "Loaded worker configuration"
    );

    // --- Daemon stack ---
    let supervisor = Arc::new(DaemonSupervisor::new(aria2_config.clone()));
    let outcome = supervisor.start().await?;
    tracing::info!(pid = outcome.pid(), "Download daemon up");

    let client = TransferClient::from_config(&aria2_config);
    let downloads = Arc::new(Aria2DownloadService::new(supervisor.clone(), client));

    // --- Events ---
    let event_bus = Arc::new(EventBus::new(256));
    let sink = Arc::new(BusSink::new(event_bus.clone()));

    // --- Job machinery ---
    let ctx = Arc::new(JobContext {
        registry: Arc::new(JobRegistry::new()),
        subscribers: Arc::new(SubscriberRegistry::new()),
        downloads,
        store: Arc::new(JsonFileStore::new(jobs_config.store_dir.clone())),
        assembly: Arc::new(ParamsDumpAssembly::new(jobs_config.output_dir.clone())),
        sink,
    });
    let orchestrator = JobOrchestrator::new(jobs_config.clone(), ctx.clone());

    let restored = orchestrator.restore().await?;
    tracing::info!(restored, "Job registry ready");

    // --- Background loops ---
    let cancel = CancellationToken::new();

    let health_handle = {
        let supervisor = supervisor.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { supervisor.run_health_loop(cancel).await })
    };

    let monitor = ProgressMonitor::new(ctx.clone(), jobs_config.monitor_interval());
    let monitor_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { monitor.run(cancel).await })
    };

    // Keep the broadcast channel drained until a request layer attaches
    // real consumers.
    let event_handle = tokio::spawn(drain_events(event_bus.subscribe(), cancel.clone()));

    tracing::info!("Worker running");
    shutdown_signal().await;

    // --- Graceful shutdown ---
    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), health_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), monitor_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), event_handle).await;
    tracing::info!("Background loops stopped");

    supervisor.stop().await?;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Log every bus event at debug until cancelled or the bus closes.
async fn drain_events(
    mut events: broadcast::Receiver<clipforge_events::JobEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = events.recv() => match received {
                Ok(event) => {
                    tracing::debug!(
                        event_type = %event.event_type,
                        job_id = ?event.job_id,
                        "Job event"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event drain lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
