//! Lifecycle supervision for the aria2c daemon.
//!
//! [`DaemonSupervisor`] owns exactly one daemon per RPC port: it adopts a
//! live daemon left behind by a previous process when one answers the
//! version probe, and otherwise spawns its own under the cross-process
//! singleton lock. A health loop watches the supervised process and
//! respawns it if it dies out from under us.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::Aria2Config;
use crate::messages::VersionResponse;
use crate::rpc::{RpcClient, RpcError};
use crate::singleton::{process_alive, terminate_process, ProcessSingletonGuard, SingletonError};

/// How often `stop` re-checks the daemon for a polite exit.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Longest startup log tail carried into error messages.
const LOG_TAIL_CHARS: usize = 400;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from daemon lifecycle management.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Spawning or filesystem preparation failed.
    #[error("Daemon I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The singleton lock or owner registry failed.
    #[error(transparent)]
    Singleton(#[from] SingletonError),

    /// Another process held the startup lock past the configured wait.
    #[error("Timed out waiting {waited_secs}s for the daemon startup lock")]
    LockTimeout { waited_secs: u64 },

    /// The daemon process exited before its RPC endpoint answered.
    #[error("Daemon exited during startup ({status}): {log_tail}")]
    EarlyExit { status: String, log_tail: String },

    /// The daemon process is running but never answered the probe.
    #[error("Daemon RPC not ready after {attempts} probes: {log_tail}")]
    StartupTimeout { attempts: u32, log_tail: String },
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Where the supervisor currently is in the daemon lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotRunning,
    Starting,
    Running,
    Restarting,
    Stopping,
}

/// How `start` obtained a running daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A fresh daemon process was spawned and registered.
    Spawned { pid: i32 },
    /// A live daemon from another process answered the probe.
    Adopted { pid: i32 },
    /// This supervisor already had a healthy daemon.
    AlreadyRunning { pid: i32 },
}

impl StartOutcome {
    pub fn pid(&self) -> i32 {
        match self {
            Self::Spawned { pid } | Self::Adopted { pid } | Self::AlreadyRunning { pid } => *pid,
        }
    }
}

/// The process this supervisor currently watches.
struct DaemonHandle {
    pid: i32,
    adopted: bool,
    /// Present only for daemons this supervisor spawned itself.
    child: Option<Child>,
}

// ---------------------------------------------------------------------------
// DaemonSupervisor
// ---------------------------------------------------------------------------

/// Supervises a single aria2c daemon on the configured RPC port.
pub struct DaemonSupervisor {
    config: Aria2Config,
    rpc: RpcClient,
    guard: Mutex<ProcessSingletonGuard>,
    /// Serializes start/stop/restart across tasks.
    lifecycle: Mutex<()>,
    state: Mutex<SupervisorState>,
    handle: Mutex<Option<DaemonHandle>>,
    /// Set when the health loop detected a dead daemon but could not yet
    /// bring up a replacement; cleared on any successful start or stop.
    respawn_pending: AtomicBool,
}

impl DaemonSupervisor {
    pub fn new(config: Aria2Config) -> Self {
        let rpc = RpcClient::new(config.rpc_url(), config.rpc_secret.clone());
        let guard = ProcessSingletonGuard::new(
            config.lock_file(),
            config.registry_file(),
            config.rpc_port,
        );
        Self {
            config,
            rpc,
            guard: Mutex::new(guard),
            lifecycle: Mutex::new(()),
            state: Mutex::new(SupervisorState::NotRunning),
            handle: Mutex::new(None),
            respawn_pending: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Aria2Config {
        &self.config
    }

    pub async fn state(&self) -> SupervisorState {
        *self.state.lock().await
    }

    /// Pid of the supervised daemon, if any.
    pub async fn current_pid(&self) -> Option<i32> {
        self.handle.lock().await.as_ref().map(|handle| handle.pid)
    }

    /// Whether the daemon answers the version probe right now.
    pub async fn is_healthy(&self) -> bool {
        self.probe().await.is_ok()
    }

    // -----------------------------------------------------------------------
    // Start
    // -----------------------------------------------------------------------

    /// Ensure a daemon is running on the configured port.
    ///
    /// Adopts a live registered daemon when one answers the probe;
    /// otherwise takes the cross-process lock, re-checks (another process
    /// may have won the race), and spawns a fresh daemon. The lock only
    /// covers the start critical section.
    pub async fn start(&self) -> Result<StartOutcome, SupervisorError> {
        let _lifecycle = self.lifecycle.lock().await;

        if let Some(pid) = self.current_pid().await {
            if self.probe().await.is_ok() {
                tracing::debug!(pid, "Daemon already supervised and healthy");
                return Ok(StartOutcome::AlreadyRunning { pid });
            }
            tracing::warn!(pid, "Supervised daemon stopped answering, starting over");
            self.handle.lock().await.take();
        }

        self.set_state(SupervisorState::Starting).await;

        // Adoption needs no lock: a registered owner with a live RPC
        // endpoint is already the singleton.
        {
            let guard = self.guard.lock().await;
            if let Some(owner) = guard.registered_owner()? {
                if self.probe().await.is_ok() {
                    *self.handle.lock().await = Some(DaemonHandle {
                        pid: owner.pid,
                        adopted: true,
                        child: None,
                    });
                    self.set_state(SupervisorState::Running).await;
                    tracing::info!(pid = owner.pid, port = self.config.rpc_port, "Adopted running daemon");
                    return Ok(StartOutcome::Adopted { pid: owner.pid });
                }
            }
        }

        let lock_timeout = self.config.lock_timeout();
        {
            let mut guard = self.guard.lock().await;
            if !guard.acquire(lock_timeout).await? {
                self.set_state(SupervisorState::NotRunning).await;
                return Err(SupervisorError::LockTimeout {
                    waited_secs: lock_timeout.as_secs(),
                });
            }
        }

        let outcome = self.start_locked().await;

        {
            let mut guard = self.guard.lock().await;
            guard.release();
        }

        match &outcome {
            Ok(_) => {
                self.respawn_pending.store(false, Ordering::Relaxed);
                self.set_state(SupervisorState::Running).await;
            }
            Err(_) => self.set_state(SupervisorState::NotRunning).await,
        }
        outcome
    }

    /// Start body run while holding the singleton lock.
    async fn start_locked(&self) -> Result<StartOutcome, SupervisorError> {
        {
            let guard = self.guard.lock().await;
            if let Some(owner) = guard.registered_owner()? {
                // Another process spawned while we waited for the lock.
                if self.probe().await.is_ok() {
                    *self.handle.lock().await = Some(DaemonHandle {
                        pid: owner.pid,
                        adopted: true,
                        child: None,
                    });
                    tracing::info!(pid = owner.pid, "Adopted daemon spawned by lock predecessor");
                    return Ok(StartOutcome::Adopted { pid: owner.pid });
                }
                // Registered and alive but deaf to RPC: replace it.
                tracing::warn!(pid = owner.pid, "Registered daemon is unresponsive, replacing");
                guard.kill_registered_owner(self.config.stop_grace()).await?;
            }
        }

        let mut child = self.spawn_daemon().await?;
        let pid = match child.id() {
            Some(id) => id as i32,
            None => {
                let status = child.wait().await?;
                return Err(SupervisorError::EarlyExit {
                    status: status.to_string(),
                    log_tail: self.log_tail(),
                });
            }
        };

        if let Err(e) = self.wait_until_ready(&mut child).await {
            let _ = child.kill().await;
            let _ = child.wait().await;
            return Err(e);
        }

        self.guard.lock().await.register_owner(pid)?;
        *self.handle.lock().await = Some(DaemonHandle {
            pid,
            adopted: false,
            child: Some(child),
        });
        tracing::info!(pid, port = self.config.rpc_port, "Daemon spawned and ready");
        Ok(StartOutcome::Spawned { pid })
    }

    /// Spawn aria2c detached, with stdout/stderr into the daemon log.
    async fn spawn_daemon(&self) -> Result<Child, SupervisorError> {
        tokio::fs::create_dir_all(&self.config.state_dir).await?;
        tokio::fs::create_dir_all(&self.config.download_dir).await?;

        let conf_file = self.config.conf_file();
        if !conf_file.exists() {
            tokio::fs::write(&conf_file, default_conf()).await?;
            tracing::info!(conf = %conf_file.display(), "Wrote default daemon configuration");
        }

        let session_file = self.config.session_file();
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&session_file)
            .await?;

        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.config.daemon_log_file())?;

        let mut command = Command::new(&self.config.binary);
        command
            .arg("--enable-rpc=true")
            .arg("--rpc-listen-all=false")
            .arg(format!("--rpc-listen-port={}", self.config.rpc_port))
            .arg("--rpc-allow-origin-all=false")
            .arg(format!("--conf-path={}", conf_file.display()))
            .arg(format!("--dir={}", self.config.download_dir.display()))
            .arg(format!("--input-file={}", session_file.display()))
            .arg(format!("--save-session={}", session_file.display()))
            .arg("--save-session-interval=30")
            .arg("--continue=true")
            .arg(format!(
                "--max-concurrent-downloads={}",
                self.config.max_concurrent_downloads
            ));
        if let Some(secret) = &self.config.rpc_secret {
            command.arg(format!("--rpc-secret={secret}"));
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file));

        tracing::info!(
            binary = %self.config.binary.display(),
            port = self.config.rpc_port,
            "Spawning daemon"
        );
        Ok(command.spawn()?)
    }

    /// Poll the version probe until the daemon answers, watching for an
    /// early exit so a misconfigured spawn fails with its log tail
    /// instead of a timeout.
    async fn wait_until_ready(&self, child: &mut Child) -> Result<(), SupervisorError> {
        let attempts = self.config.startup_probe_attempts;
        for attempt in 0..attempts {
            match self.probe().await {
                Ok(version) => {
                    tracing::debug!(version = %version.version, attempt, "Daemon RPC ready");
                    return Ok(());
                }
                Err(e) => {
                    tracing::trace!(attempt, error = %e, "Daemon RPC not ready yet");
                }
            }
            if let Some(status) = child.try_wait()? {
                return Err(SupervisorError::EarlyExit {
                    status: status.to_string(),
                    log_tail: self.log_tail(),
                });
            }
            tokio::time::sleep(self.config.startup_probe_interval()).await;
        }
        Err(SupervisorError::StartupTimeout {
            attempts,
            log_tail: self.log_tail(),
        })
    }

    async fn probe(&self) -> Result<VersionResponse, RpcError> {
        self.rpc
            .call::<VersionResponse>("aria2.getVersion", vec![])
            .await
    }

    // -----------------------------------------------------------------------
    // Stop / restart
    // -----------------------------------------------------------------------

    /// Stop the supervised daemon: polite shutdown RPC, bounded wait,
    /// then signals. Idempotent when nothing is supervised.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let _lifecycle = self.lifecycle.lock().await;
        self.respawn_pending.store(false, Ordering::Relaxed);
        let Some(mut handle) = self.handle.lock().await.take() else {
            return Ok(());
        };

        self.set_state(SupervisorState::Stopping).await;
        tracing::info!(pid = handle.pid, adopted = handle.adopted, "Stopping daemon");

        if let Err(e) = self.rpc.call::<String>("aria2.shutdown", vec![]).await {
            tracing::debug!(error = %e, "Shutdown RPC failed, escalating to signals");
        }

        let deadline = tokio::time::Instant::now() + self.config.stop_grace();
        while process_alive(handle.pid) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
        if process_alive(handle.pid) {
            terminate_process(handle.pid, self.config.stop_grace()).await;
        }
        if let Some(mut child) = handle.child.take() {
            // Reap the child so it does not linger as a zombie.
            let _ = child.wait().await;
        }

        {
            let mut guard = self.guard.lock().await;
            guard.clear_owner()?;
            guard.release();
        }

        self.set_state(SupervisorState::NotRunning).await;
        tracing::info!(pid = handle.pid, "Daemon stopped");
        Ok(())
    }

    /// Stop then start, for recovery from a wedged daemon.
    pub async fn restart(&self) -> Result<StartOutcome, SupervisorError> {
        tracing::info!("Restarting daemon");
        self.set_state(SupervisorState::Restarting).await;
        self.stop().await?;
        self.start().await
    }

    // -----------------------------------------------------------------------
    // Health loop
    // -----------------------------------------------------------------------

    /// Probe the daemon every health interval until cancelled, respawning
    /// it if the supervised process died. Failures are logged, never
    /// fatal; the next tick tries again.
    pub async fn run_health_loop(&self, cancel: CancellationToken) {
        let interval = self.config.health_check_interval();
        tracing::info!(interval_secs = interval.as_secs(), "Daemon health loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Daemon health loop stopping");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    self.health_tick().await;
                }
            }
        }
    }

    async fn health_tick(&self) {
        let pending = self.respawn_pending.load(Ordering::Relaxed);
        if self.state().await != SupervisorState::Running && !pending {
            return;
        }

        if !pending {
            if self.probe().await.is_ok() {
                return;
            }

            // Distinguish a dead process from one that is alive but deaf.
            let exited = {
                let mut handle = self.handle.lock().await;
                match handle.as_mut() {
                    Some(supervised) => match supervised.child.as_mut() {
                        Some(child) => match child.try_wait() {
                            Ok(Some(status)) => {
                                tracing::warn!(
                                    pid = supervised.pid,
                                    status = %status,
                                    "Supervised daemon exited"
                                );
                                true
                            }
                            Ok(None) => false,
                            Err(_) => true,
                        },
                        None => !process_alive(supervised.pid),
                    },
                    None => return,
                }
            };

            if !exited {
                tracing::warn!("Daemon probe failed but the process is still alive");
                return;
            }

            tracing::warn!("Daemon is gone, respawning");
            self.handle.lock().await.take();
            self.set_state(SupervisorState::NotRunning).await;
        }

        // start() adopts a replacement registered by another process, or
        // spawns a fresh daemon under the lock.
        if let Err(e) = self.start().await {
            self.respawn_pending.store(true, Ordering::Relaxed);
            tracing::error!(error = %e, "Daemon respawn failed, retrying next health tick");
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn set_state(&self, next: SupervisorState) {
        let mut state = self.state.lock().await;
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "Supervisor state change");
            *state = next;
        }
    }

    /// Tail of the daemon log for error context, newlines flattened.
    fn log_tail(&self) -> String {
        read_log_tail(&self.config.daemon_log_file()).unwrap_or_default()
    }
}

fn read_log_tail(path: &PathBuf) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let tail: String = if trimmed.chars().count() > LOG_TAIL_CHARS {
        trimmed
            .chars()
            .rev()
            .take(LOG_TAIL_CHARS)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect()
    } else {
        trimmed.to_string()
    };
    Some(tail.replace('\n', " | "))
}

fn default_conf() -> &'static str {
    "# Default daemon configuration. Edit and restart to apply.\n\
     file-allocation=none\n\
     max-connection-per-server=4\n\
     split=4\n\
     min-split-size=1M\n\
     auto-file-renaming=false\n\
     allow-overwrite=true\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
