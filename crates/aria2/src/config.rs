//! Daemon configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// aria2 daemon and client configuration.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct Aria2Config {
    /// Path to the `aria2c` binary (default: resolved from `PATH`).
    pub binary: PathBuf,
    /// RPC listen port (default: `6800`).
    pub rpc_port: u16,
    /// RPC secret token; `None` disables authentication.
    pub rpc_secret: Option<String>,
    /// Directory for the lock file, owner registry, generated config,
    /// session file and daemon log (default: `./data/aria2`).
    pub state_dir: PathBuf,
    /// Directory downloads are written into (default: `./data/downloads`).
    pub download_dir: PathBuf,
    /// Daemon-side concurrent download limit (default: `5`).
    pub max_concurrent_downloads: u32,
    /// Liveness probe attempts while waiting for a spawned daemon.
    pub startup_probe_attempts: u32,
    /// Delay between startup probe attempts, in milliseconds.
    pub startup_probe_interval_ms: u64,
    /// How long `start()` waits for the cross-process lock, in seconds.
    pub lock_timeout_secs: u64,
    /// Grace period between shutdown RPC, SIGTERM and SIGKILL, in seconds.
    pub stop_grace_secs: u64,
    /// Interval between health-loop probes, in seconds.
    pub health_check_interval_secs: u64,
    /// Per-call RPC retry policy.
    pub retry: RetryPolicy,
    /// Maximum automatic restarts per failed transfer.
    pub transfer_restart_cap: u32,
}

impl Aria2Config {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                            | Default            |
    /// |------------------------------------|--------------------|
    /// | `ARIA2_BINARY`                     | `aria2c`           |
    /// | `ARIA2_RPC_PORT`                   | `6800`             |
    /// | `ARIA2_RPC_SECRET`                 | unset              |
    /// | `ARIA2_STATE_DIR`                  | `./data/aria2`     |
    /// | `DOWNLOAD_DIR`                     | `./data/downloads` |
    /// | `ARIA2_MAX_CONCURRENT_DOWNLOADS`   | `5`                |
    /// | `ARIA2_STARTUP_PROBE_ATTEMPTS`     | `30`               |
    /// | `ARIA2_STARTUP_PROBE_INTERVAL_MS`  | `200`              |
    /// | `ARIA2_LOCK_TIMEOUT_SECS`          | `10`               |
    /// | `ARIA2_STOP_GRACE_SECS`            | `5`                |
    /// | `ARIA2_HEALTH_INTERVAL_SECS`       | `30`               |
    /// | `ARIA2_TRANSFER_RESTART_CAP`       | `3`                |
    ///
    /// Retry knobs are documented on [`RetryPolicy::from_env`].
    pub fn from_env() -> Self {
        let binary = PathBuf::from(std::env::var("ARIA2_BINARY").unwrap_or_else(|_| "aria2c".into()));

        let rpc_port: u16 = std::env::var("ARIA2_RPC_PORT")
            .unwrap_or_else(|_| "6800".into())
            .parse()
            .expect("ARIA2_RPC_PORT must be a valid u16");

        let rpc_secret = std::env::var("ARIA2_RPC_SECRET").ok().filter(|s| !s.is_empty());

        let state_dir = PathBuf::from(
            std::env::var("ARIA2_STATE_DIR").unwrap_or_else(|_| "./data/aria2".into()),
        );

        let download_dir = PathBuf::from(
            std::env::var("DOWNLOAD_DIR").unwrap_or_else(|_| "./data/downloads".into()),
        );

        let max_concurrent_downloads: u32 = std::env::var("ARIA2_MAX_CONCURRENT_DOWNLOADS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("ARIA2_MAX_CONCURRENT_DOWNLOADS must be a valid u32");

        let startup_probe_attempts: u32 = std::env::var("ARIA2_STARTUP_PROBE_ATTEMPTS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("ARIA2_STARTUP_PROBE_ATTEMPTS must be a valid u32");

        let startup_probe_interval_ms: u64 = std::env::var("ARIA2_STARTUP_PROBE_INTERVAL_MS")
            .unwrap_or_else(|_| "200".into())
            .parse()
            .expect("ARIA2_STARTUP_PROBE_INTERVAL_MS must be a valid u64");

        let lock_timeout_secs: u64 = std::env::var("ARIA2_LOCK_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("ARIA2_LOCK_TIMEOUT_SECS must be a valid u64");

        let stop_grace_secs: u64 = std::env::var("ARIA2_STOP_GRACE_SECS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("ARIA2_STOP_GRACE_SECS must be a valid u64");

        let health_check_interval_secs: u64 = std::env::var("ARIA2_HEALTH_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("ARIA2_HEALTH_INTERVAL_SECS must be a valid u64");

        let transfer_restart_cap: u32 = std::env::var("ARIA2_TRANSFER_RESTART_CAP")
            .unwrap_or_else(|_| "3".into())
            .parse()
            .expect("ARIA2_TRANSFER_RESTART_CAP must be a valid u32");

        Self {
            binary,
            rpc_port,
            rpc_secret,
            state_dir,
            download_dir,
            max_concurrent_downloads,
            startup_probe_attempts,
            startup_probe_interval_ms,
            lock_timeout_secs,
            stop_grace_secs,
            health_check_interval_secs,
            retry: RetryPolicy::from_env(),
            transfer_restart_cap,
        }
    }

    /// RPC endpoint URL for the configured port.
    pub fn rpc_url(&self) -> String {
        format!("http://127.0.0.1:{}/jsonrpc", self.rpc_port)
    }

    /// Advisory lock file, scoped to the RPC port.
    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join(format!("aria2-{}.lock", self.rpc_port))
    }

    /// Owner registry file, scoped to the RPC port.
    pub fn registry_file(&self) -> PathBuf {
        self.state_dir.join(format!("aria2-{}.json", self.rpc_port))
    }

    /// Generated daemon configuration file.
    pub fn conf_file(&self) -> PathBuf {
        self.state_dir.join("aria2.conf")
    }

    /// Session file the daemon persists its queue into.
    pub fn session_file(&self) -> PathBuf {
        self.state_dir.join("aria2.session")
    }

    /// Combined stdout/stderr log of the spawned daemon.
    pub fn daemon_log_file(&self) -> PathBuf {
        self.state_dir.join("aria2.log")
    }

    pub fn startup_probe_interval(&self) -> Duration {
        Duration::from_millis(self.startup_probe_interval_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
