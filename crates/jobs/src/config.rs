//! Orchestrator configuration.

use std::path::PathBuf;
use std::time::Duration;

/// What to do when a batch settles with some transfers still failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartialFailurePolicy {
    /// Fail the job, naming the sources that did not download.
    #[default]
    Abort,
    /// Continue to assembly with unresolved references left in place;
    /// the assembler decides whether it can live with them.
    Proceed,
}

/// Tuning for the job pipeline and monitor loops.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Where downloaded media lands.
    pub download_dir: PathBuf,
    /// Where assembled results are written.
    pub output_dir: PathBuf,
    /// Where the JSON job store keeps its files.
    pub store_dir: PathBuf,
    /// Pipeline batch-progress poll interval (ms).
    pub poll_interval_ms: u64,
    /// Progress monitor sweep interval (ms).
    pub monitor_interval_ms: u64,
    /// Behavior when a batch settles with failures.
    pub partial_failure: PartialFailurePolicy,
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default            |
    /// |----------------------------|--------------------|
    /// | `DOWNLOAD_DIR`             | `./data/downloads` |
    /// | `JOBS_OUTPUT_DIR`          | `./data/output`    |
    /// | `JOBS_STORE_DIR`           | `./data/jobs`      |
    /// | `JOBS_POLL_INTERVAL_MS`    | `1000`             |
    /// | `JOBS_MONITOR_INTERVAL_MS` | `2000`             |
    /// | `JOBS_PARTIAL_FAILURE`     | `abort`            |
    ///
    /// `DOWNLOAD_DIR` is shared with the daemon configuration so both
    /// sides agree on where media lives.
    pub fn from_env() -> Self {
        let download_dir = PathBuf::from(
            std::env::var("DOWNLOAD_DIR").unwrap_or_else(|_| "./data/downloads".into()),
        );

        let output_dir = PathBuf::from(
            std::env::var("JOBS_OUTPUT_DIR").unwrap_or_else(|_| "./data/output".into()),
        );

        let store_dir = PathBuf::from(
            std::env::var("JOBS_STORE_DIR").unwrap_or_else(|_| "./data/jobs".into()),
        );

        let poll_interval_ms: u64 = std::env::var("JOBS_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("JOBS_POLL_INTERVAL_MS must be a valid u64");

        let monitor_interval_ms: u64 = std::env::var("JOBS_MONITOR_INTERVAL_MS")
            .unwrap_or_else(|_| "2000".into())
            .parse()
            .expect("JOBS_MONITOR_INTERVAL_MS must be a valid u64");

        let partial_failure = match std::env::var("JOBS_PARTIAL_FAILURE") {
            Ok(value) => match value.to_ascii_lowercase().as_str() {
                "abort" => PartialFailurePolicy::Abort,
                "proceed" => PartialFailurePolicy::Proceed,
                other => panic!("JOBS_PARTIAL_FAILURE must be 'abort' or 'proceed', got '{other}'"),
            },
            Err(_) => PartialFailurePolicy::default(),
        };

        Self {
            download_dir,
            output_dir,
            store_dir,
            poll_interval_ms,
            monitor_interval_ms,
            partial_failure,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
