//! Cross-process mutual exclusion for the daemon port.
//!
//! Two cooperating pieces: an advisory `flock(2)` on a lock file, held
//! while a supervisor is claiming the port, and a JSON registry file
//! recording which pid currently owns the daemon. The lock serializes
//! start attempts across independent OS processes (hot-reload, multiple
//! workers); the registry lets a later process discover and adopt — or
//! kill — a daemon that outlived the process that spawned it. An
//! in-process mutex cannot provide either guarantee.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// How often `acquire` re-checks a contended lock.
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often a terminated process is re-checked for exit.
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors from the singleton lock and owner registry.
#[derive(Debug, thiserror::Error)]
pub enum SingletonError {
    /// Lock or registry file I/O failed.
    #[error("Lock file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The owner record could not be serialized.
    #[error("Owner registry serialization failed: {0}")]
    Registry(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Process helpers
// ---------------------------------------------------------------------------

/// Whether the OS still has a process with this pid (signal-0 probe).
///
/// `EPERM` means the process exists but belongs to another user, which
/// still counts as alive.
pub fn process_alive(pid: i32) -> bool {
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Send SIGTERM, wait up to `grace` for exit, then SIGKILL.
pub async fn terminate_process(pid: i32, grace: Duration) {
    tracing::info!(pid, "Sending SIGTERM");
    unsafe { libc::kill(pid, libc::SIGTERM) };

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !process_alive(pid) {
            return;
        }
        tokio::time::sleep(TERMINATE_POLL_INTERVAL).await;
    }

    tracing::warn!(pid, "Process ignored SIGTERM, sending SIGKILL");
    unsafe { libc::kill(pid, libc::SIGKILL) };
}

// ---------------------------------------------------------------------------
// FileLock
// ---------------------------------------------------------------------------

/// Advisory whole-file lock via `flock(2)`.
///
/// The lock is tied to the open file description: dropping the guard (or
/// the process exiting, however abruptly) releases it.
struct FileLock {
    file: File,
}

impl FileLock {
    /// Open (creating if needed) and lock without blocking.
    ///
    /// `Ok(None)` means another holder — possibly in another process —
    /// currently has the lock.
    fn try_acquire(path: &Path) -> io::Result<Option<FileLock>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(Some(FileLock { file }));
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
            Ok(None)
        } else {
            Err(err)
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
    }
}

// ---------------------------------------------------------------------------
// DaemonOwner
// ---------------------------------------------------------------------------

/// Registry record identifying the process that owns the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DaemonOwner {
    /// OS pid of the daemon process.
    pub pid: i32,
    /// RPC port the daemon listens on.
    pub port: u16,
    /// When ownership was registered (UTC).
    pub started_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ProcessSingletonGuard
// ---------------------------------------------------------------------------

/// Cross-process guard ensuring one daemon instance per port.
///
/// The guard does not spawn or stop the daemon itself; it only arbitrates
/// who may. See the supervisor for the lifecycle side.
pub struct ProcessSingletonGuard {
    lock_file: PathBuf,
    registry_file: PathBuf,
    port: u16,
    held: Option<FileLock>,
}

impl ProcessSingletonGuard {
    pub fn new(lock_file: PathBuf, registry_file: PathBuf, port: u16) -> Self {
        Self {
            lock_file,
            registry_file,
            port,
            held: None,
        }
    }

    /// Try to take the cross-process lock, polling until `timeout`.
    ///
    /// Returns whether the lock was obtained; a `false` return is the
    /// normal contended outcome, not an error. Re-acquiring a lock this
    /// guard already holds succeeds immediately.
    pub async fn acquire(&mut self, timeout: Duration) -> Result<bool, SingletonError> {
        if self.held.is_some() {
            return Ok(true);
        }
        if let Some(parent) = self.lock_file.parent() {
            fs::create_dir_all(parent)?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            match FileLock::try_acquire(&self.lock_file)? {
                Some(lock) => {
                    tracing::debug!(lock_file = %self.lock_file.display(), "Singleton lock acquired");
                    self.held = Some(lock);
                    return Ok(true);
                }
                None => {
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            lock_file = %self.lock_file.display(),
                            timeout_ms = timeout.as_millis() as u64,
                            "Singleton lock acquisition timed out"
                        );
                        return Ok(false);
                    }
                    tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Release the lock if held. Dropping the guard does the same.
    pub fn release(&mut self) {
        if self.held.take().is_some() {
            tracing::debug!(lock_file = %self.lock_file.display(), "Singleton lock released");
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Read the owner registry, validating the recorded pid is alive.
    ///
    /// Stale records (process gone) and corrupt files are cleaned up and
    /// reported as absent — a dead owner must never wedge startup.
    pub fn registered_owner(&self) -> Result<Option<DaemonOwner>, SingletonError> {
        let text = match fs::read_to_string(&self.registry_file) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let owner: DaemonOwner = match serde_json::from_str(&text) {
            Ok(owner) => owner,
            Err(e) => {
                tracing::warn!(
                    registry_file = %self.registry_file.display(),
                    error = %e,
                    "Removing corrupt owner registry"
                );
                fs::remove_file(&self.registry_file)?;
                return Ok(None);
            }
        };

        if process_alive(owner.pid) {
            Ok(Some(owner))
        } else {
            tracing::info!(pid = owner.pid, "Removing stale owner registry entry");
            fs::remove_file(&self.registry_file)?;
            Ok(None)
        }
    }

    /// Record `pid` as the daemon owner for this guard's port.
    pub fn register_owner(&self, pid: i32) -> Result<(), SingletonError> {
        if let Some(parent) = self.registry_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let owner = DaemonOwner {
            pid,
            port: self.port,
            started_at: Utc::now(),
        };
        fs::write(&self.registry_file, serde_json::to_string_pretty(&owner)?)?;
        tracing::info!(pid, port = self.port, "Registered daemon owner");
        Ok(())
    }

    /// Remove the owner record, if any.
    pub fn clear_owner(&self) -> Result<(), SingletonError> {
        match fs::remove_file(&self.registry_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Terminate the registered owner (SIGTERM, bounded wait, SIGKILL)
    /// and clear the registry. Returns whether a live owner was found.
    pub async fn kill_registered_owner(&self, grace: Duration) -> Result<bool, SingletonError> {
        let Some(owner) = self.registered_owner()? else {
            return Ok(false);
        };
        terminate_process(owner.pid, grace).await;
        self.clear_owner()?;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
