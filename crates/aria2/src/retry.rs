//! Bounded exponential-backoff retry for daemon RPC calls.
//!
//! Connectivity-class failures (see [`RpcError::is_connectivity`]) are
//! transient: the daemon may be mid-restart or the socket briefly gone.
//! [`call_with_retry`] retries those with exponentially growing delays up
//! to a cap. Anything else — RPC-level rejections, malformed responses —
//! fails immediately, since repeating the call cannot change the outcome.

use std::future::Future;
use std::time::Duration;

use crate::rpc::RpcError;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts per call, the first try included.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Load the policy from environment variables with defaults.
    ///
    /// | Env Var                      | Default |
    /// |------------------------------|---------|
    /// | `ARIA2_RETRY_MAX_ATTEMPTS`   | `4`     |
    /// | `ARIA2_RETRY_BASE_DELAY_MS`  | `500`   |
    /// | `ARIA2_RETRY_MAX_DELAY_MS`   | `30000` |
    pub fn from_env() -> Self {
        let max_attempts: u32 = std::env::var("ARIA2_RETRY_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "4".into())
            .parse()
            .expect("ARIA2_RETRY_MAX_ATTEMPTS must be a valid u32");

        let base_delay_ms: u64 = std::env::var("ARIA2_RETRY_BASE_DELAY_MS")
            .unwrap_or_else(|_| "500".into())
            .parse()
            .expect("ARIA2_RETRY_BASE_DELAY_MS must be a valid u64");

        let max_delay_ms: u64 = std::env::var("ARIA2_RETRY_MAX_DELAY_MS")
            .unwrap_or_else(|_| "30000".into())
            .parse()
            .expect("ARIA2_RETRY_MAX_DELAY_MS must be a valid u64");

        Self {
            max_attempts,
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    ///
    /// Grows as `base * 2^attempt`, clamped to [`RetryPolicy::max_delay`].
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        let millis = (self.base_delay.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// Run an RPC operation, retrying connectivity failures with backoff.
///
/// `method` is only used for logging. Returns the first success, the
/// first non-connectivity error, or the last connectivity error once
/// [`RetryPolicy::max_attempts`] is exhausted.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    method: &str,
    mut op: F,
) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_connectivity() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    method,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Daemon call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
