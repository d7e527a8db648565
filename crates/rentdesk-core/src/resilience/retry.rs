//! Retry logic with exponential backoff and a per-attempt timeout.
//!
//! Every network-facing call goes through [`with_retry`]. Each attempt races
//! against [`RetryPolicy::attempt_timeout`]; a timed-out attempt is dropped and
//! counted as a failure. Between failed attempts the executor sleeps, doubling
//! the delay each time.
//!
//! Fire-and-forget writes use [`best_effort`] instead: same executor, but
//! errors are logged and swallowed so callers never see them.
//!
//! ```
//! use rentdesk_core::resilience::RetryPolicy;
//! use std::time::Duration;
//!
//! let reads = RetryPolicy::interactive();
//! assert_eq!(reads.attempts, 3);
//! assert_eq!(reads.attempt_timeout, Duration::from_secs(4));
//!
//! let analytics = RetryPolicy::best_effort();
//! assert_eq!(analytics.attempt_timeout, Duration::from_secs(1));
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Backoff and timeout settings for one class of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of calls, including the first
    pub attempts: u32,
    /// Sleep after the first failure; doubled after each subsequent one
    pub initial_delay: Duration,
    /// Upper bound on a single attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::interactive()
    }
}

impl RetryPolicy {
    /// Interactive reads and writes: 3 attempts, 1s initial backoff, 4s per attempt.
    #[must_use]
    pub const fn interactive() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(1000),
            attempt_timeout: Duration::from_secs(4),
        }
    }

    /// Analytics writes: a single 1s attempt. Must never hold up the caller.
    #[must_use]
    pub const fn best_effort() -> Self {
        Self {
            attempts: 1,
            initial_delay: Duration::from_millis(0),
            attempt_timeout: Duration::from_secs(1),
        }
    }

    /// Override the attempt count
    #[must_use]
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Override the initial backoff delay
    #[must_use]
    pub const fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Override the per-attempt timeout
    #[must_use]
    pub const fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub const fn test() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_millis(200),
        }
    }
}

/// An attempt that did not finish within its timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptTimeout {
    pub operation: String,
    pub after: Duration,
}

impl fmt::Display for AttemptTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' timed out after {:?}", self.operation, self.after)
    }
}

/// Errors the executor can retry.
pub trait RetryableError: fmt::Display + From<AttemptTimeout> {
    /// Whether another attempt could succeed. Permanent errors stop the loop early.
    fn is_retryable(&self) -> bool {
        true
    }
}

/// Run `operation` under `policy`, returning the first success or the last error.
pub async fn with_retry<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    let max_attempts = policy.attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 1;

    loop {
        let outcome = match timeout(policy.attempt_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(E::from(AttemptTimeout {
                operation: operation_name.to_string(),
                after: policy.attempt_timeout,
            })),
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retrying"
                    );
                }
                return Ok(value);
            }
            Err(error) if attempt >= max_attempts || !error.is_retryable() => {
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    error = %error,
                    "Operation failed; giving up"
                );
                return Err(error);
            }
            Err(error) => {
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    error = %error,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Operation failed; retrying"
                );
                sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
        }
    }
}

/// Run a fire-and-forget operation: errors are logged, never returned.
pub async fn best_effort<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    operation: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    match with_retry(operation_name, policy, operation).await {
        Ok(value) => Some(value),
        Err(error) => {
            debug!(
                operation = operation_name,
                error = %error,
                "Best-effort operation dropped"
            );
            None
        }
    }
}
