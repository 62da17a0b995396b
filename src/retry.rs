//! Retry logic with exponential backoff
//!
//! Only transient failures are retried. The delay starts at
//! [`RetryConfig::initial_delay`], is multiplied by
//! [`RetryConfig::backoff_multiplier`] after every failure and never exceeds
//! [`RetryConfig::max_delay`]. [`RetryConfig::max_attempts`] bounds the total
//! number of calls, the first one included.
//!
//! # Example
//!
//! ```no_run
//! use mineru_batch::retry::{IsRetryable, with_retry};
//! use mineru_batch::config::RetryConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let cancel = CancellationToken::new();
//! with_retry(&config, &cancel, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, 5xx, connection reset) return `true`.
/// Everything the remote or the disk rejected for good returns `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Transient(_) => true,
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Config { .. }
            | Error::Validation(_)
            | Error::Auth(_)
            | Error::Permanent(_)
            | Error::NotFound(_)
            | Error::Expired(_)
            | Error::CorruptArchive(_)
            | Error::Resume(_)
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::Serialization(_)
            | Error::ShuttingDown
            | Error::Other(_) => false,
        }
    }
}

/// Backoff state for one call
///
/// Tracks how many attempts have failed and which delay comes next.
#[derive(Debug, Clone)]
pub struct Backoff {
    failures: u32,
    max_attempts: u32,
    next: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

impl Backoff {
    /// Fresh state for a call governed by `config`
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            failures: 0,
            max_attempts: config.max_attempts.max(1),
            next: config.initial_delay.min(config.max_delay),
            max_delay: config.max_delay,
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
        }
    }

    /// Number of failures recorded so far
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failed attempt.
    ///
    /// Returns the delay to wait before the next attempt, or `None` once the
    /// attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            return None;
        }

        let delay = self.next;
        let grown = Duration::from_secs_f64(self.next.as_secs_f64() * self.multiplier);
        self.next = grown.min(self.max_delay);

        Some(if self.jitter { add_jitter(delay) } else { delay })
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// Backoff sleeps end early when `cancel` fires; the last error is then
/// returned without another attempt, and the caller decides what cancellation
/// means for it. A call that is already running is never interrupted.
///
/// # Returns
///
/// Returns the successful result or the last error after all attempts are exhausted.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut backoff = Backoff::new(config);

    loop {
        match operation().await {
            Ok(result) => {
                if backoff.failures() > 0 {
                    tracing::info!(
                        attempts = backoff.failures() + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() => {
                let Some(delay) = backoff.next_delay() else {
                    tracing::error!(
                        error = %e,
                        attempts = backoff.failures(),
                        "Operation failed after all retry attempts exhausted"
                    );
                    return Err(e);
                };

                tracing::warn!(
                    error = %e,
                    attempt = backoff.failures(),
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Retry abandoned, cancellation requested");
                        return Err(e);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Operation failed with non-retryable error");
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
