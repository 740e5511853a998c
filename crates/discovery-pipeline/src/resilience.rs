//! Resilience primitives shared by every external call.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Duration};

use crate::error::SourceError;

/// Per-source rate limiter.
///
/// Limits throughput to a configurable number of requests per second by
/// combining a single-permit [`Semaphore`] with a fixed sleep interval.
/// Clones share the same budget.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    interval: Duration,
}

impl RateLimiter {
    /// Creates a new `RateLimiter` that allows at most
    /// `requests_per_second` requests per second.
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            interval: Duration::from_millis(1000 / u64::from(requests_per_second.max(1))),
        }
    }

    /// Waits until a request slot is available, then holds the slot for
    /// the configured interval to enforce the rate limit.
    pub async fn acquire(&self) {
        // The semaphore is never closed; an error would only skip pacing.
        if let Ok(_permit) = self.semaphore.acquire().await {
            sleep(self.interval).await;
        }
    }
}

/// Retry, backoff and timeout settings for one class of external call.
///
/// `max_attempts` counts the first try; a policy with `max_attempts == 1`
/// never retries. Every attempt is bounded by `timeout`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f32,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            factor: 2.0,
            timeout: Duration::from_secs(30),
        }
    }
}

/// The last error seen once a retried call gave up.
#[derive(Debug)]
pub struct RetryFailure {
    pub error: SourceError,
    pub attempts: u32,
}

impl RetryPolicy {
    /// A policy that makes a single attempt.
    #[must_use]
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            timeout,
            ..Self::default()
        }
    }

    /// The backoff curve as a `backon` builder.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Run `op` under this policy.
    ///
    /// Transient errors (see [`SourceError::is_transient`]) are retried with
    /// exponential backoff; anything else returns immediately. Each attempt
    /// that exceeds the timeout counts as a transient failure. A rate-limit
    /// response carrying `Retry-After` delays the next attempt by at least
    /// that long.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let limit = self.timeout;
        let mut attempts: u32 = 0;
        // Wait still owed after the backoff delay, in milliseconds.
        let owed = AtomicU64::new(0);

        let attempt = || {
            attempts += 1;
            let wait = Duration::from_millis(owed.swap(0, Ordering::SeqCst));
            let call = op();
            let name = operation.to_string();
            async move {
                if !wait.is_zero() {
                    sleep(wait).await;
                }
                match timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout {
                        operation: name,
                        after: limit,
                    }),
                }
            }
        };

        let result = attempt
            .retry(self.backoff())
            .when(SourceError::is_transient)
            .notify(|err: &SourceError, delay: Duration| {
                let extra = err
                    .retry_after()
                    .map_or(Duration::ZERO, |after| after.saturating_sub(delay));
                owed.store(
                    u64::try_from(extra.as_millis()).unwrap_or(u64::MAX),
                    Ordering::SeqCst,
                );
                log::warn!(
                    "{} failed ({}); retrying in {:?}",
                    operation,
                    err,
                    delay.saturating_add(extra)
                );
            })
            .await;

        result.map_err(|error| RetryFailure { error, attempts })
    }
}
