//! Concurrency permits, call spacing and retry with exponential backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, warn};

use crate::error::BackendError;

/// How failed calls are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_secs(2), max_delay: Duration::from_secs(30) }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Shared gate for calls to one backend: `K` permits plus a minimum spacing between call starts.
pub struct RateLimiter {
    permits: Semaphore,
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        Self { permits: Semaphore::new(max_concurrent.max(1)), min_interval, next_slot: Mutex::new(None) }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for a permit, then for this caller's call slot.
    ///
    /// # Errors
    /// Returns a non-retryable error if the limiter has been closed.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, BackendError> {
        let permit = self.permits.acquire().await.map_err(|_| BackendError::fatal("rate limiter closed"))?;
        self.wait_turn().await;
        Ok(permit)
    }

    /// Reserve the next call slot and sleep until it arrives.
    async fn wait_turn(&self) {
        let slot = {
            let mut last = self.next_slot.lock();
            let now = Instant::now();
            let slot = match *last {
                Some(previous) => (previous + self.min_interval).max(now),
                None => now,
            };
            *last = Some(slot);
            slot
        };
        sleep_until(slot).await;
    }

    /// Reject all current and future waiters.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, BackendError>,
    /// Calls actually made, including the successful one.
    pub attempts: u32,
}

/// Runs operations through a [`RateLimiter`], retrying retryable failures.
pub struct RetryExecutor {
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
        Self { limiter, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails fatally or exhausts its retries.
    ///
    /// A permit is held only while a call is in flight; backoff sleeps do not
    /// occupy one. A backend-suggested delay replaces the computed backoff.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempts = 0u32;

        loop {
            let outcome = {
                let _permit = match self.limiter.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => return Attempted { result: Err(e), attempts },
                };
                attempts += 1;
                operation().await
            };

            let error = match outcome {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(unit = label, attempts, "Succeeded after retry");
                    }
                    return Attempted { result: Ok(value), attempts };
                }
                Err(e) => e,
            };

            if !error.retryable() {
                warn!(unit = label, error = %error, "Request failed with non-retryable error");
                return Attempted { result: Err(error), attempts };
            }

            if attempts > self.policy.max_retries {
                warn!(unit = label, attempts, error = %error, "Request failed, retries exhausted");
                return Attempted { result: Err(error), attempts };
            }

            let delay = error.retry_after.unwrap_or_else(|| self.policy.backoff(attempts - 1));
            warn!(
                unit = label,
                attempt = attempts,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Request failed, retrying after backoff"
            );
            sleep(delay).await;
        }
    }
}
