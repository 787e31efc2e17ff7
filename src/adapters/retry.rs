//! Timeout, exponential backoff, and request spacing for upstream calls.
//!
//! `RetryPolicy::run` is the only place an upstream request is retried.
//! Each attempt is raced against the policy timeout; a failed attempt
//! that is not the last one waits `base_delay * 2^(attempt-1)` before
//! trying again. The final attempt's error is returned unchanged.
//!
//! Rate-limit spacing happens before an attempt's deadline starts, so a
//! slow limiter never turns into a timeout.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::types::YieldError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounded attempts with a per-attempt deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, base_delay_ms: u64, timeout_ms: u64) -> Self {
        Self {
            retries,
            base_delay: Duration::from_millis(base_delay_ms),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Wait applied after failed attempt number `attempt` (1-indexed).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// There is no cancellation hook: dropping the returned future is the
    /// only way to abandon a call early.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, YieldError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, YieldError>>,
    {
        self.run_spaced(None, op).await
    }

    /// Like `run`, but each attempt first waits on `limiter` outside the
    /// attempt timeout.
    pub async fn run_spaced<T, F, Fut>(
        &self,
        limiter: Option<&RateLimiter>,
        mut op: F,
    ) -> Result<T, YieldError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, YieldError>>,
    {
        let attempts = self.retries.max(1);
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);

        let mut attempt = 1;
        loop {
            if let Some(limiter) = limiter {
                limiter.wait().await;
            }
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(YieldError::Timeout { timeout_ms }),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Upstream call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt >= attempts => {
                    warn!(attempt, error = %e, "Upstream call failed, attempts exhausted");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Upstream call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Like `run_spaced`, but clears `last_error` on success and records
    /// the final error on failure.
    pub async fn run_tracked<T, F, Fut>(
        &self,
        limiter: Option<&RateLimiter>,
        last_error: &LastError,
        op: F,
    ) -> Result<T, YieldError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, YieldError>>,
    {
        match self.run_spaced(limiter, op).await {
            Ok(value) => {
                last_error.clear();
                Ok(value)
            }
            Err(e) => {
                last_error.record(&e);
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Last error slot
// ---------------------------------------------------------------------------

/// Most recent terminal failure of one adapter instance. Last write wins.
#[derive(Debug, Default)]
pub struct LastError {
    slot: Mutex<Option<String>>,
}

impl LastError {
    pub fn record(&self, err: &YieldError) {
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(err.to_string());
    }

    pub fn clear(&self) {
        *self.slot.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    pub fn get(&self) -> Option<String> {
        self.slot.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

// ---------------------------------------------------------------------------
// Rate limiter
// ---------------------------------------------------------------------------

/// Minimum spacing between requests from one adapter instance.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// `0` disables spacing.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let min_interval = if requests_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(60_000 / u64::from(requests_per_minute))
        };
        Self {
            min_interval,
            last_request: tokio::sync::Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Sleep until the next request is allowed, then claim the slot.
    pub async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delays_double_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retries, 3);
        assert_eq!(policy.timeout, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let policy = RetryPolicy::new(3, 1000, 10_000);
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(YieldError::Network(format!("attempt {n}")))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1000 ms after the first failure, 2000 ms after the second
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(3000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(3100), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_returns_last_error() {
        let policy = RetryPolicy::new(3, 1000, 10_000);
        let calls = AtomicU32::new(0);
        let last_error = LastError::default();

        let result: Result<(), _> = policy
            .run_tracked(None, &last_error, || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(YieldError::Network(format!("attempt {n}"))) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(format!("{err}"), "Network error: attempt 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(last_error.get().as_deref(), Some("Network error: attempt 3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_last_error() {
        let policy = RetryPolicy::new(1, 1000, 10_000);
        let last_error = LastError::default();
        last_error.record(&YieldError::Network("old".into()));

        let value = policy
            .run_tracked(None, &last_error, || async { Ok::<_, YieldError>(7) })
            .await;

        tokio_test::assert_ok!(value);
        assert!(last_error.get().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_times_out() {
        let policy = RetryPolicy::new(1, 1000, 10_000);
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, YieldError>(())
                }
            })
            .await;

        assert!(matches!(result, Err(YieldError::Timeout { timeout_ms: 10_000 })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(10), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(11), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_success() {
        let policy = RetryPolicy::new(2, 500, 1_000);
        let calls = AtomicU32::new(0);

        let result = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n == 1 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok::<_, YieldError>(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_one_attempt() {
        let policy = RetryPolicy::new(0, 1000, 10_000);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(YieldError::Http { status: 503, body: String::new() }) }
            })
            .await;

        tokio_test::assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::per_minute(60);
        assert_eq!(limiter.min_interval(), Duration::from_secs(1));

        let started = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        limiter.wait().await;
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiter_wait_does_not_count_against_timeout() {
        // One request per minute, ten second attempt deadline
        let policy = RetryPolicy::new(3, 1000, 10_000);
        let limiter = RateLimiter::per_minute(1);
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        for _ in 0..2 {
            let result = policy
                .run_spaced(Some(&limiter), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, YieldError>(()) }
                })
                .await;
            tokio_test::assert_ok!(result);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_disabled() {
        let limiter = RateLimiter::per_minute(0);
        let started = Instant::now();
        for _ in 0..10 {
            limiter.wait().await;
        }
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
