//! Retry policy shared by the audio asset waiter and the sync reconciler

use std::future::Future;
use std::time::Duration;

/// Bounded retry policy
///
/// Describes how many attempts an operation gets and how long to wait
/// between them. The delay starts at `interval` and is multiplied by
/// `backoff` after every failed attempt, capped at `max_interval`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (always at least one)
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub interval: Duration,
    /// Multiplier applied to the delay after each attempt (1.0 = fixed)
    pub backoff: f64,
    /// Maximum delay cap
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(20, Duration::from_millis(300))
    }
}

impl RetryPolicy {
    /// Fixed-interval policy
    #[must_use]
    pub const fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            backoff: 1.0,
            max_interval: interval,
        }
    }

    /// Single attempt, no waiting
    #[must_use]
    pub const fn once() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Exponential policy capped at `max_interval`
    #[must_use]
    pub const fn with_backoff(
        max_attempts: u32,
        interval: Duration,
        backoff: f64,
        max_interval: Duration,
    ) -> Self {
        Self {
            max_attempts,
            interval,
            backoff,
            max_interval,
        }
    }

    /// Number of attempts this policy allows
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }

    /// Delay to wait after the given zero-based attempt failed
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.backoff <= 1.0 {
            return self.interval;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.backoff.powi(exponent);
        if !factor.is_finite() {
            return self.max_interval.max(self.interval);
        }

        let cap = self.max_interval.max(self.interval);
        let scaled = self.interval.as_secs_f64() * factor;
        if scaled >= cap.as_secs_f64() {
            cap
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    /// Upper bound of the total time spent sleeping when every attempt fails
    /// and a delay follows each of them
    #[must_use]
    pub fn total_budget(&self) -> Duration {
        (0..self.attempts()).map(|a| self.delay_for_attempt(a)).sum()
    }

    /// Run `op` until it succeeds or the attempts are exhausted
    ///
    /// Sleeps between attempts but not after the last one. The error of the
    /// final attempt is returned.
    ///
    /// # Errors
    ///
    /// Returns the last error produced by `op`
    pub async fn retry<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.attempts();
        let mut attempt = 0;

        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 >= attempts => return Err(e),
                Err(e) => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::debug!(attempt, error = %e, ?delay, "attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 20);
        assert_eq!(policy.interval, Duration::from_millis(300));
        assert!((policy.backoff - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fixed_delay_is_constant() {
        let policy = RetryPolicy::fixed(5, Duration::from_millis(100));
        for attempt in 0..5 {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_millis(100));
        }
        assert_eq!(policy.total_budget(), Duration::from_millis(500));
    }

    #[test]
    fn exponential_growth() {
        let policy = RetryPolicy::with_backoff(
            4,
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(60),
        );

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy::with_backoff(
            10,
            Duration::from_secs(10),
            2.0,
            Duration::from_secs(15),
        );

        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(15));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(15));
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let policy = RetryPolicy::fixed(0, Duration::ZERO);
        assert_eq!(policy.attempts(), 1);
    }

    #[tokio::test]
    async fn retry_stops_on_first_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));

        let result: Result<u32, String> = policy
            .retry(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(format!("attempt {attempt}"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_returns_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));

        let result: Result<(), String> = policy
            .retry(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("attempt {attempt}")) }
            })
            .await;

        assert_eq!(result, Err("attempt 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn once_policy_never_sleeps() {
        let policy = RetryPolicy::once();
        let start = std::time::Instant::now();

        let result: Result<(), &str> = policy.retry(|_| async { Err("nope") }).await;

        assert!(result.is_err());
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
