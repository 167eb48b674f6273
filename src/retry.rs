//! Retry policy for opening upstream streams
//!
//! The engine retries exactly one thing: the initial completion request of a
//! round. A stream already delivering fragments is never retried, because
//! partial output has been forwarded to the client by then. The policy lives
//! in its own public module so callers embedding the engine can reuse it for
//! their own transient operations.
//!
//! Whether a failure is worth retrying is the error's own call (see
//! [`Error::is_transient`](crate::Error::is_transient)); this module only
//! decides how many tries to spend and how long to wait between them. Each
//! retry is logged with the label the caller supplies, so operators can tell
//! a flaky model server from a flaky tool backend.
//!
//! # Examples
//!
//! ```rust,no_run
//! use chatwire::retry::RetryConfig;
//! use std::time::Duration;
//!
//! # async fn example() -> chatwire::Result<()> {
//! let policy = RetryConfig::default()
//!     .with_max_attempts(3)
//!     .with_initial_delay(Duration::from_millis(250));
//!
//! let value = policy
//!     .run("warm-up request", || async {
//!         // Your async operation here
//!         Ok::<_, chatwire::Error>(42)
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Backoff policy for retrying a transient operation
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total tries, including the first (values below 1 are treated as 1)
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Ceiling on the delay between retries
    pub max_delay: Duration,

    /// Growth factor per retry (2.0 doubles the delay each time)
    pub backoff_multiplier: f64,

    /// Random spread around each delay (0.0 to 1.0), so concurrent requests
    /// hitting the same stalled server don't retry in lockstep
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Create a new retry policy with the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set total tries, including the first
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the delay before the first retry
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the ceiling on the delay between retries
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor per retry
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the jitter factor (clamped to 0.0..=1.0)
    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Run `operation`, retrying while it fails transiently.
    ///
    /// A non-transient error returns immediately. A transient one is logged
    /// under the `what` label and retried after a backoff delay, until the
    /// attempt budget is spent. The last error comes back unchanged, so the
    /// caller's sanitization still sees the real failure.
    pub async fn run<F, Fut, T>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= attempts || !err.is_transient() {
                return Err(err);
            }

            let delay = self.delay_before_retry(attempt);
            log::warn!(
                "{} failed (attempt {}/{}): {}; retrying in {:?}",
                what,
                attempt,
                attempts,
                err,
                delay
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    /// Backoff before the retry following attempt number `attempt` (1-based):
    /// exponential growth capped at `max_delay`, spread by the jitter factor.
    fn delay_before_retry(&self, attempt: u32) -> Duration {
        let exponential = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt as i32 - 1);
        let capped = exponential.min(self.max_delay.as_secs_f64());

        let spread = capped * self.jitter_factor;
        let jittered = capped + spread * (rand::random::<f64>() - 0.5);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_retry_config_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(30))
            .with_backoff_multiplier(1.5)
            .with_jitter_factor(0.2);

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.backoff_multiplier, 1.5);
        assert_eq!(config.jitter_factor, 0.2);
    }

    #[test]
    fn test_jitter_factor_clamped() {
        assert_eq!(RetryConfig::new().with_jitter_factor(7.0).jitter_factor, 1.0);
        assert_eq!(RetryConfig::new().with_jitter_factor(-1.0).jitter_factor, 0.0);
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_multiplier(2.0)
            .with_jitter_factor(0.0); // No jitter for predictable testing

        let delay1 = config.delay_before_retry(1);
        let delay2 = config.delay_before_retry(2);
        let delay3 = config.delay_before_retry(3);

        assert_eq!(delay1, Duration::from_secs(1));
        assert!(delay2 > delay1);
        assert!(delay3 > delay2);
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(15))
            .with_backoff_multiplier(4.0)
            .with_jitter_factor(0.0);

        assert_eq!(config.delay_before_retry(5), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_run_success_on_first_attempt() {
        let config = RetryConfig::new().with_max_attempts(3);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = config
            .run("test operation", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<i32, Error>(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_retries_transient_failures() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(10));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = config
            .run("test operation", move || {
                let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if count < 3 {
                        Err(Error::timeout())
                    } else {
                        Ok::<i32, Error>(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_exhausts_attempt_budget() {
        let config = RetryConfig::new()
            .with_max_attempts(2)
            .with_initial_delay(Duration::from_millis(10));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = config
            .run("test operation", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, Error>(Error::api(503, "overloaded")) }
            })
            .await;

        // The last error comes back unchanged
        assert!(matches!(result, Err(Error::Api { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_non_transient_error() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(10));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = config
            .run("test operation", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, Error>(Error::api(401, "bad key")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_with_zero_attempts_still_tries_once() {
        let config = RetryConfig::new().with_max_attempts(0);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = config
            .run("test operation", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, Error>(Error::timeout()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
