//! Retry with exponential backoff.
//!
//! `with_retry` runs an async operation until it succeeds, the error is
//! classified as permanent, or the attempt budget is spent. Delays grow as
//! `base_delay * backoff_factor^(attempt - 1)`, capped at `max_delay`, and are
//! optionally scaled by a random factor in `[0.5, 1.0]` so jobs failing
//! against the same dependency do not retry in lockstep.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::JobError;

pub type RetryPredicate = Arc<dyn Fn(&JobError) -> bool + Send + Sync>;
pub type RetryHook = Arc<dyn Fn(&JobError, u32, Duration) + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub jitter: bool,
    /// Decides whether an error is worth another attempt
    pub retry_if: RetryPredicate,
    /// Called before each backoff wait with (error, attempt, delay)
    pub on_retry: Option<RetryHook>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_factor: 2.0,
            jitter: true,
            retry_if: Arc::new(JobError::is_retryable),
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter", &self.jitter)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&JobError) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Arc::new(predicate);
        self
    }

    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(&JobError, u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Delay before the retry that follows failed attempt `attempt`
    /// (1-indexed), before jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let factor: f64 = rand::rng().random_range(0.5..=1.0);
        delay.mul_f64(factor)
    }
}

/// Partial retry settings layered over an operation-type default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryOverrides {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub jitter: Option<bool>,
}

impl RetryOverrides {
    /// Overlay `other` on `self`; fields `other` leaves `None` keep their value.
    pub fn merge(&self, other: &RetryOverrides) -> RetryOverrides {
        RetryOverrides {
            max_attempts: other.max_attempts.or(self.max_attempts),
            base_delay_ms: other.base_delay_ms.or(self.base_delay_ms),
            max_delay_ms: other.max_delay_ms.or(self.max_delay_ms),
            backoff_factor: other.backoff_factor.or(self.backoff_factor),
            jitter: other.jitter.or(self.jitter),
        }
    }

    pub fn apply(&self, mut policy: RetryPolicy) -> RetryPolicy {
        if let Some(max_attempts) = self.max_attempts {
            policy.max_attempts = max_attempts;
        }
        if let Some(ms) = self.base_delay_ms {
            policy.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_delay_ms {
            policy.max_delay = Duration::from_millis(ms);
        }
        if let Some(factor) = self.backoff_factor {
            policy.backoff_factor = factor;
        }
        if let Some(jitter) = self.jitter {
            policy.jitter = jitter;
        }
        policy
    }
}

/// Run `operation` under `policy`, returning the first success or the last
/// error.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, JobError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, JobError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !(policy.retry_if)(&error) {
            debug!("Not retrying after attempt {}: {}", attempt, error);
            return Err(error);
        }

        if attempt >= max_attempts {
            warn!("Giving up after {} attempts: {}", attempt, error);
            return Err(error);
        }

        let delay = policy.apply_jitter(policy.delay_for_attempt(attempt));
        if let Some(hook) = &policy.on_retry {
            hook(&error, attempt, delay);
        }
        debug!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            attempt, max_attempts, error, delay
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(100))
            .with_backoff_factor(2.0)
            .with_jitter(false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_fails_after_one_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), JobError> = with_retry(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(JobError::operation("Invalid credentials")) }
        })
        .await;

        assert_eq!(result, Err(JobError::operation("Invalid credentials")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_uses_every_attempt_with_backoff() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result: Result<(), JobError> = with_retry(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(JobError::operation("Network timeout")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(JobError::operation("connection refused"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_retry_hook_sees_each_wait() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let policy = fast_policy().on_retry(move |_, attempt, delay| sink.lock().push((attempt, delay)));

        let _: Result<(), JobError> =
            with_retry(&policy, || async { Err(JobError::operation("temporary outage")) }).await;

        assert_eq!(
            *seen.lock(),
            vec![(1, Duration::from_millis(100)), (2, Duration::from_millis(200))]
        );
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = fast_policy().with_max_delay(Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_stays_within_half_to_full() {
        let policy = fast_policy().with_jitter(true);
        for _ in 0..200 {
            let d = policy.apply_jitter(Duration::from_millis(1000));
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_overrides_merge_and_apply() {
        let defaults = RetryOverrides { max_attempts: Some(2), base_delay_ms: Some(5000), ..Default::default() };
        let caller = RetryOverrides { max_attempts: Some(4), jitter: Some(false), ..Default::default() };
        let policy = defaults.merge(&caller).apply(RetryPolicy::default());

        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(5000));
        assert_eq!(policy.max_delay, Duration::from_millis(30_000));
        assert!(!policy.jitter);
    }
}
