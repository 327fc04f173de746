//! Per-operation-type circuit breaker.
//!
//! The state machine is a plain value type ([`BreakerState`]) with pure
//! transition functions taking the current instant, so it can be unit
//! tested without a clock. [`CircuitBreaker`] wraps it in a mutex and adds
//! counters for monitoring.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::errors::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before a probe is allowed
    pub reset_timeout: Duration,
    /// Consecutive probe successes needed to close again
    pub half_open_successes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_successes: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed { failures: u32 },
    Open { since: Instant, failures: u32 },
    HalfOpen { successes: u32 },
}

impl Default for BreakerState {
    fn default() -> Self {
        BreakerState::Closed { failures: 0 }
    }
}

impl BreakerState {
    /// Lazy OPEN → HALF_OPEN once the reset timeout has elapsed.
    pub fn poll(self, config: &BreakerConfig, now: Instant) -> Self {
        match self {
            BreakerState::Open { since, .. } if now.saturating_duration_since(since) >= config.reset_timeout => {
                BreakerState::HalfOpen { successes: 0 }
            }
            other => other,
        }
    }

    pub fn on_success(self, config: &BreakerConfig) -> Self {
        match self {
            BreakerState::Closed { .. } => BreakerState::Closed { failures: 0 },
            BreakerState::HalfOpen { successes } => {
                let successes = successes + 1;
                if successes >= config.half_open_successes {
                    BreakerState::Closed { failures: 0 }
                } else {
                    BreakerState::HalfOpen { successes }
                }
            }
            // A call admitted before the circuit opened finished late.
            open @ BreakerState::Open { .. } => open,
        }
    }

    pub fn on_failure(self, config: &BreakerConfig, now: Instant) -> Self {
        match self {
            BreakerState::Closed { failures } => {
                let failures = failures + 1;
                if failures >= config.failure_threshold {
                    BreakerState::Open { since: now, failures }
                } else {
                    BreakerState::Closed { failures }
                }
            }
            BreakerState::HalfOpen { .. } => BreakerState::Open {
                since: now,
                failures: config.failure_threshold,
            },
            BreakerState::Open { failures, .. } => BreakerState::Open {
                since: now,
                failures: failures + 1,
            },
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, BreakerState::Open { .. })
    }

    pub fn kind(&self) -> CircuitState {
        match self {
            BreakerState::Closed { .. } => CircuitState::Closed,
            BreakerState::Open { .. } => CircuitState::Open,
            BreakerState::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    fn consecutive_failures(&self) -> u32 {
        match self {
            BreakerState::Closed { failures } | BreakerState::Open { failures, .. } => *failures,
            BreakerState::HalfOpen { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of a breaker for stats endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub operation_type: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: BreakerState,
    last_failure_at: Option<DateTime<Utc>>,
    total_successes: u64,
    total_failures: u64,
    rejected_calls: u64,
}

/// Shared breaker guarding every job of one operation type.
#[derive(Debug)]
pub struct CircuitBreaker {
    operation_type: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(operation_type: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            operation_type: operation_type.into(),
            config,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    pub fn operation_type(&self) -> &str {
        &self.operation_type
    }

    /// Current state, after applying any pending OPEN → HALF_OPEN transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        inner.state = inner.state.poll(&self.config, Instant::now());
        inner.state.kind()
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Admit a call or fail fast while the circuit is open.
    pub fn try_acquire(&self) -> Result<(), JobError> {
        let mut inner = self.inner.lock();
        let before = inner.state;
        inner.state = before.poll(&self.config, Instant::now());
        if before.is_open() && !inner.state.is_open() {
            info!("🔌 Circuit for '{}' is half-open, allowing probe", self.operation_type);
        }
        if inner.state.is_open() {
            inner.rejected_calls += 1;
            return Err(JobError::CircuitOpen(self.operation_type.clone()));
        }
        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        let before = inner.state;
        inner.state = before.on_success(&self.config);
        inner.total_successes += 1;
        if matches!(before, BreakerState::HalfOpen { .. })
            && matches!(inner.state, BreakerState::Closed { .. })
        {
            info!("✅ Circuit for '{}' closed after successful probes", self.operation_type);
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let before = inner.state;
        inner.state = before.on_failure(&self.config, Instant::now());
        inner.total_failures += 1;
        inner.last_failure_at = Some(Utc::now());
        if !before.is_open() && inner.state.is_open() {
            warn!(
                "⚠️ Circuit for '{}' opened after {} consecutive failures",
                self.operation_type,
                inner.state.consecutive_failures()
            );
        }
    }

    /// Run `operation` through the breaker.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, JobError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        self.try_acquire()?;
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock();
        inner.state = inner.state.poll(&self.config, Instant::now());
        let half_open_successes = match inner.state {
            BreakerState::HalfOpen { successes } => successes,
            _ => 0,
        };
        BreakerSnapshot {
            operation_type: self.operation_type.clone(),
            state: inner.state.kind(),
            consecutive_failures: inner.state.consecutive_failures(),
            half_open_successes,
            last_failure_at: inner.last_failure_at,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_successes: 2,
        }
    }

    #[test]
    fn test_opens_exactly_at_threshold() {
        let cfg = config();
        let now = Instant::now();
        let mut state = BreakerState::default();
        for _ in 0..4 {
            state = state.on_failure(&cfg, now);
        }
        assert_eq!(state, BreakerState::Closed { failures: 4 });

        state = state.on_failure(&cfg, now);
        assert!(state.is_open());
    }

    #[test]
    fn test_success_resets_failures_while_closed() {
        let cfg = config();
        let now = Instant::now();
        let state = BreakerState::default()
            .on_failure(&cfg, now)
            .on_failure(&cfg, now)
            .on_success(&cfg);
        assert_eq!(state, BreakerState::Closed { failures: 0 });
    }

    #[test]
    fn test_half_open_after_reset_timeout_only() {
        let cfg = config();
        let opened = Instant::now();
        let state = BreakerState::Open { since: opened, failures: 5 };

        assert!(state.poll(&cfg, opened + Duration::from_secs(59)).is_open());
        assert_eq!(
            state.poll(&cfg, opened + Duration::from_secs(60)),
            BreakerState::HalfOpen { successes: 0 }
        );
    }

    #[test]
    fn test_half_open_needs_two_successes_and_reopens_on_failure() {
        let cfg = config();
        let now = Instant::now();
        let probing = BreakerState::HalfOpen { successes: 0 };

        let once = probing.on_success(&cfg);
        assert_eq!(once, BreakerState::HalfOpen { successes: 1 });
        assert_eq!(once.on_success(&cfg), BreakerState::Closed { failures: 0 });

        let reopened = once.on_failure(&cfg, now);
        assert!(reopened.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_never_invokes_operation() {
        let breaker = CircuitBreaker::new("price_refresh", config());
        let calls = AtomicU32::new(0);

        for _ in 0..5 {
            let _: Result<(), _> = breaker
                .execute(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(JobError::operation("connection refused")) }
                })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        let result: Result<(), _> = breaker
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert_eq!(result, Err(JobError::CircuitOpen("price_refresh".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        tokio::time::advance(Duration::from_secs(60)).await;
        for _ in 0..2 {
            breaker.execute(|| async { Ok::<_, JobError>(()) }).await.unwrap();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.rejected_calls, 1);
        assert_eq!(snapshot.total_failures, 5);
        assert_eq!(snapshot.total_successes, 2);
        assert!(snapshot.last_failure_at.is_some());
    }
}
