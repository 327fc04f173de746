use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::Priority;
use crate::services::circuit_breaker::BreakerConfig;
use crate::services::retry::RetryOverrides;

/// Per operation-type defaults applied to every work item of that type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationProfile {
    pub priority: Priority,
    pub timeout: Duration,
    /// Job-level attempts (requeues included)
    pub max_attempts: u32,
    /// Inner `with_retry` settings
    pub retry: RetryOverrides,
}

impl OperationProfile {
    pub fn new(priority: Priority, timeout: Duration) -> Self {
        Self {
            priority,
            timeout,
            max_attempts: 3,
            retry: RetryOverrides::default(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry(mut self, retry: RetryOverrides) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_concurrent_jobs: usize,
    pub max_queue_size: usize,
    pub default_timeout: Duration,
    pub drain_interval: Duration,
    pub history_limit: usize,
    /// Delay before an item deferred by an open circuit re-enters its lane
    pub circuit_open_requeue_delay: Duration,
    /// Job-level requeue backoff: min(base * 2^(attempts-1), max)
    pub requeue_base_delay: Duration,
    pub requeue_max_delay: Duration,
    pub breaker: BreakerConfig,
    pub profiles: HashMap<String, OperationProfile>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            max_queue_size: 100,
            default_timeout: Duration::from_secs(300),
            drain_interval: Duration::from_millis(1000),
            history_limit: 1000,
            circuit_open_requeue_delay: Duration::from_millis(5000),
            requeue_base_delay: Duration::from_millis(1000),
            requeue_max_delay: Duration::from_millis(30_000),
            breaker: BreakerConfig::default(),
            profiles: default_profiles(),
        }
    }
}

impl QueueConfig {
    /// Profile for an operation type, falling back to normal priority and
    /// the default timeout.
    pub fn profile(&self, operation_type: &str) -> OperationProfile {
        self.profiles
            .get(operation_type)
            .cloned()
            .unwrap_or_else(|| OperationProfile::new(Priority::Normal, self.default_timeout))
    }

    pub fn with_profile(mut self, operation_type: impl Into<String>, profile: OperationProfile) -> Self {
        self.profiles.insert(operation_type.into(), profile);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_jobs == 0 {
            return Err("JOB_MAX_CONCURRENT must be at least 1".to_string());
        }
        if self.max_queue_size == 0 {
            return Err("JOB_MAX_QUEUE_SIZE must be at least 1".to_string());
        }
        if self.breaker.failure_threshold == 0 {
            return Err("JOB_BREAKER_THRESHOLD must be at least 1".to_string());
        }
        if self.drain_interval.is_zero() {
            return Err("JOB_DRAIN_INTERVAL_MS must be positive".to_string());
        }
        Ok(())
    }
}

fn default_profiles() -> HashMap<String, OperationProfile> {
    let mut profiles = HashMap::new();
    profiles.insert(
        "price_refresh".to_string(),
        OperationProfile::new(Priority::High, Duration::from_secs(300)).with_retry(RetryOverrides {
            base_delay_ms: Some(2000),
            ..Default::default()
        }),
    );
    profiles.insert(
        "news_fetch".to_string(),
        OperationProfile::new(Priority::Normal, Duration::from_secs(120)),
    );
    profiles.insert(
        "portfolio_analytics".to_string(),
        OperationProfile::new(Priority::Normal, Duration::from_secs(600))
            .with_max_attempts(2)
            .with_retry(RetryOverrides {
                max_attempts: Some(2),
                base_delay_ms: Some(5000),
                max_delay_ms: Some(60_000),
                ..Default::default()
            }),
    );
    profiles.insert(
        "maintenance".to_string(),
        OperationProfile::new(Priority::Low, Duration::from_secs(1800))
            .with_max_attempts(1)
            .with_retry(RetryOverrides {
                max_attempts: Some(1),
                ..Default::default()
            }),
    );
    profiles
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub default_timezone: String,
    /// Runs left `running` for longer than this are failed at startup
    pub stuck_job_hours: i64,
    /// Fire every armed job once a minute, regardless of its schedule
    pub test_mode: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timezone: "UTC".to_string(),
            stuck_job_hours: 2,
            test_mode: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = QueueConfig::default();
        let queue = QueueConfig {
            max_concurrent_jobs: env_or("JOB_MAX_CONCURRENT", defaults.max_concurrent_jobs),
            max_queue_size: env_or("JOB_MAX_QUEUE_SIZE", defaults.max_queue_size),
            default_timeout: Duration::from_secs(env_or("JOB_DEFAULT_TIMEOUT_SECS", 300)),
            drain_interval: Duration::from_millis(env_or("JOB_DRAIN_INTERVAL_MS", 1000)),
            history_limit: env_or("JOB_HISTORY_LIMIT", defaults.history_limit),
            circuit_open_requeue_delay: Duration::from_millis(env_or("JOB_CIRCUIT_REQUEUE_MS", 5000)),
            breaker: BreakerConfig {
                failure_threshold: env_or("JOB_BREAKER_THRESHOLD", defaults.breaker.failure_threshold),
                reset_timeout: Duration::from_secs(env_or("JOB_BREAKER_RESET_SECS", 60)),
                ..defaults.breaker
            },
            ..defaults
        };

        let scheduler = SchedulerConfig {
            default_timezone: std::env::var("JOB_DEFAULT_TIMEZONE").unwrap_or_else(|_| "UTC".to_string()),
            stuck_job_hours: env_or("JOB_STUCK_HOURS", 2),
            test_mode: env_or("JOB_SCHEDULER_TEST_MODE", false),
        };

        Self { queue, scheduler }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.queue.validate()?;
        if self.scheduler.default_timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(format!(
                "JOB_DEFAULT_TIMEZONE is not a valid IANA timezone: {}",
                self.scheduler.default_timezone
            ));
        }
        if self.scheduler.stuck_job_hours <= 0 {
            return Err("JOB_STUCK_HOURS must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = EngineConfig::default();
        config.queue.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_timezone_rejected() {
        let mut config = EngineConfig::default();
        config.scheduler.default_timezone = "Mars/Olympus_Mons".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_operation_type_gets_default_profile() {
        let config = QueueConfig::default();
        let profile = config.profile("something_new");
        assert_eq!(profile.priority, Priority::Normal);
        assert_eq!(profile.timeout, config.default_timeout);
        assert_eq!(profile.max_attempts, 3);

        assert_eq!(config.profile("price_refresh").priority, Priority::High);
        assert_eq!(config.profile("maintenance").priority, Priority::Low);
    }
}
