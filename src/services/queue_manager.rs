//! Priority queue manager.
//!
//! Work items wait in three FIFO lanes (high, normal, low). A periodic drain
//! tick moves items into the running set while concurrency slots are free;
//! each execution races a timeout against the operation wrapped in the
//! operation type's circuit breaker and the item's retry policy. Failed
//! items may be requeued at the head of their lane after a backoff; items
//! waiting out a backoff sit in a deferred list until their release instant.
//!
//! All lane, running-set and history state lives in a single
//! `Mutex<QueueState>` that is never held across an await.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::errors::JobError;
use crate::models::{ExecutionHistoryEntry, JobResult, Priority, WorkItemId, WorkState};
use crate::services::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::services::retry::{with_retry, RetryOverrides, RetryPolicy, RetryPredicate};

pub type OperationFuture = BoxFuture<'static, Result<JobResult, JobError>>;
pub type Operation = Arc<dyn Fn() -> OperationFuture + Send + Sync>;

/// Wrap an async closure as a re-invocable [`Operation`].
pub fn operation<F, Fut>(f: F) -> Operation
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JobResult, JobError>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Callbacks for the lifecycle of a single work item.
#[async_trait]
pub trait WorkObserver: Send + Sync {
    /// An attempt is about to run.
    async fn on_started(&self, _item: &WorkItemInfo) {}

    /// The item reached a terminal outcome.
    async fn on_finished(&self, _entry: &ExecutionHistoryEntry, _result: &Result<JobResult, JobError>) {}

    /// The item failed transiently and will re-enter its lane after `delay`.
    fn on_requeued(&self, _item: &WorkItemInfo, _error: &JobError, _delay: Duration) {}

    /// The item was removed before it ran.
    fn on_cancelled(&self, _item: &WorkItemInfo) {}
}

/// Request to enqueue work. `name` and `operation` are required.
#[derive(Default)]
pub struct WorkSpec {
    pub name: String,
    pub operation_type: String,
    pub operation: Option<Operation>,
    pub priority: Option<Priority>,
    pub timeout: Option<Duration>,
    pub max_attempts: Option<u32>,
    pub retry: RetryOverrides,
    pub retry_if: Option<RetryPredicate>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub observer: Option<Arc<dyn WorkObserver>>,
}

impl WorkSpec {
    pub fn new(name: impl Into<String>, operation_type: impl Into<String>, operation: Operation) -> Self {
        Self {
            name: name.into(),
            operation_type: operation_type.into(),
            operation: Some(operation),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_retry(mut self, retry: RetryOverrides) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&JobError) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn WorkObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

#[derive(Clone)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub name: String,
    pub operation_type: String,
    pub priority: Priority,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_policy: RetryPolicy,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub queued_at: DateTime<Utc>,
    pub attempts: u32,
    pub state: WorkState,
    pub last_error: Option<String>,
    operation: Operation,
    observer: Option<Arc<dyn WorkObserver>>,
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("operation_type", &self.operation_type)
            .field("priority", &self.priority)
            .field("attempts", &self.attempts)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl WorkItem {
    pub fn info(&self) -> WorkItemInfo {
        WorkItemInfo {
            id: self.id,
            name: self.name.clone(),
            operation_type: self.operation_type.clone(),
            priority: self.priority,
            state: self.state,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            timeout_ms: self.timeout.as_millis() as u64,
            queued_at: self.queued_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// Serializable projection of a work item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkItemInfo {
    pub id: WorkItemId,
    pub name: String,
    pub operation_type: String,
    pub priority: Priority,
    pub state: WorkState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub timeout_ms: u64,
    pub queued_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LaneCounts {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistorySummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Percentage of successful entries in the history window
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    pub queued: LaneCounts,
    pub deferred: usize,
    pub total_pending: usize,
    pub running: usize,
    pub max_concurrent_jobs: usize,
    pub max_queue_size: usize,
    pub is_processing: bool,
    pub history: HistorySummary,
    pub circuit_breakers: Vec<BreakerSnapshot>,
}

struct DeferredItem {
    release_at: Instant,
    item: WorkItem,
}

struct RunningEntry {
    /// Distinguishes successive runs of the same item
    run: u64,
    item: WorkItem,
}

#[derive(Default)]
struct QueueState {
    lanes: [VecDeque<WorkItem>; 3],
    running: HashMap<WorkItemId, RunningEntry>,
    deferred: Vec<DeferredItem>,
    history: VecDeque<ExecutionHistoryEntry>,
    next_run: u64,
}

impl QueueState {
    fn queued_count(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    fn pending_count(&self) -> usize {
        self.queued_count() + self.deferred.len()
    }

    /// Move every deferred item whose release instant has passed to the head
    /// of its lane; the earliest released ends up first.
    fn release_deferred(&mut self, now: Instant) {
        if self.deferred.is_empty() {
            return;
        }
        let (mut ready, waiting): (Vec<_>, Vec<_>) =
            self.deferred.drain(..).partition(|d| d.release_at <= now);
        self.deferred = waiting;
        ready.sort_by(|a, b| b.release_at.cmp(&a.release_at));
        for deferred in ready {
            let mut item = deferred.item;
            item.state = WorkState::Queued;
            debug!("Requeued {} ({}) at head of {} lane", item.name, item.id, item.priority);
            self.lanes[item.priority.index()].push_front(item);
        }
    }

    fn next_lane(&self) -> Option<usize> {
        Priority::ALL
            .iter()
            .map(|p| p.index())
            .find(|&idx| !self.lanes[idx].is_empty())
    }

    fn push_history(&mut self, entry: ExecutionHistoryEntry, limit: usize) {
        self.history.push_back(entry);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }
}

pub struct QueueManager {
    config: QueueConfig,
    state: Mutex<QueueState>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    shutdown: watch::Sender<bool>,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl QueueManager {
    pub fn new(config: QueueConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            breakers: DashMap::new(),
            shutdown,
            drain_task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Validate and append a work item to the tail of its priority lane.
    pub fn enqueue(&self, spec: WorkSpec) -> Result<WorkItemId, JobError> {
        if spec.name.trim().is_empty() {
            return Err(JobError::Validation("Job name is required".to_string()));
        }
        let Some(operation) = spec.operation else {
            return Err(JobError::Validation(format!("Job '{}' has no operation", spec.name)));
        };

        let profile = self.config.profile(&spec.operation_type);
        let mut retry_policy = profile.retry.merge(&spec.retry).apply(RetryPolicy::default());
        if let Some(predicate) = spec.retry_if {
            retry_policy.retry_if = predicate;
        }

        let item = WorkItem {
            id: WorkItemId::new(),
            name: spec.name,
            operation_type: spec.operation_type,
            priority: spec.priority.unwrap_or_default(),
            timeout: spec.timeout.unwrap_or(self.config.default_timeout),
            max_attempts: spec.max_attempts.unwrap_or(3).max(1),
            retry_policy,
            metadata: spec.metadata,
            queued_at: Utc::now(),
            attempts: 0,
            state: WorkState::Queued,
            last_error: None,
            operation,
            observer: spec.observer,
        };

        let mut state = self.state.lock();
        let pending = state.pending_count();
        if pending >= self.config.max_queue_size {
            warn!(
                "⚠️ Rejected job {}: queue full ({}/{})",
                item.name, pending, self.config.max_queue_size
            );
            return Err(JobError::QueueFull {
                max_size: self.config.max_queue_size,
            });
        }

        let id = item.id;
        info!(
            "📥 Queued job: {} ({}) [priority: {}, pending: {}]",
            item.name,
            id,
            item.priority,
            pending + 1
        );
        state.lanes[item.priority.index()].push_back(item);
        Ok(id)
    }

    /// Remove a queued or deferred item. Running items cannot be cancelled.
    pub fn cancel_job(&self, id: WorkItemId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            if state.running.contains_key(&id) {
                debug!("Cannot cancel running job {}", id);
                return false;
            }
            let mut removed = None;
            for lane in state.lanes.iter_mut() {
                if let Some(pos) = lane.iter().position(|item| item.id == id) {
                    removed = lane.remove(pos);
                    break;
                }
            }
            if removed.is_none() {
                if let Some(pos) = state.deferred.iter().position(|d| d.item.id == id) {
                    removed = Some(state.deferred.remove(pos).item);
                }
            }
            removed
        };

        match removed {
            Some(item) => {
                info!("🗑️ Cancelled job: {} ({})", item.name, id);
                if let Some(observer) = &item.observer {
                    observer.on_cancelled(&item.info());
                }
                true
            }
            None => false,
        }
    }

    /// Circuit breaker shared by every item of `operation_type`.
    pub fn breaker(&self, operation_type: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(operation_type.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(operation_type, self.config.breaker)))
            .clone()
    }

    /// One drain tick: release due deferred items, then start queued items
    /// in priority order while concurrency slots are free.
    pub fn process_queue(self: &Arc<Self>) {
        let mut started = Vec::new();
        let mut deferred_notice = None;
        {
            let mut state = self.state.lock();
            state.release_deferred(Instant::now());

            while state.running.len() < self.config.max_concurrent_jobs {
                let Some(lane) = state.next_lane() else {
                    break;
                };
                let Some(mut item) = state.lanes[lane].pop_front() else {
                    break;
                };

                if self.breaker(&item.operation_type).is_open() {
                    let delay = self.config.circuit_open_requeue_delay;
                    info!(
                        "⏸️ Circuit open for '{}', deferring {} ({}) by {:?}",
                        item.operation_type, item.name, item.id, delay
                    );
                    if let Some(observer) = item.observer.clone() {
                        deferred_notice = Some((observer, item.info(), delay));
                    }
                    state.deferred.push(DeferredItem {
                        release_at: Instant::now() + delay,
                        item,
                    });
                    break;
                }

                item.state = WorkState::Running;
                item.attempts += 1;
                let run = state.next_run;
                state.next_run += 1;
                state.running.insert(item.id, RunningEntry { run, item: item.clone() });
                started.push((item, run));
            }
        }

        // Observers may take their own locks, so notify outside ours.
        if let Some((observer, info, delay)) = deferred_notice {
            observer.on_requeued(&info, &JobError::CircuitOpen(info.operation_type.clone()), delay);
        }

        for (item, run) in started {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                manager.execute_job(item, run).await;
            });
        }
    }

    async fn execute_job(self: Arc<Self>, mut item: WorkItem, run: u64) {
        let _slot = RunningSlot {
            manager: Arc::clone(&self),
            id: item.id,
            run,
        };
        let started_at = Utc::now();
        info!(
            "🏃 Starting job: {} ({}) [attempt {}/{}]",
            item.name, item.id, item.attempts, item.max_attempts
        );
        if let Some(observer) = &item.observer {
            observer.on_started(&item.info()).await;
        }

        let breaker = self.breaker(&item.operation_type);
        let operation = Arc::clone(&item.operation);
        let policy = item.retry_policy.clone();
        let guarded = breaker.execute(|| async move {
            with_retry(&policy, || {
                let operation = Arc::clone(&operation);
                // A panicking operation fails its attempt like any other error.
                AssertUnwindSafe(async move { operation().await })
                    .catch_unwind()
                    .map(|outcome| outcome.unwrap_or_else(|payload| Err(panic_error(payload.as_ref()))))
            })
            .await
        });

        let result = match tokio::time::timeout(item.timeout, guarded).await {
            Ok(result) => result,
            Err(_) => {
                breaker.record_failure();
                Err(JobError::Timeout(item.timeout))
            }
        };
        let completed_at = Utc::now();

        match result {
            Ok(job_result) => {
                item.state = WorkState::Completed;
                let entry = self.finish(&item, true, None, started_at, completed_at);
                info!(
                    "✅ Job completed: {} (processed: {}, failed: {}, duration: {}ms)",
                    item.name, job_result.items_processed, job_result.items_failed, entry.duration_ms
                );
                if let Some(observer) = &item.observer {
                    observer.on_finished(&entry, &Ok(job_result)).await;
                }
            }
            Err(JobError::CircuitOpen(operation_type)) => {
                // The operation never ran, so the attempt does not count.
                item.attempts = item.attempts.saturating_sub(1);
                let delay = self.config.circuit_open_requeue_delay;
                let error = JobError::CircuitOpen(operation_type);
                info!("⏸️ Circuit opened before {} ({}) ran, deferring by {:?}", item.name, item.id, delay);
                self.requeue(item, &error, delay);
            }
            Err(error) => {
                item.last_error = Some(error.to_string());
                if item.attempts < item.max_attempts && error.is_retryable() {
                    let delay = self.requeue_delay(item.attempts);
                    warn!(
                        "⚠️ Job {} ({}) failed on attempt {}/{}: {}. Requeueing in {:?}",
                        item.name, item.id, item.attempts, item.max_attempts, error, delay
                    );
                    self.requeue(item, &error, delay);
                } else {
                    item.state = WorkState::Failed;
                    let entry = self.finish(&item, false, Some(error.to_string()), started_at, completed_at);
                    error!(
                        "❌ Job failed: {} ({}) after {} attempt(s) - {}",
                        item.name, item.id, item.attempts, error
                    );
                    if let Some(observer) = &item.observer {
                        observer.on_finished(&entry, &Err(error)).await;
                    }
                }
            }
        }
    }

    /// Job-level backoff: min(base * 2^(attempts-1), max).
    fn requeue_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let delay = self.config.requeue_base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.config.requeue_max_delay)
    }

    fn requeue(&self, mut item: WorkItem, error: &JobError, delay: Duration) {
        item.state = WorkState::Queued;
        if let Some(observer) = &item.observer {
            observer.on_requeued(&item.info(), error, delay);
        }
        let mut state = self.state.lock();
        state.running.remove(&item.id);
        state.deferred.push(DeferredItem {
            release_at: Instant::now() + delay,
            item,
        });
    }

    fn finish(
        &self,
        item: &WorkItem,
        success: bool,
        error: Option<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> ExecutionHistoryEntry {
        let entry = ExecutionHistoryEntry {
            id: item.id,
            name: item.name.clone(),
            operation_type: item.operation_type.clone(),
            priority: item.priority,
            success,
            attempts: item.attempts,
            queued_at: item.queued_at,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds(),
            error,
            metadata: item.metadata.clone(),
        };
        let mut state = self.state.lock();
        state.running.remove(&item.id);
        state.push_history(entry.clone(), self.config.history_limit);
        entry
    }

    /// Start the periodic drain loop. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.drain_task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        self.shutdown.send_replace(false);
        let mut shutdown = self.shutdown.subscribe();
        let manager = Arc::clone(self);
        let interval = self.config.drain_interval;

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.process_queue(),
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Queue drain loop stopped");
        }));
        info!(
            "🚀 Queue manager started (max concurrent: {}, max queue size: {})",
            self.config.max_concurrent_jobs, self.config.max_queue_size
        );
    }

    /// Stop the drain loop. Queued and running work is left alone.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let task = self.drain_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Queue drain loop ended abnormally: {}", e);
            }
            info!("🛑 Queue manager stopped");
        }
    }

    pub fn is_processing(&self) -> bool {
        self.drain_task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        let (queued, deferred, running, history) = {
            let state = self.state.lock();
            let queued = LaneCounts {
                high: state.lanes[Priority::High.index()].len(),
                normal: state.lanes[Priority::Normal.index()].len(),
                low: state.lanes[Priority::Low.index()].len(),
            };
            let succeeded = state.history.iter().filter(|e| e.success).count();
            let total = state.history.len();
            let history = HistorySummary {
                total,
                succeeded,
                failed: total - succeeded,
                success_rate: if total == 0 {
                    0.0
                } else {
                    succeeded as f64 / total as f64 * 100.0
                },
            };
            (queued, state.deferred.len(), state.running.len(), history)
        };

        let mut circuit_breakers: Vec<BreakerSnapshot> =
            self.breakers.iter().map(|entry| entry.value().snapshot()).collect();
        circuit_breakers.sort_by(|a, b| a.operation_type.cmp(&b.operation_type));

        QueueStats {
            total_pending: queued.high + queued.normal + queued.low + deferred,
            queued,
            deferred,
            running,
            max_concurrent_jobs: self.config.max_concurrent_jobs,
            max_queue_size: self.config.max_queue_size,
            is_processing: self.is_processing(),
            history,
            circuit_breakers,
        }
    }

    /// Most recent history entries first.
    pub fn get_execution_history(&self, limit: usize) -> Vec<ExecutionHistoryEntry> {
        let state = self.state.lock();
        state.history.iter().rev().take(limit).cloned().collect()
    }

    /// Queued items in drain order, followed by deferred ones.
    pub fn pending_items(&self) -> Vec<WorkItemInfo> {
        let state = self.state.lock();
        state
            .lanes
            .iter()
            .flat_map(|lane| lane.iter().map(WorkItem::info))
            .chain(state.deferred.iter().map(|d| d.item.info()))
            .collect()
    }

    pub fn running_items(&self) -> Vec<WorkItemInfo> {
        let state = self.state.lock();
        state.running.values().map(|entry| entry.item.info()).collect()
    }
}

/// Releases the concurrency slot when an execution ends, however it ends.
struct RunningSlot {
    manager: Arc<QueueManager>,
    id: WorkItemId,
    run: u64,
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        let mut state = self.manager.state.lock();
        if state.running.get(&self.id).is_some_and(|entry| entry.run == self.run) {
            state.running.remove(&self.id);
        }
    }
}

fn panic_error(payload: &(dyn Any + Send)) -> JobError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    error!("💥 Operation panicked: {}", message);
    JobError::Operation(format!("Operation panicked: {}", message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn quick_config() -> QueueConfig {
        QueueConfig {
            max_concurrent_jobs: 1,
            max_queue_size: 10,
            default_timeout: Duration::from_secs(30),
            drain_interval: Duration::from_millis(100),
            requeue_base_delay: Duration::from_millis(1000),
            ..QueueConfig::default()
        }
    }

    fn no_inner_retry() -> RetryOverrides {
        RetryOverrides {
            max_attempts: Some(1),
            ..Default::default()
        }
    }

    fn succeed() -> Operation {
        operation(|| async { Ok(JobResult::new(1, 0)) })
    }

    fn always_fail(message: &'static str, calls: Arc<AtomicU32>) -> Operation {
        operation(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(JobError::operation(message)) }
        })
    }

    async fn settle(manager: &Arc<QueueManager>, ticks: usize) {
        for _ in 0..ticks {
            manager.process_queue();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[test]
    fn test_enqueue_requires_name_and_operation() {
        let manager = QueueManager::new(quick_config());

        let missing_op = WorkSpec {
            name: "refresh_prices".into(),
            ..Default::default()
        };
        assert!(matches!(manager.enqueue(missing_op), Err(JobError::Validation(_))));

        let missing_name = WorkSpec::new("  ", "price_refresh", succeed());
        assert!(matches!(manager.enqueue(missing_name), Err(JobError::Validation(_))));
    }

    #[test]
    fn test_enqueue_applies_defaults() {
        let manager = QueueManager::new(quick_config());
        manager.enqueue(WorkSpec::new("job", "custom", succeed())).unwrap();

        let items = manager.pending_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].priority, Priority::Normal);
        assert_eq!(items[0].max_attempts, 3);
        assert_eq!(items[0].timeout_ms, 30_000);
        assert_eq!(items[0].state, WorkState::Queued);
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let manager = QueueManager::new(QueueConfig {
            max_queue_size: 3,
            ..quick_config()
        });
        for i in 0..3 {
            manager.enqueue(WorkSpec::new(format!("job-{}", i), "custom", succeed())).unwrap();
        }

        let result = manager.enqueue(WorkSpec::new("overflow", "custom", succeed()));
        assert_eq!(result, Err(JobError::QueueFull { max_size: 3 }));

        let stats = manager.get_queue_stats();
        assert_eq!(stats.total_pending, 3);
        assert_eq!(stats.queued.normal, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_in_strict_priority_order() {
        let manager = Arc::new(QueueManager::new(quick_config()));
        let order = Arc::new(Mutex::new(Vec::new()));

        for (name, priority) in [("A", Priority::High), ("B", Priority::Normal), ("C", Priority::Low)] {
            let order = order.clone();
            let op = operation(move || {
                order.lock().push(name);
                async { Ok(JobResult::default()) }
            });
            manager.enqueue(WorkSpec::new(name, "custom", op).with_priority(priority)).unwrap();
        }
        settle(&manager, 5).await;

        assert_eq!(*order.lock(), vec!["A", "B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_never_jumps_ahead_of_higher_lanes() {
        let manager = Arc::new(QueueManager::new(quick_config()));
        let order = Arc::new(Mutex::new(Vec::new()));

        for (name, priority) in [("low", Priority::Low), ("normal", Priority::Normal), ("high", Priority::High)] {
            let order = order.clone();
            let op = operation(move || {
                order.lock().push(name);
                async { Ok(JobResult::default()) }
            });
            manager.enqueue(WorkSpec::new(name, "custom", op).with_priority(priority)).unwrap();
        }
        settle(&manager, 5).await;

        assert_eq!(*order.lock(), vec!["high", "normal", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_count_never_exceeds_cap() {
        let manager = Arc::new(QueueManager::new(QueueConfig {
            max_concurrent_jobs: 2,
            ..quick_config()
        }));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..6 {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            let op = operation(move || {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(250)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(JobResult::default())
                }
            });
            manager.enqueue(WorkSpec::new(format!("job-{}", i), "custom", op)).unwrap();
        }

        for _ in 0..20 {
            manager.process_queue();
            assert!(manager.get_queue_stats().running <= 2);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(manager.get_execution_history(10).len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_requeues_until_attempts_exhausted() {
        let manager = Arc::new(QueueManager::new(quick_config()));
        let calls = Arc::new(AtomicU32::new(0));

        manager
            .enqueue(
                WorkSpec::new("nav_update", "custom", always_fail("Network timeout", calls.clone()))
                    .with_max_attempts(2)
                    .with_retry(no_inner_retry()),
            )
            .unwrap();

        settle(&manager, 30).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let history = manager.get_execution_history(10);
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert_eq!(history[0].attempts, 2);
        assert!(history[0].error.as_deref().unwrap().contains("timeout"));
        assert_eq!(manager.get_queue_stats().total_pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_requeued() {
        let manager = Arc::new(QueueManager::new(quick_config()));
        let calls = Arc::new(AtomicU32::new(0));

        manager
            .enqueue(WorkSpec::new("epf_sync", "custom", always_fail("Invalid credentials", calls.clone())))
            .unwrap();

        settle(&manager, 30).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let history = manager.get_execution_history(10);
        assert_eq!(history[0].attempts, 1);
        assert!(!history[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retried_item_runs_before_later_arrivals_of_same_priority() {
        let manager = Arc::new(QueueManager::new(quick_config()));
        let order = Arc::new(Mutex::new(Vec::new()));

        let attempts = Arc::new(AtomicU32::new(0));
        let recorded = order.clone();
        let flaky = operation(move || {
            recorded.lock().push("A");
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(JobError::operation("Network timeout"))
                } else {
                    Ok(JobResult::default())
                }
            }
        });
        manager
            .enqueue(
                WorkSpec::new("A", "custom", flaky)
                    .with_max_attempts(2)
                    .with_retry(no_inner_retry()),
            )
            .unwrap();
        settle(&manager, 1).await;
        assert_eq!(manager.get_queue_stats().deferred, 1);

        // B holds the only slot while A's backoff expires, then C queues behind A.
        let recorded = order.clone();
        let slow = operation(move || {
            recorded.lock().push("B");
            async {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                Ok(JobResult::default())
            }
        });
        let recorded = order.clone();
        let quick = operation(move || {
            recorded.lock().push("C");
            async { Ok(JobResult::default()) }
        });
        manager.enqueue(WorkSpec::new("B", "custom", slow)).unwrap();
        manager.enqueue(WorkSpec::new("C", "custom", quick)).unwrap();

        settle(&manager, 40).await;

        assert_eq!(*order.lock(), vec!["A", "B", "A", "C"]);
        assert_eq!(manager.get_execution_history(10).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_operation_fails_like_any_error() {
        let manager = Arc::new(QueueManager::new(quick_config()));
        let op = operation(|| async {
            if true {
                panic!("provider client poisoned");
            }
            Ok(JobResult::default())
        });
        manager.enqueue(WorkSpec::new("broken", "custom", op)).unwrap();

        settle(&manager, 10).await;

        let history = manager.get_execution_history(10);
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert_eq!(history[0].attempts, 1);
        assert!(history[0].error.as_deref().unwrap().contains("panicked"));
        assert!(history[0].error.as_deref().unwrap().contains("provider client poisoned"));

        let stats = manager.get_queue_stats();
        assert_eq!(stats.running, 0);
        assert_eq!(stats.total_pending, 0);
        assert_eq!(manager.breaker("custom").snapshot().total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_without_requeue() {
        let manager = Arc::new(QueueManager::new(quick_config()));
        let op = operation(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(JobResult::default())
        });
        manager
            .enqueue(WorkSpec::new("slow", "custom", op).with_timeout(Duration::from_millis(500)))
            .unwrap();

        settle(&manager, 20).await;

        let history = manager.get_execution_history(1);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].attempts, 1);
        assert!(history[0].error.as_deref().unwrap().contains("time limit"));
        assert_eq!(manager.breaker("custom").snapshot().total_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_queued_and_running() {
        let manager = Arc::new(QueueManager::new(quick_config()));
        let slow = operation(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(JobResult::new(1, 0))
        });
        let running_id = manager.enqueue(WorkSpec::new("running", "custom", slow)).unwrap();
        let queued_id = manager.enqueue(WorkSpec::new("queued", "custom", succeed())).unwrap();

        manager.process_queue();
        tokio::task::yield_now().await;

        assert!(manager.cancel_job(queued_id));
        assert!(!manager.cancel_job(queued_id));
        assert!(!manager.cancel_job(running_id));
        assert!(manager.pending_items().is_empty());

        settle(&manager, 10).await;

        let history = manager.get_execution_history(10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, running_id);
        assert!(history[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_most_recent_first_and_bounded_by_limit() {
        let manager = Arc::new(QueueManager::new(quick_config()));
        for i in 0..4 {
            manager.enqueue(WorkSpec::new(format!("job-{}", i), "custom", succeed())).unwrap();
        }
        settle(&manager, 8).await;

        let history = manager.get_execution_history(2);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].name, "job-3");
        assert_eq!(history[1].name, "job-2");
        assert_eq!(manager.get_execution_history(100).len(), 4);
        for entry in manager.get_execution_history(100) {
            assert_eq!(entry.duration_ms, (entry.completed_at - entry.started_at).num_milliseconds());
        }

        let stats = manager.get_queue_stats();
        assert_eq!(stats.history.total, 4);
        assert_eq!(stats.history.success_rate, 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_defers_instead_of_running() {
        let manager = Arc::new(QueueManager::new(QueueConfig {
            circuit_open_requeue_delay: Duration::from_secs(5),
            ..quick_config()
        }));
        let breaker = manager.breaker("price_refresh");
        for _ in 0..manager.config().breaker.failure_threshold {
            breaker.record_failure();
        }

        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let op = operation(move || {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Ok(JobResult::default()) }
        });
        manager.enqueue(WorkSpec::new("refresh_prices", "price_refresh", op)).unwrap();

        settle(&manager, 3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let stats = manager.get_queue_stats();
        assert_eq!(stats.deferred + stats.queued.normal, 1);
        assert!(manager.get_execution_history(10).is_empty());

        // Once the reset timeout passes the probe goes through.
        tokio::time::advance(manager.config().breaker.reset_timeout).await;
        settle(&manager, 60).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(manager.get_execution_history(1)[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_loop_start_and_stop() {
        let manager = Arc::new(QueueManager::new(quick_config()));
        manager.start();
        manager.start();
        assert!(manager.is_processing());

        manager.enqueue(WorkSpec::new("job", "custom", succeed())).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.get_execution_history(1).len(), 1);

        manager.stop().await;
        assert!(!manager.is_processing());

        manager.enqueue(WorkSpec::new("after-stop", "custom", succeed())).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.get_queue_stats().total_pending, 1);
    }
}
