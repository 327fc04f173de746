use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::errors::{is_retryable_message, JobError};
use crate::models::{
    ExecutionHistoryEntry, JobDefinition, JobGate, JobResult, JobState, JobStatus, WorkItemId,
};
use crate::services::job_store::JobStore;
use crate::services::market_calendar::{MarketCalendar, WeekdayHoursCalendar};
use crate::services::operations::OperationRegistry;
use crate::services::queue_manager::{operation, QueueManager, QueueStats, WorkItemInfo, WorkObserver, WorkSpec};

/// Schedule every armed job runs on in test mode.
const TEST_MODE_SCHEDULE: &str = "0 * * * * *";

// Collaborators handed to the scheduler
#[derive(Clone)]
pub struct JobContext {
    pub operations: OperationRegistry,
    pub store: Option<Arc<dyn JobStore>>,
    pub calendar: Arc<dyn MarketCalendar>,
}

impl JobContext {
    pub fn new(operations: OperationRegistry) -> Self {
        Self {
            operations,
            store: None,
            calendar: Arc::new(WeekdayHoursCalendar::default()),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn MarketCalendar>) -> Self {
        self.calendar = calendar;
        self
    }
}

/// A registered job with its definition and status.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    #[serde(flatten)]
    pub definition: JobDefinition,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub is_running: bool,
    pub test_mode: bool,
    pub total_jobs: usize,
    pub enabled_jobs: usize,
    pub disabled_jobs: usize,
    pub armed_jobs: usize,
    pub queued_jobs: usize,
    pub failed_jobs: usize,
    pub jobs: Vec<JobStatus>,
    pub queue: QueueStats,
}

struct ScheduledJob {
    definition: JobDefinition,
    timezone: Tz,
    status: JobStatus,
    timer: Option<Uuid>,
}

impl ScheduledJob {
    /// State to settle in when no work item is outstanding.
    fn idle_state(&self) -> JobState {
        if !self.definition.enabled {
            JobState::Disabled
        } else if self.timer.is_some() {
            JobState::Running
        } else {
            JobState::Registered
        }
    }
}

/// State shared between the scheduler, its cron callbacks and the per-item
/// observers.
struct SchedulerShared {
    config: SchedulerConfig,
    jobs: RwLock<HashMap<String, ScheduledJob>>,
    context: JobContext,
    queue: Arc<QueueManager>,
}

pub struct JobSchedulerService {
    scheduler: JobScheduler,
    shared: Arc<SchedulerShared>,
    /// Serializes start, stop and enable/disable
    control: tokio::sync::Mutex<()>,
    running: AtomicBool,
    timers_started: AtomicBool,
}

impl JobSchedulerService {
    pub async fn new(
        config: SchedulerConfig,
        queue: Arc<QueueManager>,
        context: JobContext,
    ) -> Result<Self, JobError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| JobError::Scheduler(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler,
            shared: Arc::new(SchedulerShared {
                config,
                jobs: RwLock::new(HashMap::new()),
                context,
                queue,
            }),
            control: tokio::sync::Mutex::new(()),
            running: AtomicBool::new(false),
            timers_started: AtomicBool::new(false),
        })
    }

    pub fn queue(&self) -> &Arc<QueueManager> {
        &self.shared.queue
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Validate and register a job. Registration never arms a timer.
    pub fn register_job(&self, definition: JobDefinition) -> Result<(), JobError> {
        self.shared.register(definition)
    }

    /// Start all enabled jobs
    pub async fn start(&self) -> Result<(), JobError> {
        let _guard = self.control.lock().await;
        if self.is_running() {
            warn!("Job scheduler is already running");
            return Ok(());
        }
        info!("🚀 Starting job scheduler...");

        if self.shared.config.test_mode {
            info!("⚠️  JOB SCHEDULER IN TEST MODE - Jobs will run every minute!");
        }

        self.recover().await;
        self.shared.queue.start();

        if !self.timers_started.swap(true, Ordering::SeqCst) {
            self.scheduler.start().await?;
        }

        let mut names: Vec<String> = self
            .shared
            .jobs
            .read()
            .values()
            .filter(|job| job.definition.enabled)
            .map(|job| job.definition.name.clone())
            .collect();
        names.sort();

        let mut armed = 0;
        for name in names {
            match self.arm(&name).await {
                Ok(()) => armed += 1,
                Err(e) => {
                    error!("Failed to schedule job {}: {}", name, e);
                    self.shared.update_status(&name, |job| {
                        job.status.state = JobState::Failed;
                        job.status.last_error = Some(e.to_string());
                    });
                }
            }
        }

        self.running.store(true, Ordering::SeqCst);
        info!("✅ Job scheduler started successfully with {} jobs", armed);
        Ok(())
    }

    /// Disarm every timer and stop draining the queue. In-flight work is
    /// not interrupted.
    pub async fn stop(&self) -> Result<(), JobError> {
        let _guard = self.control.lock().await;
        info!("🛑 Stopping job scheduler...");

        let armed: Vec<String> = self
            .shared
            .jobs
            .read()
            .values()
            .filter(|job| job.timer.is_some())
            .map(|job| job.definition.name.clone())
            .collect();
        for name in armed {
            if let Err(e) = self.disarm(&name).await {
                warn!("Failed to disarm job {}: {}", name, e);
            }
        }

        self.shared.queue.stop().await;
        self.running.store(false, Ordering::SeqCst);
        info!("✅ Job scheduler stopped");
        Ok(())
    }

    /// Stop and release the underlying cron runtime. Not restartable.
    pub async fn shutdown(&self) -> Result<(), JobError> {
        self.stop().await?;
        if self.timers_started.swap(false, Ordering::SeqCst) {
            let mut scheduler = self.scheduler.clone();
            scheduler.shutdown().await?;
        }
        Ok(())
    }

    /// Enable or disable a job. Idempotent; the new flag is persisted when
    /// it changes.
    pub async fn set_job_enabled(&self, name: &str, enabled: bool) -> Result<(), JobError> {
        let _guard = self.control.lock().await;

        let (changed, definition) = {
            let mut jobs = self.shared.jobs.write();
            let job = jobs
                .get_mut(name)
                .ok_or_else(|| JobError::UnknownJob(name.to_string()))?;
            let changed = job.definition.enabled != enabled;
            job.definition.enabled = enabled;
            (changed, job.definition.clone())
        };

        if enabled {
            if self.is_running() {
                self.arm(name).await?;
            }
        } else {
            self.disarm(name).await?;
        }

        self.shared.update_status(name, |job| {
            if job.status.state != JobState::Queued {
                job.status.state = job.idle_state();
            }
            if !enabled {
                job.status.next_execution = None;
            }
        });

        if changed {
            if enabled {
                info!("▶️ Enabled job: {}", name);
            } else {
                info!("⏸️ Disabled job: {}", name);
            }
            if let Some(store) = &self.shared.context.store {
                if let Err(e) = store.save_job_configuration(name, &definition).await {
                    warn!("Failed to persist configuration for {}: {}", name, e);
                }
            }
        }
        Ok(())
    }

    /// Enqueue a job immediately, bypassing its schedule and gate.
    ///
    /// Returns `Ok(None)` when the queue is full; the rejection is recorded
    /// on the job's status.
    pub fn trigger_job(&self, name: &str) -> Result<Option<WorkItemId>, JobError> {
        if !self.shared.jobs.read().contains_key(name) {
            return Err(JobError::UnknownJob(name.to_string()));
        }
        info!("🔧 Manually triggering job: {}", name);
        queued_or_rejected(self.shared.enqueue_job(name, "manual"))
    }

    /// Cancel a queued work item. Running work cannot be cancelled.
    pub fn cancel_job(&self, id: WorkItemId) -> bool {
        self.shared.queue.cancel_job(id)
    }

    pub fn get_job_status(&self, name: &str) -> Option<JobStatus> {
        self.shared.jobs.read().get(name).map(|job| job.status.clone())
    }

    pub fn get_job(&self, name: &str) -> Option<JobSummary> {
        self.shared.jobs.read().get(name).map(|job| JobSummary {
            definition: job.definition.clone(),
            status: job.status.clone(),
        })
    }

    pub fn list_jobs(&self) -> Vec<JobSummary> {
        let mut jobs: Vec<JobSummary> = self
            .shared
            .jobs
            .read()
            .values()
            .map(|job| JobSummary {
                definition: job.definition.clone(),
                status: job.status.clone(),
            })
            .collect();
        jobs.sort_by(|a, b| a.definition.name.cmp(&b.definition.name));
        jobs
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        self.shared.queue.get_queue_stats()
    }

    pub fn get_execution_history(&self, limit: usize) -> Vec<ExecutionHistoryEntry> {
        self.shared.queue.get_execution_history(limit)
    }

    pub fn get_scheduler_stats(&self) -> SchedulerStats {
        let mut statuses: Vec<(bool, bool, JobStatus)> = self
            .shared
            .jobs
            .read()
            .values()
            .map(|job| (job.definition.enabled, job.timer.is_some(), job.status.clone()))
            .collect();
        statuses.sort_by(|a, b| a.2.name.cmp(&b.2.name));

        let enabled_jobs = statuses.iter().filter(|(enabled, _, _)| *enabled).count();
        let armed_jobs = statuses.iter().filter(|(_, armed, _)| *armed).count();
        let count_state = |state: JobState| statuses.iter().filter(|(_, _, s)| s.state == state).count();

        SchedulerStats {
            is_running: self.is_running(),
            test_mode: self.shared.config.test_mode,
            total_jobs: statuses.len(),
            enabled_jobs,
            disabled_jobs: statuses.len() - enabled_jobs,
            armed_jobs,
            queued_jobs: count_state(JobState::Queued),
            failed_jobs: count_state(JobState::Failed),
            jobs: statuses.into_iter().map(|(_, _, status)| status).collect(),
            queue: self.shared.queue.get_queue_stats(),
        }
    }

    /// Reconcile with the job store before any timer is armed.
    async fn recover(&self) {
        let Some(store) = self.shared.context.store.clone() else {
            debug!("No job store configured, using in-memory job definitions");
            return;
        };

        match store.mark_stuck_jobs_as_failed(self.shared.config.stuck_job_hours).await {
            Ok(0) => debug!("No stuck job runs found"),
            Ok(count) => warn!("⚠️ Marked {} stuck job runs as failed", count),
            Err(e) => warn!("Failed to reconcile stuck job runs: {}", e),
        }

        let persisted = match store.load_job_configurations().await {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!("Failed to load job configurations, using defaults: {}", e);
                return;
            }
        };

        let mut seen = HashSet::new();
        for definition in persisted {
            seen.insert(definition.name.clone());
            self.shared.apply_persisted(definition);
        }

        let missing: Vec<JobDefinition> = self
            .shared
            .jobs
            .read()
            .values()
            .filter(|job| !seen.contains(&job.definition.name))
            .map(|job| job.definition.clone())
            .collect();
        for definition in missing {
            if let Err(e) = store.save_job_configuration(&definition.name, &definition).await {
                warn!("Failed to seed configuration for {}: {}", definition.name, e);
            }
        }
    }

    async fn arm(&self, name: &str) -> Result<(), JobError> {
        let (schedule, timezone, description) = {
            let jobs = self.shared.jobs.read();
            let job = jobs
                .get(name)
                .ok_or_else(|| JobError::UnknownJob(name.to_string()))?;
            if job.timer.is_some() {
                return Ok(());
            }
            (
                self.shared.effective_schedule(&job.definition),
                job.timezone,
                job.definition.description.clone(),
            )
        };

        let shared = Arc::clone(&self.shared);
        let job_name = name.to_string();
        let job = Job::new_async_tz(schedule.as_str(), timezone, move |uuid, mut scheduler| {
            let shared = Arc::clone(&shared);
            let job_name = job_name.clone();
            Box::pin(async move {
                let next = scheduler.next_tick_for_job(uuid).await.ok().flatten();
                shared.on_timer_fired(&job_name, next);
            })
        })
        .map_err(|e| JobError::InvalidSchedule {
            schedule: schedule.clone(),
            reason: e.to_string(),
        })?;

        let timer = self.scheduler.add(job).await?;
        let mut scheduler = self.scheduler.clone();
        let next = scheduler.next_tick_for_job(timer).await.ok().flatten();

        self.shared.update_status(name, |job| {
            job.timer = Some(timer);
            job.status.next_execution = next;
            if job.status.state != JobState::Queued {
                job.status.state = job.idle_state();
            }
        });
        info!("📅 Scheduled: {} - {} [cron: {}, tz: {}]", name, description, schedule, timezone);
        Ok(())
    }

    async fn disarm(&self, name: &str) -> Result<(), JobError> {
        let timer = {
            let mut jobs = self.shared.jobs.write();
            let job = jobs
                .get_mut(name)
                .ok_or_else(|| JobError::UnknownJob(name.to_string()))?;
            let timer = job.timer.take();
            job.status.next_execution = None;
            if job.status.state != JobState::Queued && job.status.state != JobState::Failed {
                job.status.state = job.idle_state();
            }
            timer
        };
        if let Some(timer) = timer {
            self.scheduler.remove(&timer).await?;
            debug!("Disarmed timer for job {}", name);
        }
        Ok(())
    }
}

impl SchedulerShared {
    fn register(&self, mut definition: JobDefinition) -> Result<(), JobError> {
        if definition.name.trim().is_empty() {
            return Err(JobError::Validation("Job name is required".to_string()));
        }
        if !self.context.operations.contains(&definition.operation_type) {
            return Err(JobError::UnknownOperationType(definition.operation_type));
        }
        if definition.timezone.trim().is_empty() {
            definition.timezone = self.config.default_timezone.clone();
        }
        let timezone = parse_timezone(&definition.timezone)?;
        definition.schedule = normalize_schedule(&definition.schedule)?;
        validate_schedule(&definition.schedule, timezone)?;

        let mut jobs = self.jobs.write();
        if jobs.contains_key(&definition.name) {
            return Err(JobError::DuplicateJob(definition.name));
        }

        let mut status = JobStatus::new(definition.name.clone());
        if !definition.enabled {
            status.state = JobState::Disabled;
        }
        info!(
            "📋 Registered job: {} [{}, cron: {}, tz: {}]",
            definition.name, definition.operation_type, definition.schedule, definition.timezone
        );
        jobs.insert(
            definition.name.clone(),
            ScheduledJob {
                definition,
                timezone,
                status,
                timer: None,
            },
        );
        Ok(())
    }

    /// Overlay a persisted configuration. Unknown jobs are registered when a
    /// handler exists for their operation type.
    fn apply_persisted(&self, persisted: JobDefinition) {
        let name = persisted.name.clone();
        if !self.jobs.read().contains_key(&name) {
            match self.register(persisted) {
                Ok(()) => info!("📂 Loaded persisted job: {}", name),
                Err(e) => warn!("Skipping persisted job {}: {}", name, e),
            }
            return;
        }

        let timezone_name = if persisted.timezone.trim().is_empty() {
            self.config.default_timezone.clone()
        } else {
            persisted.timezone.clone()
        };
        let validated = parse_timezone(&timezone_name).and_then(|timezone| {
            let schedule = normalize_schedule(&persisted.schedule)?;
            validate_schedule(&schedule, timezone)?;
            Ok((timezone, schedule))
        });
        let (timezone, schedule) = match validated {
            Ok(valid) => valid,
            Err(e) => {
                warn!("Ignoring persisted configuration for {}: {}", name, e);
                return;
            }
        };

        self.update_status(&name, |job| {
            if persisted.operation_type != job.definition.operation_type {
                if self.context.operations.contains(&persisted.operation_type) {
                    job.definition.operation_type = persisted.operation_type.clone();
                } else {
                    warn!(
                        "Persisted operation type '{}' for {} has no handler, keeping '{}'",
                        persisted.operation_type, name, job.definition.operation_type
                    );
                }
            }
            job.definition.schedule = schedule;
            job.definition.timezone = timezone_name;
            job.definition.enabled = persisted.enabled;
            job.definition.gate = persisted.gate;
            if !persisted.description.is_empty() {
                job.definition.description = persisted.description.clone();
            }
            job.timezone = timezone;
            job.status.state = job.idle_state();
        });
        debug!("Applied persisted configuration for {}", name);
    }

    fn effective_schedule(&self, definition: &JobDefinition) -> String {
        if self.config.test_mode {
            TEST_MODE_SCHEDULE.to_string()
        } else {
            definition.schedule.clone()
        }
    }

    fn update_status(&self, name: &str, update: impl FnOnce(&mut ScheduledJob)) {
        if let Some(job) = self.jobs.write().get_mut(name) {
            update(job);
        }
    }

    fn gate_allows(&self, gate: JobGate, now: DateTime<Utc>) -> bool {
        match gate {
            JobGate::MarketOpen => self.context.calendar.is_open(now),
            JobGate::Weekday => self.context.calendar.is_trading_day(now),
        }
    }

    fn on_timer_fired(self: &Arc<Self>, name: &str, next: Option<DateTime<Utc>>) {
        let gate = {
            let mut jobs = self.jobs.write();
            let Some(job) = jobs.get_mut(name) else {
                return;
            };
            if next.is_some() {
                job.status.next_execution = next;
            }
            if !job.definition.enabled {
                return;
            }
            job.definition.gate
        };

        if let Some(gate) = gate {
            if !self.gate_allows(gate, Utc::now()) {
                debug!("⏭️ Skipping {}: gate '{}' is closed", name, gate.as_str());
                return;
            }
        }

        // Failures are recorded on the job status
        let _ = self.enqueue_job(name, "schedule");
    }

    fn enqueue_job(self: &Arc<Self>, name: &str, trigger: &'static str) -> Result<WorkItemId, JobError> {
        let operation_type = self
            .jobs
            .read()
            .get(name)
            .map(|job| job.definition.operation_type.clone())
            .ok_or_else(|| JobError::UnknownJob(name.to_string()))?;
        let handler = self
            .context
            .operations
            .get(&operation_type)
            .ok_or_else(|| JobError::UnknownOperationType(operation_type.clone()))?;

        let profile = self.queue.config().profile(&operation_type);
        let op = operation(move || {
            let handler = Arc::clone(&handler);
            async move { handler.run().await }
        });
        let observer: Arc<dyn WorkObserver> = Arc::new(JobRunObserver {
            shared: Arc::clone(self),
            name: name.to_string(),
            run_id: Mutex::new(None),
        });
        let spec = WorkSpec::new(name, operation_type, op)
            .with_priority(profile.priority)
            .with_timeout(profile.timeout)
            .with_max_attempts(profile.max_attempts)
            .retry_if(|error| is_retryable_message(&error.to_string()))
            .with_metadata("job_name", name)
            .with_metadata("trigger", trigger)
            .with_observer(observer);

        // Held across enqueue so the item's observer cannot update the status
        // before it is marked queued.
        let mut jobs = self.jobs.write();
        let result = self.queue.enqueue(spec);
        let Some(job) = jobs.get_mut(name) else {
            return result;
        };
        match result {
            Ok(id) => {
                job.status.state = JobState::Queued;
                job.status.current_work_item = Some(id);
                job.status.last_execution = Some(Utc::now());
                Ok(id)
            }
            Err(e) => {
                error!("❌ Failed to enqueue job {}: {}", name, e);
                job.status.state = JobState::Failed;
                job.status.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}

/// Keeps a job's status and run journal in step with its work item.
struct JobRunObserver {
    shared: Arc<SchedulerShared>,
    name: String,
    run_id: Mutex<Option<i64>>,
}

impl JobRunObserver {
    fn clear_work_item(&self, id: WorkItemId, update: impl FnOnce(&mut ScheduledJob)) {
        self.shared.update_status(&self.name, |job| {
            if job.status.current_work_item == Some(id) {
                job.status.current_work_item = None;
                update(job);
            }
        });
    }

    async fn persist_outcome(&self, entry: &ExecutionHistoryEntry, result: &Result<JobResult, JobError>) {
        let Some(store) = &self.shared.context.store else {
            return;
        };
        let Some(run_id) = self.run_id.lock().take() else {
            return;
        };
        let recorded = match result {
            Ok(job_result) => store.record_run_success(run_id, job_result, entry.duration_ms).await,
            Err(e) => store.record_run_failure(run_id, &e.to_string(), entry.duration_ms).await,
        };
        if let Err(e) = recorded {
            error!("Failed to record job outcome for {}: {}", self.name, e);
        }
    }
}

#[async_trait]
impl WorkObserver for JobRunObserver {
    async fn on_started(&self, item: &WorkItemInfo) {
        self.shared.update_status(&self.name, |job| {
            // Never take over from a newer work item for the same job.
            if job.status.current_work_item.is_none() {
                job.status.current_work_item = Some(item.id);
            }
        });

        let Some(store) = &self.shared.context.store else {
            return;
        };
        if self.run_id.lock().is_some() {
            return;
        }
        match store.record_run_start(&self.name).await {
            Ok(run_id) => *self.run_id.lock() = Some(run_id),
            Err(e) => error!("Failed to record job start for {}: {}", self.name, e),
        }
    }

    async fn on_finished(&self, entry: &ExecutionHistoryEntry, result: &Result<JobResult, JobError>) {
        self.shared.update_status(&self.name, |job| {
            job.status.run_count += 1;
            match result {
                Ok(job_result) => {
                    job.status.last_result = Some(job_result.clone());
                    job.status.last_error = None;
                }
                Err(e) => {
                    job.status.failure_count += 1;
                    job.status.last_error = Some(e.to_string());
                }
            }

            // A newer work item for this job owns the state from here on.
            if job.status.current_work_item != Some(entry.id) {
                return;
            }
            job.status.current_work_item = None;
            job.status.state = match result {
                Ok(_) => job.idle_state(),
                Err(_) if job.definition.enabled => JobState::Failed,
                Err(_) => JobState::Disabled,
            };
        });
        self.persist_outcome(entry, result).await;
    }

    fn on_requeued(&self, item: &WorkItemInfo, error: &JobError, delay: Duration) {
        debug!("Job {} requeued in {:?}: {}", self.name, delay, error);
        self.shared.update_status(&self.name, |job| {
            if job.status.current_work_item == Some(item.id) {
                job.status.last_error = Some(error.to_string());
            }
        });
    }

    fn on_cancelled(&self, item: &WorkItemInfo) {
        self.clear_work_item(item.id, |job| {
            job.status.state = job.idle_state();
        });

        // An item cancelled while deferred may already have a journal row.
        let Some(run_id) = self.run_id.lock().take() else {
            return;
        };
        let Some(store) = self.shared.context.store.clone() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let name = self.name.clone();
        handle.spawn(async move {
            if let Err(e) = store.record_run_failure(run_id, "Cancelled", 0).await {
                error!("Failed to record cancellation for {}: {}", name, e);
            }
        });
    }
}

/// A full queue is a soft rejection; every other enqueue error propagates.
fn queued_or_rejected(result: Result<WorkItemId, JobError>) -> Result<Option<WorkItemId>, JobError> {
    match result {
        Ok(id) => Ok(Some(id)),
        Err(JobError::QueueFull { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

fn parse_timezone(name: &str) -> Result<Tz, JobError> {
    name.parse::<Tz>()
        .map_err(|_| JobError::InvalidTimezone(name.to_string()))
}

/// Accept five-field cron by prepending a zero seconds field.
fn normalize_schedule(schedule: &str) -> Result<String, JobError> {
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        n => Err(JobError::InvalidSchedule {
            schedule: schedule.to_string(),
            reason: format!("expected 5 to 7 fields, found {}", n),
        }),
    }
}

fn validate_schedule(schedule: &str, timezone: Tz) -> Result<(), JobError> {
    Job::new_async_tz(schedule, timezone, |_uuid, _scheduler| Box::pin(async {}))
        .map(|_| ())
        .map_err(|e| JobError::InvalidSchedule {
            schedule: schedule.to_string(),
            reason: e.to_string(),
        })
}
