//! Persistence of job configuration and the run journal.
//!
//! The scheduler treats every store error as non-fatal: it logs and falls
//! back to its in-memory definitions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use sqlx::PgPool;

use crate::db::job_queries;
use crate::errors::JobError;
use crate::models::{JobDefinition, JobResult, JobRun, RunStatus};

/// Error message written on runs reconciled after a restart.
pub const STUCK_RUN_MESSAGE: &str = "Marked as failed: still running when the process restarted";

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load_job_configurations(&self) -> Result<Vec<JobDefinition>, JobError>;

    async fn save_job_configuration(&self, name: &str, definition: &JobDefinition) -> Result<(), JobError>;

    /// Fail runs still marked running after `hours_threshold` hours.
    /// Returns the number of runs updated.
    async fn mark_stuck_jobs_as_failed(&self, hours_threshold: i64) -> Result<u64, JobError>;

    async fn record_run_start(&self, job_name: &str) -> Result<i64, JobError>;

    async fn record_run_success(&self, run_id: i64, result: &JobResult, duration_ms: i64) -> Result<(), JobError>;

    async fn record_run_failure(&self, run_id: i64, error_message: &str, duration_ms: i64) -> Result<(), JobError>;

    /// Most recent runs first, optionally for one job.
    async fn recent_runs(&self, job_name: Option<&str>, limit: i64) -> Result<Vec<JobRun>, JobError>;
}

/// Postgres store over the `job_config` and `job_runs` tables.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn load_job_configurations(&self) -> Result<Vec<JobDefinition>, JobError> {
        Ok(job_queries::fetch_job_configs(&self.pool).await?)
    }

    async fn save_job_configuration(&self, name: &str, definition: &JobDefinition) -> Result<(), JobError> {
        Ok(job_queries::upsert_job_config(&self.pool, name, definition).await?)
    }

    async fn mark_stuck_jobs_as_failed(&self, hours_threshold: i64) -> Result<u64, JobError> {
        Ok(job_queries::mark_stuck_runs_failed(&self.pool, hours_threshold, STUCK_RUN_MESSAGE).await?)
    }

    async fn record_run_start(&self, job_name: &str) -> Result<i64, JobError> {
        Ok(job_queries::insert_job_run(&self.pool, job_name).await?)
    }

    async fn record_run_success(&self, run_id: i64, result: &JobResult, duration_ms: i64) -> Result<(), JobError> {
        job_queries::complete_job_run_success(
            &self.pool,
            run_id,
            result.items_processed,
            result.items_failed,
            duration_ms,
        )
        .await?;
        Ok(())
    }

    async fn record_run_failure(&self, run_id: i64, error_message: &str, duration_ms: i64) -> Result<(), JobError> {
        Ok(job_queries::complete_job_run_failure(&self.pool, run_id, error_message, duration_ms).await?)
    }

    async fn recent_runs(&self, job_name: Option<&str>, limit: i64) -> Result<Vec<JobRun>, JobError> {
        Ok(job_queries::fetch_recent_runs(&self.pool, job_name, limit).await?)
    }
}

/// In-memory store for tests and database-less deployments.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    configs: RwLock<BTreeMap<String, JobDefinition>>,
    runs: RwLock<Vec<JobRun>>,
    next_id: AtomicI64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a run row directly, e.g. one left behind by a crashed process.
    pub fn insert_run(&self, run: JobRun) {
        self.next_id.fetch_max(run.id, Ordering::SeqCst);
        self.runs.write().push(run);
    }

    pub fn runs(&self) -> Vec<JobRun> {
        self.runs.read().clone()
    }

    pub fn config(&self, name: &str) -> Option<JobDefinition> {
        self.configs.read().get(name).cloned()
    }

    fn complete(&self, run_id: i64, update: impl FnOnce(&mut JobRun)) -> Result<(), JobError> {
        let mut runs = self.runs.write();
        let run = runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| JobError::Persistence(format!("Unknown run id: {}", run_id)))?;
        run.completed_at = Some(Utc::now());
        update(run);
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn load_job_configurations(&self) -> Result<Vec<JobDefinition>, JobError> {
        Ok(self.configs.read().values().cloned().collect())
    }

    async fn save_job_configuration(&self, name: &str, definition: &JobDefinition) -> Result<(), JobError> {
        self.configs.write().insert(name.to_string(), definition.clone());
        Ok(())
    }

    async fn mark_stuck_jobs_as_failed(&self, hours_threshold: i64) -> Result<u64, JobError> {
        let cutoff = Utc::now() - Duration::hours(hours_threshold);
        let now = Utc::now();
        let mut updated = 0;
        for run in self.runs.write().iter_mut() {
            if run.status == RunStatus::Running && run.started_at < cutoff {
                run.status = RunStatus::Failed;
                run.completed_at = Some(now);
                run.error_message = Some(STUCK_RUN_MESSAGE.to_string());
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn record_run_start(&self, job_name: &str) -> Result<i64, JobError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.runs.write().push(JobRun {
            id,
            job_name: job_name.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            error_message: None,
            items_processed: None,
            items_failed: None,
            duration_ms: None,
        });
        Ok(id)
    }

    async fn record_run_success(&self, run_id: i64, result: &JobResult, duration_ms: i64) -> Result<(), JobError> {
        self.complete(run_id, |run| {
            run.status = RunStatus::Success;
            run.items_processed = Some(result.items_processed);
            run.items_failed = Some(result.items_failed);
            run.duration_ms = Some(duration_ms);
        })
    }

    async fn record_run_failure(&self, run_id: i64, error_message: &str, duration_ms: i64) -> Result<(), JobError> {
        self.complete(run_id, |run| {
            run.status = RunStatus::Failed;
            run.error_message = Some(error_message.to_string());
            run.duration_ms = Some(duration_ms);
        })
    }

    async fn recent_runs(&self, job_name: Option<&str>, limit: i64) -> Result<Vec<JobRun>, JobError> {
        let runs = self.runs.read();
        let mut selected: Vec<JobRun> = runs
            .iter()
            .filter(|r| job_name.map_or(true, |name| r.job_name == name))
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        selected.truncate(limit.max(0) as usize);
        Ok(selected)
    }
}
