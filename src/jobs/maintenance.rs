//! Nightly Maintenance Job
//!
//! Housekeeping for the tables the rest of the system writes to. One sweep
//! runs three steps in order:
//!
//! 1. Delete expired rows (`expires_at < NOW()`) from every configured cache
//!    table
//! 2. Delete snapshot rows older than the snapshot retention window
//! 3. Prune finished `job_runs` rows older than the run retention window
//!
//! # Job Schedule
//!
//! - **Production**: Daily at 3:00 AM (0 0 3 * * *)
//! - **Test Mode**: Every minute
//!
//! # Error Handling
//!
//! A failing cache table is logged and counted in `items_failed`; the sweep
//! carries on with the next table. Snapshot archival and run pruning errors
//! fail the job so the queue can retry it.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{error, info};

use crate::db::job_queries;
use crate::errors::JobError;
use crate::models::JobResult;
use crate::services::operations::JobOperation;

/// Operation-type tag the sweep is registered under.
pub const MAINTENANCE_OPERATION: &str = "maintenance";

#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceConfig {
    /// Tables with an `expires_at` column
    pub cache_tables: Vec<String>,
    /// Table with a `snapshot_date` column, if any
    pub snapshot_table: Option<String>,
    pub snapshot_retention_days: i32,
    pub run_retention_days: i32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cache_tables: Vec::new(),
            snapshot_table: None,
            snapshot_retention_days: 365,
            run_retention_days: 90,
        }
    }
}

impl MaintenanceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_tables: std::env::var("MAINTENANCE_CACHE_TABLES")
                .map(|v| parse_table_list(&v))
                .unwrap_or_default(),
            snapshot_table: std::env::var("MAINTENANCE_SNAPSHOT_TABLE")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            snapshot_retention_days: std::env::var("MAINTENANCE_SNAPSHOT_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.snapshot_retention_days),
            run_retention_days: std::env::var("JOB_RUN_RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.run_retention_days),
        }
    }

    /// Table names are interpolated into SQL, so only plain identifiers pass.
    pub fn validate(&self) -> Result<(), String> {
        let tables = self.cache_tables.iter().chain(self.snapshot_table.iter());
        for table in tables {
            if !is_plain_identifier(table) {
                return Err(format!("Invalid maintenance table name: {}", table));
            }
        }
        if self.snapshot_retention_days <= 0 || self.run_retention_days <= 0 {
            return Err("Maintenance retention windows must be positive".to_string());
        }
        Ok(())
    }
}

fn parse_table_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub struct MaintenanceSweep {
    pool: PgPool,
    config: MaintenanceConfig,
}

impl MaintenanceSweep {
    pub fn new(pool: PgPool, config: MaintenanceConfig) -> Result<Self, JobError> {
        config.validate().map_err(JobError::Validation)?;
        Ok(Self { pool, config })
    }

    async fn cleanup_expired_caches(&self) -> JobResult {
        info!("🧹 Cleaning up expired caches...");
        let mut result = JobResult::default();

        for table in &self.config.cache_tables {
            let deleted = sqlx::query(&format!("DELETE FROM {} WHERE expires_at < NOW()", table))
                .execute(&self.pool)
                .await;
            match deleted {
                Ok(deleted) => {
                    result.items_processed += deleted.rows_affected() as i32;
                    info!("🗑️ Deleted {} expired rows from {}", deleted.rows_affected(), table);
                }
                Err(e) => {
                    result.items_failed += 1;
                    error!("Failed to clean cache table {}: {}", table, e);
                }
            }
        }
        result
    }

    async fn archive_old_snapshots(&self) -> Result<u64, JobError> {
        let Some(table) = &self.config.snapshot_table else {
            return Ok(0);
        };
        info!("📦 Archiving old snapshots...");

        let archived = sqlx::query(&format!(
            "DELETE FROM {} WHERE snapshot_date < NOW() - make_interval(days => $1)",
            table
        ))
        .bind(self.config.snapshot_retention_days)
        .execute(&self.pool)
        .await
        .map_err(|e| JobError::operation(format!("Snapshot archival failed: {}", e)))?;

        info!("📦 Archived {} old snapshots", archived.rows_affected());
        Ok(archived.rows_affected())
    }

    async fn prune_job_runs(&self) -> Result<u64, JobError> {
        let pruned = job_queries::delete_old_runs(&self.pool, self.config.run_retention_days)
            .await
            .map_err(|e| JobError::operation(format!("Job run pruning failed: {}", e)))?;
        info!("🗑️ Pruned {} job runs older than {} days", pruned, self.config.run_retention_days);
        Ok(pruned)
    }
}

#[async_trait]
impl JobOperation for MaintenanceSweep {
    async fn run(&self) -> Result<JobResult, JobError> {
        let mut result = self.cleanup_expired_caches().await;
        result.items_processed += self.archive_old_snapshots().await? as i32;
        result.items_processed += self.prune_job_runs().await? as i32;
        Ok(result)
    }
}
