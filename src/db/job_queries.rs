use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;

use crate::models::{JobDefinition, JobRun, RunStatus};

#[derive(Debug, sqlx::FromRow)]
struct JobConfigRow {
    job_name: String,
    enabled: bool,
    schedule: String,
    timezone: String,
    operation_type: String,
    gate: Option<String>,
    description: String,
}

impl JobConfigRow {
    fn into_definition(self) -> JobDefinition {
        // Gates are resolved by name; anything unrecognised is dropped.
        let gate = self.gate.as_deref().and_then(|name| match name.parse() {
            Ok(gate) => Some(gate),
            Err(e) => {
                warn!("Ignoring gate for job {}: {}", self.job_name, e);
                None
            }
        });
        JobDefinition {
            name: self.job_name,
            schedule: self.schedule,
            timezone: self.timezone,
            operation_type: self.operation_type,
            enabled: self.enabled,
            gate,
            description: self.description,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JobRunRow {
    id: i64,
    job_name: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    status: String,
    error_message: Option<String>,
    items_processed: Option<i32>,
    items_failed: Option<i32>,
    duration_ms: Option<i64>,
}

impl TryFrom<JobRunRow> for JobRun {
    type Error = sqlx::Error;

    fn try_from(row: JobRunRow) -> Result<Self, Self::Error> {
        let status: RunStatus = row
            .status
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?;
        Ok(JobRun {
            id: row.id,
            job_name: row.job_name,
            started_at: row.started_at,
            completed_at: row.completed_at,
            status,
            error_message: row.error_message,
            items_processed: row.items_processed,
            items_failed: row.items_failed,
            duration_ms: row.duration_ms,
        })
    }
}

pub async fn fetch_job_configs(pool: &PgPool) -> Result<Vec<JobDefinition>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobConfigRow>(
        r#"
        SELECT job_name, enabled, schedule, timezone, operation_type, gate, description
        FROM job_config
        ORDER BY job_name
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(JobConfigRow::into_definition).collect())
}

pub async fn upsert_job_config(
    pool: &PgPool,
    name: &str,
    definition: &JobDefinition,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_config (job_name, enabled, schedule, timezone, operation_type, gate, description)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (job_name) DO UPDATE
        SET enabled = EXCLUDED.enabled,
            schedule = EXCLUDED.schedule,
            timezone = EXCLUDED.timezone,
            operation_type = EXCLUDED.operation_type,
            gate = EXCLUDED.gate,
            description = EXCLUDED.description,
            updated_at = NOW()
        "#,
    )
    .bind(name)
    .bind(definition.enabled)
    .bind(&definition.schedule)
    .bind(&definition.timezone)
    .bind(&definition.operation_type)
    .bind(definition.gate.map(|g| g.as_str()))
    .bind(&definition.description)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fail runs left `running` for longer than `hours_threshold` hours.
pub async fn mark_stuck_runs_failed(
    pool: &PgPool,
    hours_threshold: i64,
    message: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE job_runs
        SET status = 'failed'::job_status,
            completed_at = NOW(),
            error_message = $2
        WHERE status = 'running'::job_status
          AND started_at < NOW() - make_interval(hours => $1)
        "#,
    )
    .bind(hours_threshold as i32)
    .bind(message)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn insert_job_run(pool: &PgPool, job_name: &str) -> Result<i64, sqlx::Error> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO job_runs (job_name, status)
        VALUES ($1, 'running'::job_status)
        RETURNING id
        "#,
    )
    .bind(job_name)
    .fetch_one(pool)
    .await?;

    sqlx::query("UPDATE job_config SET last_run = NOW() WHERE job_name = $1")
        .bind(job_name)
        .execute(pool)
        .await?;

    Ok(id)
}

pub async fn complete_job_run_success(
    pool: &PgPool,
    run_id: i64,
    items_processed: i32,
    items_failed: i32,
    duration_ms: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE job_runs
        SET completed_at = NOW(),
            status = 'success'::job_status,
            items_processed = $2,
            items_failed = $3,
            duration_ms = $4
        WHERE id = $1
        "#,
    )
    .bind(run_id)
    .bind(items_processed)
    .bind(items_failed)
    .bind(duration_ms)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn complete_job_run_failure(
    pool: &PgPool,
    run_id: i64,
    error_message: &str,
    duration_ms: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE job_runs
        SET completed_at = NOW(),
            status = 'failed'::job_status,
            error_message = $2,
            duration_ms = $3
        WHERE id = $1
        "#,
    )
    .bind(run_id)
    .bind(error_message)
    .bind(duration_ms)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn fetch_recent_runs(
    pool: &PgPool,
    job_name: Option<&str>,
    limit: i64,
) -> Result<Vec<JobRun>, sqlx::Error> {
    let rows = sqlx::query_as::<_, JobRunRow>(
        r#"
        SELECT
            id,
            job_name,
            started_at,
            completed_at,
            status::TEXT AS status,
            error_message,
            items_processed,
            items_failed,
            duration_ms
        FROM job_runs
        WHERE $1::TEXT IS NULL OR job_name = $1
        ORDER BY started_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(job_name)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(JobRun::try_from).collect()
}

/// Delete finished runs older than `retention_days`.
pub async fn delete_old_runs(pool: &PgPool, retention_days: i32) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM job_runs
        WHERE status <> 'running'::job_status
          AND started_at < NOW() - make_interval(days => $1)
        "#,
    )
    .bind(retention_days)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
