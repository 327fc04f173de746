use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::errors::AppError;
use crate::models::{ExecutionHistoryEntry, JobRun, JobStatus, WorkItemId};
use crate::services::job_scheduler_service::{JobSummary, SchedulerStats};
use crate::services::queue_manager::{QueueStats, WorkItemInfo};
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/stats", get(scheduler_stats))
        .route("/queue", get(queue_overview))
        .route("/history", get(execution_history))
        .route("/runs", get(recent_runs))
        .route("/work/:work_item_id", delete(cancel_work_item))
        .route("/:job_name", get(get_job))
        .route("/:job_name/runs", get(job_runs))
        .route("/:job_name/trigger", post(trigger_job))
        .route("/:job_name/enable", post(enable_job))
        .route("/:job_name/disable", post(disable_job))
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

#[derive(Debug, Serialize)]
pub struct QueueOverview {
    pub stats: QueueStats,
    pub pending: Vec<WorkItemInfo>,
    pub running: Vec<WorkItemInfo>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub job_name: String,
    pub work_item_id: WorkItemId,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub work_item_id: WorkItemId,
    pub cancelled: bool,
}

/// GET /api/jobs - List all registered jobs
async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSummary>> {
    info!("GET /api/jobs - Listing jobs");
    Json(state.scheduler.list_jobs())
}

/// GET /api/jobs/stats - Scheduler and queue statistics
async fn scheduler_stats(State(state): State<AppState>) -> Json<SchedulerStats> {
    Json(state.scheduler.get_scheduler_stats())
}

/// GET /api/jobs/queue - Queue statistics with pending and running items
async fn queue_overview(State(state): State<AppState>) -> Json<QueueOverview> {
    let queue = state.scheduler.queue();
    Json(QueueOverview {
        stats: queue.get_queue_stats(),
        pending: queue.pending_items(),
        running: queue.running_items(),
    })
}

/// GET /api/jobs/history - In-memory execution history, most recent first
async fn execution_history(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<ExecutionHistoryEntry>> {
    Json(state.scheduler.get_execution_history(query.limit()))
}

/// GET /api/jobs/runs - Persisted runs across all jobs
async fn recent_runs(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<JobRun>>, AppError> {
    fetch_runs(&state, None, query.limit()).await.map(Json)
}

/// GET /api/jobs/:job_name - Definition and status of one job
async fn get_job(
    Path(job_name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<JobSummary>, AppError> {
    state
        .scheduler
        .get_job(&job_name)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Unknown job: {}", job_name)))
}

/// GET /api/jobs/:job_name/runs - Persisted runs for one job
async fn job_runs(
    Path(job_name): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<JobRun>>, AppError> {
    if state.scheduler.get_job_status(&job_name).is_none() {
        return Err(AppError::NotFound(format!("Unknown job: {}", job_name)));
    }
    fetch_runs(&state, Some(&job_name), query.limit()).await.map(Json)
}

/// POST /api/jobs/:job_name/trigger - Enqueue a job now
async fn trigger_job(
    Path(job_name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<TriggerResponse>, AppError> {
    info!("POST /api/jobs/{}/trigger - Manually triggering job", job_name);

    let work_item_id = state
        .scheduler
        .trigger_job(&job_name)?
        .ok_or(AppError::QueueFull)?;
    let status = state
        .scheduler
        .get_job_status(&job_name)
        .ok_or_else(|| AppError::NotFound(format!("Unknown job: {}", job_name)))?;

    Ok(Json(TriggerResponse {
        job_name,
        work_item_id,
        status,
    }))
}

/// POST /api/jobs/:job_name/enable
async fn enable_job(
    Path(job_name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<JobSummary>, AppError> {
    set_enabled(state, job_name, true).await
}

/// POST /api/jobs/:job_name/disable
async fn disable_job(
    Path(job_name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<JobSummary>, AppError> {
    set_enabled(state, job_name, false).await
}

/// DELETE /api/jobs/work/:work_item_id - Cancel a queued work item
async fn cancel_work_item(
    Path(work_item_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CancelResponse>, AppError> {
    info!("DELETE /api/jobs/work/{} - Cancelling work item", work_item_id);

    let work_item_id: WorkItemId = work_item_id
        .parse()
        .map_err(|_| AppError::Validation(format!("Invalid work item id: {}", work_item_id)))?;

    if !state.scheduler.cancel_job(work_item_id) {
        return Err(AppError::Conflict(format!(
            "Work item {} is not queued (unknown, running or finished)",
            work_item_id
        )));
    }

    Ok(Json(CancelResponse {
        work_item_id,
        cancelled: true,
    }))
}

async fn set_enabled(state: AppState, job_name: String, enabled: bool) -> Result<Json<JobSummary>, AppError> {
    info!(
        "POST /api/jobs/{}/{} - Updating job",
        job_name,
        if enabled { "enable" } else { "disable" }
    );

    state.scheduler.set_job_enabled(&job_name, enabled).await?;
    state
        .scheduler
        .get_job(&job_name)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Unknown job: {}", job_name)))
}

async fn fetch_runs(state: &AppState, job_name: Option<&str>, limit: usize) -> Result<Vec<JobRun>, AppError> {
    let Some(store) = &state.store else {
        return Ok(Vec::new());
    };
    store.recent_runs(job_name, limit as i64).await.map_err(|e| {
        error!("Failed to load job runs: {}", e);
        AppError::from(e)
    })
}
