use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a queued work item. UUIDv7, so ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(pub Uuid);

impl WorkItemId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for WorkItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Priority lane of a work item. Lanes drain strictly high → normal → low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Lanes in drain order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!("Unknown priority: {}", other)),
        }
    }
}

/// Lifecycle state of a registered job as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Registered, timer not armed
    Registered,
    /// Timer armed
    Running,
    /// A work item for this job is queued or executing
    Queued,
    /// The last execution failed permanently
    Failed,
    Disabled,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Registered => "registered",
            JobState::Running => "running",
            JobState::Queued => "queued",
            JobState::Failed => "failed",
            JobState::Disabled => "disabled",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of a single work item inside the queue manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkState {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Outcome reported by a business operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub items_processed: i32,
    pub items_failed: i32,
}

impl JobResult {
    pub fn new(items_processed: i32, items_failed: i32) -> Self {
        Self { items_processed, items_failed }
    }
}

/// Named gating predicates.
///
/// Persisted configurations refer to a gate by name only; the name is
/// resolved against this closed set and never evaluated as code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobGate {
    /// Only act while the market calendar reports the market open
    MarketOpen,
    /// Only act on trading days
    Weekday,
}

impl JobGate {
    pub fn as_str(self) -> &'static str {
        match self {
            JobGate::MarketOpen => "market_open",
            JobGate::Weekday => "weekday",
        }
    }
}

impl FromStr for JobGate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market_open" | "market_hours" => Ok(JobGate::MarketOpen),
            "weekday" | "trading_day" => Ok(JobGate::Weekday),
            other => Err(format!("Unknown gate: {}", other)),
        }
    }
}

/// Declarative definition of a time-triggered job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    /// Cron expression, five fields or six (seconds first)
    pub schedule: String,
    /// IANA timezone the schedule is evaluated in. Empty means the
    /// scheduler's default timezone, filled in at registration.
    #[serde(default)]
    pub timezone: String,
    /// Selects the handler, circuit breaker and operation profile
    pub operation_type: String,
    pub enabled: bool,
    pub gate: Option<JobGate>,
    pub description: String,
}

impl JobDefinition {
    pub fn new(
        name: impl Into<String>,
        schedule: impl Into<String>,
        operation_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            timezone: String::new(),
            operation_type: operation_type.into(),
            enabled: true,
            gate: None,
            description: String::new(),
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_gate(mut self, gate: JobGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Mutable runtime status of a registered job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub name: String,
    pub state: JobState,
    pub last_execution: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub current_work_item: Option<WorkItemId>,
    pub last_result: Option<JobResult>,
    pub run_count: u64,
    pub failure_count: u64,
}

impl JobStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: JobState::Registered,
            last_execution: None,
            next_execution: None,
            last_error: None,
            current_work_item: None,
            last_result: None,
            run_count: 0,
            failure_count: 0,
        }
    }
}

/// One finished work item. Kept for statistics only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHistoryEntry {
    pub id: WorkItemId,
    pub name: String,
    pub operation_type: String,
    pub priority: Priority,
    pub success: bool,
    pub attempts: u32,
    pub queued_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Status of a persisted run in the `job_runs` journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("Unknown run status: {}", other)),
        }
    }
}

/// A row of the run journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: i64,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    pub items_processed: Option<i32>,
    pub items_failed: Option<i32>,
    pub duration_ms: Option<i64>,
}
