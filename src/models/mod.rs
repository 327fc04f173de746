mod job;

pub use job::{
    ExecutionHistoryEntry, JobDefinition, JobGate, JobResult, JobRun, JobState, JobStatus, Priority,
    RunStatus, WorkItemId, WorkState,
};
