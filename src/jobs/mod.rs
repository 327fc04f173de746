//! Business operations run by the scheduler and the jobs that drive them.
//!
//! Each operation is registered in an
//! [`OperationRegistry`](crate::services::operations::OperationRegistry) under its
//! operation-type tag; [`default_jobs`] lists the time-triggered jobs the
//! binary registers at startup. Persisted configuration in `job_config`
//! overrides these defaults.

pub mod maintenance;

use crate::models::JobDefinition;

pub use maintenance::{MaintenanceConfig, MaintenanceSweep, MAINTENANCE_OPERATION};

/// Jobs registered for the operations the binary provides.
pub fn default_jobs() -> Vec<JobDefinition> {
    vec![JobDefinition::new("nightly_maintenance", "0 0 3 * * *", MAINTENANCE_OPERATION)
        .with_description("Daily at 3:00 AM")]
}
