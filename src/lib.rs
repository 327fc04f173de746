//! Scheduled job execution engine for the Rustfolio backend.
//!
//! Time-triggered jobs are registered with the [`JobSchedulerService`], which
//! hands each firing to the [`QueueManager`] as a work item. The queue drains
//! three priority lanes under a concurrency cap, racing every execution
//! against its timeout and guarding it with a per operation-type circuit
//! breaker and a retry policy.
//!
//! [`JobSchedulerService`]: services::job_scheduler_service::JobSchedulerService
//! [`QueueManager`]: services::queue_manager::QueueManager

pub mod app;
pub mod config;
pub mod db;
pub mod errors;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
