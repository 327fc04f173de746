pub mod circuit_breaker;
pub mod job_scheduler_service;
pub mod job_store;
pub mod market_calendar;
pub mod operations;
pub mod queue_manager;
pub mod retry;
