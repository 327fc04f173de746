/// Job Engine Integration Tests
///
/// Drives the scheduler, queue manager and in-memory job store through the
/// public API:
/// - Priority ordering across jobs of different operation types
/// - Circuit breaker isolation between operation types
/// - Run journal written for every terminal outcome
/// - Crash recovery on start
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use rustfolio_jobs::config::{OperationProfile, QueueConfig, SchedulerConfig};
use rustfolio_jobs::errors::JobError;
use rustfolio_jobs::models::{JobDefinition, JobResult, JobRun, JobState, Priority, RunStatus};
use rustfolio_jobs::services::circuit_breaker::CircuitState;
use rustfolio_jobs::services::job_scheduler_service::{JobContext, JobSchedulerService};
use rustfolio_jobs::services::job_store::{InMemoryJobStore, JobStore, STUCK_RUN_MESSAGE};
use rustfolio_jobs::services::operations::OperationRegistry;
use rustfolio_jobs::services::queue_manager::QueueManager;
use rustfolio_jobs::services::retry::RetryOverrides;

fn fast_queue_config() -> QueueConfig {
    let single_attempt = RetryOverrides {
        max_attempts: Some(1),
        ..Default::default()
    };
    QueueConfig {
        max_concurrent_jobs: 1,
        drain_interval: Duration::from_millis(10),
        requeue_base_delay: Duration::from_millis(10),
        requeue_max_delay: Duration::from_millis(20),
        circuit_open_requeue_delay: Duration::from_millis(20),
        ..QueueConfig::default()
    }
    .with_profile(
        "price_refresh",
        OperationProfile::new(Priority::High, Duration::from_secs(5))
            .with_max_attempts(1)
            .with_retry(single_attempt.clone()),
    )
    .with_profile(
        "news_fetch",
        OperationProfile::new(Priority::Normal, Duration::from_secs(5))
            .with_max_attempts(1)
            .with_retry(single_attempt.clone()),
    )
    .with_profile(
        "maintenance",
        OperationProfile::new(Priority::Low, Duration::from_secs(5))
            .with_max_attempts(1)
            .with_retry(single_attempt),
    )
}

async fn build_scheduler(operations: OperationRegistry, store: Arc<InMemoryJobStore>) -> JobSchedulerService {
    let queue = Arc::new(QueueManager::new(fast_queue_config()));
    let context = JobContext::new(operations).with_store(store);
    JobSchedulerService::new(SchedulerConfig::default(), queue, context)
        .await
        .expect("scheduler")
}

async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_jobs_drain_by_priority_of_their_operation_type() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut operations = OperationRegistry::new();
    for tag in ["price_refresh", "news_fetch", "maintenance"] {
        let order = order.clone();
        operations.register_fn(tag, move || {
            order.lock().push(tag);
            async { Ok(JobResult::new(1, 0)) }
        });
    }

    let store = Arc::new(InMemoryJobStore::new());
    let scheduler = build_scheduler(operations, store).await;
    scheduler
        .register_job(JobDefinition::new("cleanup_cache", "0 0 3 * * SUN", "maintenance"))
        .unwrap();
    scheduler
        .register_job(JobDefinition::new("fetch_news", "0 30 2 * * *", "news_fetch"))
        .unwrap();
    scheduler
        .register_job(JobDefinition::new("refresh_prices", "0 0 2 * * *", "price_refresh"))
        .unwrap();

    scheduler.trigger_job("cleanup_cache").unwrap();
    scheduler.trigger_job("fetch_news").unwrap();
    scheduler.trigger_job("refresh_prices").unwrap();

    scheduler.queue().start();
    wait_for(|| order.lock().len() == 3).await;
    scheduler.queue().stop().await;

    assert_eq!(*order.lock(), vec!["price_refresh", "news_fetch", "maintenance"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_open_circuit_isolates_one_operation_type() {
    let news_calls = Arc::new(AtomicU32::new(0));
    let mut operations = OperationRegistry::new();
    operations.register_fn("price_refresh", || async {
        Err(JobError::operation("Provider connection refused"))
    });
    let counted = news_calls.clone();
    operations.register_fn("news_fetch", move || {
        counted.fetch_add(1, Ordering::SeqCst);
        async { Ok(JobResult::new(4, 0)) }
    });

    let store = Arc::new(InMemoryJobStore::new());
    let scheduler = build_scheduler(operations, store).await;
    scheduler
        .register_job(JobDefinition::new("refresh_prices", "0 0 2 * * *", "price_refresh"))
        .unwrap();
    scheduler
        .register_job(JobDefinition::new("fetch_news", "0 30 2 * * *", "news_fetch"))
        .unwrap();
    scheduler.queue().start();

    let threshold = scheduler.queue().config().breaker.failure_threshold as u64;
    for failures in 1..=threshold {
        scheduler.trigger_job("refresh_prices").unwrap();
        wait_for(|| scheduler.get_job_status("refresh_prices").unwrap().failure_count == failures).await;
    }
    assert_eq!(scheduler.queue().breaker("price_refresh").state(), CircuitState::Open);

    // A price refresh now waits out the open circuit while news keeps flowing.
    scheduler.trigger_job("refresh_prices").unwrap();
    scheduler.trigger_job("fetch_news").unwrap();
    wait_for(|| news_calls.load(Ordering::SeqCst) == 1).await;

    assert_eq!(scheduler.queue().breaker("news_fetch").state(), CircuitState::Closed);
    assert_eq!(scheduler.get_job_status("refresh_prices").unwrap().state, JobState::Queued);
    assert_eq!(scheduler.get_job_status("refresh_prices").unwrap().failure_count, threshold);
    scheduler.queue().stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_journal_records_outcomes() {
    let mut operations = OperationRegistry::new();
    operations.register_fn("price_refresh", || async { Ok(JobResult::new(12, 1)) });
    operations.register_fn("news_fetch", || async { Err(JobError::operation("Invalid API credentials")) });

    let store = Arc::new(InMemoryJobStore::new());
    let scheduler = build_scheduler(operations, store.clone()).await;
    scheduler
        .register_job(JobDefinition::new("refresh_prices", "0 0 2 * * *", "price_refresh"))
        .unwrap();
    scheduler
        .register_job(JobDefinition::new("fetch_news", "0 30 2 * * *", "news_fetch"))
        .unwrap();
    scheduler.queue().start();

    scheduler.trigger_job("refresh_prices").unwrap();
    scheduler.trigger_job("fetch_news").unwrap();
    wait_for(|| {
        store
            .runs()
            .iter()
            .filter(|run| run.status != RunStatus::Running)
            .count()
            == 2
    })
    .await;
    scheduler.queue().stop().await;

    let prices = store.recent_runs(Some("refresh_prices"), 10).await.unwrap();
    assert_eq!(prices.len(), 1);
    assert_eq!(prices[0].status, RunStatus::Success);
    assert_eq!(prices[0].items_processed, Some(12));
    assert_eq!(prices[0].items_failed, Some(1));

    let news = store.recent_runs(Some("fetch_news"), 10).await.unwrap();
    assert_eq!(news[0].status, RunStatus::Failed);
    assert!(news[0].error_message.as_deref().unwrap().contains("credentials"));

    let status = scheduler.get_job_status("fetch_news").unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert_eq!(status.run_count, 1);
    assert_eq!(status.failure_count, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_reconciles_stuck_runs_and_persisted_flags() {
    let store = Arc::new(InMemoryJobStore::new());
    store.insert_run(JobRun {
        id: 41,
        job_name: "refresh_prices".to_string(),
        started_at: Utc::now() - chrono::Duration::hours(3),
        completed_at: None,
        status: RunStatus::Running,
        error_message: None,
        items_processed: None,
        items_failed: None,
        duration_ms: None,
    });
    let persisted = JobDefinition::new("refresh_prices", "0 0 6 * * *", "price_refresh")
        .with_timezone("America/Toronto")
        .disabled();
    store.save_job_configuration(&persisted.name, &persisted).await.unwrap();

    let mut operations = OperationRegistry::new();
    operations.register_fn("price_refresh", || async { Ok(JobResult::default()) });
    let scheduler = build_scheduler(operations, store.clone()).await;
    scheduler
        .register_job(JobDefinition::new("refresh_prices", "0 0 2 * * *", "price_refresh"))
        .unwrap();

    scheduler.start().await.unwrap();

    let run = &store.runs()[0];
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_message.as_deref(), Some(STUCK_RUN_MESSAGE));

    let job = scheduler.get_job("refresh_prices").unwrap();
    assert_eq!(job.definition.schedule, "0 0 6 * * *");
    assert_eq!(job.definition.timezone, "America/Toronto");
    assert_eq!(job.status.state, JobState::Disabled);
    assert!(job.status.next_execution.is_none());

    scheduler.set_job_enabled("refresh_prices", true).await.unwrap();
    let status = scheduler.get_job_status("refresh_prices").unwrap();
    assert_eq!(status.state, JobState::Running);
    assert!(status.next_execution.unwrap() > Utc::now());
    assert!(store.config("refresh_prices").unwrap().enabled);

    scheduler.shutdown().await.unwrap();
}
