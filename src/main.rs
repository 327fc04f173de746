use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::{info, warn};

use rustfolio_jobs::app;
use rustfolio_jobs::config::EngineConfig;
use rustfolio_jobs::jobs::{self, MaintenanceConfig, MaintenanceSweep, MAINTENANCE_OPERATION};
use rustfolio_jobs::logging::{init_logging, LoggingConfig};
use rustfolio_jobs::services::job_scheduler_service::{JobContext, JobSchedulerService};
use rustfolio_jobs::services::job_store::{JobStore, PgJobStore};
use rustfolio_jobs::services::operations::OperationRegistry;
use rustfolio_jobs::services::queue_manager::QueueManager;
use rustfolio_jobs::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging FIRST
    init_logging(LoggingConfig::from_env()).map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let config = EngineConfig::from_env();
    config.validate().map_err(anyhow::Error::msg)?;

    let mut operations = OperationRegistry::new();
    let mut store: Option<Arc<dyn JobStore>> = None;

    match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await
                .context("Failed to connect to database")?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .context("Failed to run migrations")?;

            let sweep = MaintenanceSweep::new(pool.clone(), MaintenanceConfig::from_env())?;
            operations.register(MAINTENANCE_OPERATION, Arc::new(sweep));
            store = Some(Arc::new(PgJobStore::new(pool)));
            info!("🗄️ Job store: Postgres");
        }
        Err(_) => {
            warn!("⚠️ DATABASE_URL not set - running without persistence or maintenance jobs");
        }
    }

    let queue = Arc::new(QueueManager::new(config.queue.clone()));
    let mut context = JobContext::new(operations);
    if let Some(store) = &store {
        context = context.with_store(Arc::clone(store));
    }
    let scheduler = Arc::new(JobSchedulerService::new(config.scheduler.clone(), queue, context).await?);

    for definition in jobs::default_jobs() {
        let name = definition.name.clone();
        if let Err(e) = scheduler.register_job(definition) {
            warn!("Skipping default job {}: {}", name, e);
        }
    }
    scheduler.start().await?;

    let app = app::create_app(AppState {
        scheduler: Arc::clone(&scheduler),
        store,
    });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3001);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🚀 Rustfolio job engine running at http://{}/", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await?;
    info!("👋 Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown signal received");
}
