//! Background worker process: polls the job queue and dispatches to handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use workq::handlers::default_registry;
use workq::{JobQueue, JobWorker, JobWorkerConfig, WorkerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = WorkerConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    let queue = Arc::new(JobQueue::new(pool));
    let registry = Arc::new(default_registry());

    info!(
        worker_id = %config.worker_id,
        registered_types = ?registry.registered_types(),
        "worker starting"
    );

    let worker_config = JobWorkerConfig {
        worker_id: config.worker_id,
        poll_interval: config.poll_interval,
        accepted_types: config.accepted_types,
    };

    JobWorker::with_config(queue, registry, worker_config)
        .run_until_shutdown()
        .await
}
