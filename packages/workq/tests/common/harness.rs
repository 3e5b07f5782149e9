//! Test harness with testcontainers for integration testing.
//!
//! One Postgres container is started on the first test and shared by the
//! whole test binary. Each test gets its own database inside it, with
//! migrations applied, so tests never see each other's jobs.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use workq::{Job, JobEvent, JobEventSink, JobQueue, JobStatus};

/// Shared container infrastructure, initialized once per test binary.
struct SharedTestInfra {
    base_url: String,
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Respect RUST_LOG; try_init avoids panicking when another test got
        // here first.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let base_url = format!("postgresql://postgres:postgres@{}:{}", host, port);

        Ok(Self {
            base_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Per-test context: a fresh database with migrations applied.
pub struct TestHarness {
    pub pool: PgPool,
}

impl TestHarness {
    async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;

        let db_name = format!("workq_test_{}", Uuid::new_v4().simple());
        let admin = PgPool::connect(&format!("{}/postgres", infra.base_url))
            .await
            .context("Failed to connect to admin database")?;
        sqlx::query(&format!(r#"CREATE DATABASE "{}""#, db_name))
            .execute(&admin)
            .await
            .context("Failed to create test database")?;
        admin.close().await;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&format!("{}/{}", infra.base_url, db_name))
            .await
            .context("Failed to connect to test database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self { pool })
    }

    /// Queue with the production lease timeout.
    pub fn queue(&self) -> JobQueue {
        JobQueue::new(self.pool.clone())
    }

    /// Queue with a short lease, for stale-lease recovery tests.
    pub fn queue_with_lease(&self, lease: Duration) -> JobQueue {
        JobQueue::with_lease_timeout(self.pool.clone(), lease)
    }

    /// Poll until the job reaches `status` or the timeout elapses.
    pub async fn wait_for_status(
        &self,
        queue: &JobQueue,
        job_id: Uuid,
        status: JobStatus,
        timeout: Duration,
    ) -> Job {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = queue.find(job_id).await.expect("job should exist");
            if job.status == status {
                return job;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "job {} did not reach {:?} within {:?} (last status {:?}, error {:?})",
                    job_id, status, timeout, job.status, job.error
                );
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        // Pool drops with the context; databases are discarded with the
        // container at the end of the run.
    }
}

/// Event sink that records everything for assertions.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<JobEvent>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl JobEventSink for CollectingSink {
    fn emit(&self, event: JobEvent) {
        self.events.lock().unwrap().push(event);
    }
}
