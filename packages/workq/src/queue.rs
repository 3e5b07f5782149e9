//! Dependency-injected queue facade over a `PgPool`.
//!
//! `JobQueue` owns the policy knobs (lease timeout, retry backoff) and
//! exposes the four operations of the queue contract:
//!
//! ```text
//! enqueue/schedule ──► pending row (run_after, trace_id)
//! claim            ──► processing row, leased, attempts + 1
//! complete         ──► complete row (terminal)
//! fail             ──► pending row with backoff, or failed row (terminal)
//! ```
//!
//! Every operation is a single atomic statement or transaction; a storage
//! failure leaves the affected job's state untouched.

use anyhow::{ensure, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::job::{FailureKind, Job, JobStatus, LEASE_TIMEOUT};

/// Postgres-backed job queue. Share it behind an `Arc`; all coordination
/// between workers flows through the pool, never through process state.
pub struct JobQueue {
    pool: PgPool,
    lease_timeout: std::time::Duration,
}

impl JobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease_timeout: LEASE_TIMEOUT,
        }
    }

    /// Override the lease timeout. Intended for tests; production workers
    /// should live with [`LEASE_TIMEOUT`].
    pub fn with_lease_timeout(pool: PgPool, lease_timeout: std::time::Duration) -> Self {
        Self {
            pool,
            lease_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn lease_timeout(&self) -> std::time::Duration {
        self.lease_timeout
    }

    /// Insert a new job, eligible immediately.
    ///
    /// A single INSERT with no other side effects; execution is fully
    /// decoupled and starts whenever a worker claims the row.
    pub async fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        max_attempts: i32,
    ) -> Result<Job> {
        self.insert_job(job_type, payload, max_attempts, Utc::now()).await
    }

    /// Insert a new job that becomes eligible at `run_after`.
    pub async fn schedule(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        max_attempts: i32,
        run_after: DateTime<Utc>,
    ) -> Result<Job> {
        self.insert_job(job_type, payload, max_attempts, run_after).await
    }

    async fn insert_job(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        max_attempts: i32,
        run_after: DateTime<Utc>,
    ) -> Result<Job> {
        ensure!(!job_type.is_empty(), "job_type must be non-empty");
        ensure!(max_attempts >= 1, "max_attempts must be at least 1");

        let job = Job::builder()
            .job_type(job_type)
            .payload(payload)
            .max_attempts(max_attempts)
            .run_after(run_after)
            .build()
            .insert(&self.pool)
            .await?;

        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            trace_id = %job.trace_id,
            run_after = %job.run_after,
            "enqueued job"
        );

        Ok(job)
    }

    /// Claim the oldest eligible job, or `None` when nothing is ready.
    ///
    /// `None` is not an error; callers should sleep a poll interval and try
    /// again. Jobs whose `processing` lease has expired are claimed exactly
    /// like fresh pending work, which gives crash recovery without a
    /// supervisor. Handlers must tolerate at-least-once execution.
    pub async fn claim(
        &self,
        worker_id: &str,
        accepted_types: Option<&[String]>,
    ) -> Result<Option<Job>> {
        let job = Job::claim_one(worker_id, accepted_types, self.lease_timeout, &self.pool).await?;

        if let Some(job) = &job {
            info!(
                job_id = %job.id,
                job_type = %job.job_type,
                trace_id = %job.trace_id,
                attempt = job.attempts,
                worker_id = %worker_id,
                "claimed job"
            );
        }

        Ok(job)
    }

    /// Finalize a job successfully. Idempotent; last write wins.
    pub async fn complete(&self, job_id: Uuid, result: serde_json::Value) -> Result<()> {
        Job::mark_complete(&self.pool, job_id, result).await?;
        info!(job_id = %job_id, "job completed");
        Ok(())
    }

    /// Record a failed attempt and decide the job's fate.
    ///
    /// Retryable failures with attempts remaining go back to `pending` with
    /// `run_after = now + 2^attempts` seconds; the delay lives entirely in
    /// `run_after`, this method never sleeps. Terminal failures, and
    /// retryable ones that exhausted the budget, end in `failed`.
    pub async fn fail(&self, job_id: Uuid, error_message: &str, kind: FailureKind) -> Result<Job> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>(
            r#"
            SELECT id, job_type, status, payload, result, error, attempts, max_attempts,
                   locked_by, locked_at, run_after, trace_id, created_at, updated_at
            FROM jobs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

        let updated = if kind.should_retry() && job.attempts < job.max_attempts {
            let delay = backoff_delay(job.attempts);
            let run_after = Utc::now() + delay;

            warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                trace_id = %job.trace_id,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                retry_in_secs = delay.num_seconds(),
                error = %error_message,
                "job attempt failed, retry scheduled"
            );

            sqlx::query_as::<_, Job>(
                r#"
                UPDATE jobs
                SET status = 'pending',
                    run_after = $2,
                    error = $3,
                    locked_by = NULL,
                    locked_at = NULL,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING id, job_type, status, payload, result, error, attempts, max_attempts,
                          locked_by, locked_at, run_after, trace_id, created_at, updated_at
                "#,
            )
            .bind(job.id)
            .bind(run_after)
            .bind(error_message)
            .fetch_one(&mut *tx)
            .await?
        } else {
            error!(
                job_id = %job.id,
                job_type = %job.job_type,
                trace_id = %job.trace_id,
                attempts = job.attempts,
                kind = ?kind,
                error = %error_message,
                "job permanently failed"
            );

            sqlx::query_as::<_, Job>(
                r#"
                UPDATE jobs
                SET status = 'failed',
                    error = $2,
                    locked_by = NULL,
                    locked_at = NULL,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING id, job_type, status, payload, result, error, attempts, max_attempts,
                          locked_by, locked_at, run_after, trace_id, created_at, updated_at
                "#,
            )
            .bind(job.id)
            .bind(error_message)
            .fetch_one(&mut *tx)
            .await?
        };

        tx.commit().await?;

        Ok(updated)
    }

    /// Merge a JSON patch into a job's payload, committed immediately.
    ///
    /// The checkpointing primitive for handlers: record each completed
    /// externally-visible step here before starting the next one, and check
    /// on entry whether a step's output already exists.
    pub async fn checkpoint(&self, job_id: Uuid, patch: serde_json::Value) -> Result<()> {
        Job::merge_payload(&self.pool, job_id, patch).await
    }

    pub async fn find(&self, job_id: Uuid) -> Result<Job> {
        Job::find_by_id(job_id, &self.pool).await
    }

    /// Whether a job has reached a terminal status.
    pub async fn is_finished(&self, job_id: Uuid) -> Result<bool> {
        let job = self.find(job_id).await?;
        Ok(matches!(job.status, JobStatus::Complete | JobStatus::Failed))
    }
}

/// Exponential backoff before a failed attempt becomes eligible again,
/// capped at one hour.
fn backoff_delay(attempts: i32) -> chrono::Duration {
    let secs = 2i64.pow(attempts.clamp(0, 12) as u32).min(3600);
    chrono::Duration::seconds(secs)
}
