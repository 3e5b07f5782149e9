//! Job model and the SQL behind claim, completion, and checkpointing.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Default retry ceiling for newly enqueued jobs.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// How long a claimed job may sit in `processing` before another worker is
/// allowed to reclaim it. Long enough to tolerate normal handler latency
/// spikes, short enough to bound recovery after a worker crash.
pub const LEASE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Complete,
    Failed,
}

impl JobStatus {
    /// Terminal statuses are never selected by the claim query.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }
}

/// Classification of a failed attempt, reported by the handler (or by the
/// runtime for failures that precede the handler, like an unknown job type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Transient failure (network error, downstream unavailable). Consumes
    /// one attempt and re-arms the job with exponential backoff.
    Retryable,
    /// Permanent failure (unusable payload, unknown job type). Dead-ends the
    /// job immediately; retries cannot succeed.
    Terminal,
}

impl FailureKind {
    pub fn should_retry(&self) -> bool {
        matches!(self, FailureKind::Retryable)
    }
}

/// A unit of background work. The row in the `jobs` table is the single
/// source of truth; workers coordinate only through it.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    pub job_type: String,

    #[builder(default)]
    pub status: JobStatus,

    /// Opaque payload, passed verbatim to the handler.
    #[builder(default = serde_json::Value::Object(serde_json::Map::new()))]
    pub payload: serde_json::Value,

    /// Set only on successful completion.
    #[builder(default, setter(strip_option))]
    pub result: Option<serde_json::Value>,

    /// Diagnostic from the most recent failed attempt.
    #[builder(default, setter(strip_option))]
    pub error: Option<String>,

    /// Number of claims made. Increments on claim, never resets.
    #[builder(default = 0)]
    pub attempts: i32,

    #[builder(default = DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: i32,

    // Lease: (locked_by, locked_at) are both set iff status is processing.
    #[builder(default, setter(strip_option))]
    pub locked_by: Option<String>,
    #[builder(default, setter(strip_option))]
    pub locked_at: Option<DateTime<Utc>>,

    /// The job is ineligible for claiming before this instant. Carries both
    /// initial scheduling and retry backoff.
    #[builder(default = Utc::now())]
    pub run_after: DateTime<Utc>,

    /// Correlation id, generated once at enqueue and stable across retries.
    #[builder(default = Uuid::new_v4())]
    pub trace_id: Uuid,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether the claim query would currently consider this job.
    pub fn is_eligible(&self) -> bool {
        self.status == JobStatus::Pending && self.run_after <= Utc::now()
    }

    /// Persist a new job row.
    pub async fn insert(&self, pool: &sqlx::PgPool) -> Result<Self> {
        let job = sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO jobs (
                id, job_type, status, payload, result, error, attempts, max_attempts,
                locked_by, locked_at, run_after, trace_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING id, job_type, status, payload, result, error, attempts, max_attempts,
                      locked_by, locked_at, run_after, trace_id, created_at, updated_at
            "#,
        )
        .bind(self.id)
        .bind(&self.job_type)
        .bind(self.status)
        .bind(&self.payload)
        .bind(&self.result)
        .bind(&self.error)
        .bind(self.attempts)
        .bind(self.max_attempts)
        .bind(&self.locked_by)
        .bind(self.locked_at)
        .bind(self.run_after)
        .bind(self.trace_id)
        .bind(self.created_at)
        .bind(self.updated_at)
        .fetch_one(pool)
        .await?;

        Ok(job)
    }

    pub async fn find_by_id(id: Uuid, pool: &sqlx::PgPool) -> Result<Self> {
        let job = sqlx::query_as::<_, Self>(
            r#"
            SELECT id, job_type, status, payload, result, error, attempts, max_attempts,
                   locked_by, locked_at, run_after, trace_id, created_at, updated_at
            FROM jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(pool)
        .await?;

        Ok(job)
    }

    /// Atomically claim one eligible job using `FOR UPDATE SKIP LOCKED`.
    ///
    /// Eligible means pending with `run_after` elapsed, or processing with an
    /// expired lease (the holder is presumed dead). Oldest `created_at` wins.
    /// The selected row is moved to `processing`, leased to `worker_id`, and
    /// its attempt counter incremented, all in a single statement, so two
    /// concurrent callers can never both receive the same job.
    pub async fn claim_one(
        worker_id: &str,
        accepted_types: Option<&[String]>,
        lease_timeout: std::time::Duration,
        pool: &sqlx::PgPool,
    ) -> Result<Option<Self>> {
        let job = sqlx::query_as::<_, Self>(
            r#"
            WITH eligible AS (
                SELECT id
                FROM jobs
                WHERE (
                        (status = 'pending' AND run_after <= NOW())
                     OR (status = 'processing' AND locked_at <= NOW() - ($2 || ' seconds')::INTERVAL)
                      )
                  AND ($3::text[] IS NULL OR job_type = ANY($3))
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'processing',
                locked_by = $1,
                locked_at = NOW(),
                attempts = attempts + 1,
                updated_at = NOW()
            WHERE id IN (SELECT id FROM eligible)
            RETURNING id, job_type, status, payload, result, error, attempts, max_attempts,
                      locked_by, locked_at, run_after, trace_id, created_at, updated_at
            "#,
        )
        .bind(worker_id)
        .bind(lease_timeout.as_secs_f64().to_string())
        .bind(accepted_types)
        .fetch_optional(pool)
        .await?;

        Ok(job)
    }

    /// Mark a job complete and store its result. Idempotent: a second call
    /// overwrites the result (last write wins) and leaves the status alone.
    ///
    /// Generic over the executor so the worker can run it inside the
    /// handler's transaction.
    pub async fn mark_complete<'e, E>(executor: E, id: Uuid, result: serde_json::Value) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'complete',
                result = $2,
                locked_by = NULL,
                locked_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(result)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Merge a JSON patch into the job's payload.
    ///
    /// This is the checkpointing primitive: handlers record partial progress
    /// here (committed immediately, outside their own transaction) so a
    /// re-claimed job can resume from the last completed step instead of
    /// redoing externally-visible work.
    pub async fn merge_payload<'e, E>(executor: E, id: Uuid, patch: serde_json::Value) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            r#"
            UPDATE jobs
            SET payload = payload || $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(patch)
        .execute(executor)
        .await?;

        Ok(())
    }
}
