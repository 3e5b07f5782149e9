//! Worker runtime: the poll → claim → dispatch → resolve loop.
//!
//! ```text
//! JobWorker
//!     │
//!     ├─► claim one job (JobQueue, FOR UPDATE SKIP LOCKED)
//!     ├─► look up handler (HandlerRegistry)
//!     ├─► run handler inside a transaction
//!     │       ├─ Ok(result)  → complete within the same tx, commit
//!     │       └─ Err(kind)   → roll back, fail (retry or dead-end)
//!     └─► emit JobEvent per claim / completion / failure
//! ```
//!
//! One worker processes jobs strictly one at a time. Horizontal scaling is
//! more workers against the same pool; correctness rests entirely on the
//! claim statement's atomicity, never on coordination between instances.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::events::{JobEvent, JobEventSink, TracingSink};
use crate::job::{FailureKind, Job, JobStatus};
use crate::queue::JobQueue;
use crate::registry::{ClaimedJob, SharedHandlerRegistry};

/// Configuration for the worker loop.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Identity recorded in `locked_by` while this worker holds a job.
    pub worker_id: String,
    /// How long to sleep when no job is eligible.
    pub poll_interval: Duration,
    /// Restrict claiming to these job types; `None` claims everything.
    pub accepted_types: Option<Vec<String>>,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            poll_interval: Duration::from_secs(1),
            accepted_types: None,
        }
    }
}

impl JobWorkerConfig {
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// Long-running service that executes jobs from the queue.
pub struct JobWorker {
    queue: Arc<JobQueue>,
    registry: SharedHandlerRegistry,
    sink: Arc<dyn JobEventSink>,
    config: JobWorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl JobWorker {
    pub fn new(queue: Arc<JobQueue>, registry: SharedHandlerRegistry) -> Self {
        Self::with_config(queue, registry, JobWorkerConfig::default())
    }

    pub fn with_config(
        queue: Arc<JobQueue>,
        registry: SharedHandlerRegistry,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            sink: Arc::new(TracingSink),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the default tracing sink.
    pub fn with_event_sink(mut self, sink: Arc<dyn JobEventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Handle for signalling shutdown from outside the loop.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run until shutdown is requested.
    ///
    /// Per-job errors never escape this loop; only the loop-level claim path
    /// reacts to storage failures, by logging and retrying after a delay.
    pub async fn run(self) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            accepted_types = ?self.config.accepted_types,
            "job worker starting"
        );

        loop {
            if self.is_shutdown_requested() {
                break;
            }

            let claimed = match self
                .queue
                .claim(&self.config.worker_id, self.config.accepted_types.as_deref())
                .await
            {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(error = %e, "failed to claim job");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            match claimed {
                Some(job) => self.process_job(job).await,
                None => tokio::time::sleep(self.config.poll_interval).await,
            }
        }

        info!(worker_id = %self.config.worker_id, "job worker stopped");
        Ok(())
    }

    /// Run until a Ctrl-C signal is received.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = self.shutdown_handle();

        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            shutdown.store(true, Ordering::SeqCst);
        });

        self.run().await
    }

    /// Execute one claimed job through to completion or failure.
    async fn process_job(&self, job: Job) {
        let claimed = ClaimedJob::from(&job);

        self.sink.emit(JobEvent::Claimed {
            job_id: job.id,
            job_type: job.job_type.clone(),
            trace_id: job.trace_id,
            attempt: job.attempts,
            worker_id: self.config.worker_id.clone(),
        });

        let Some(handler) = self.registry.get(&job.job_type) else {
            // No future attempt can resolve this; skip the retry budget.
            let message = format!("no handler registered for job type: {}", job.job_type);
            self.fail_job(&job, &message, FailureKind::Terminal).await;
            return;
        };

        // Scope the handler's storage writes so they roll back atomically
        // on failure. If beginning the transaction itself fails, the job
        // stays processing and becomes reclaimable once its lease expires.
        let mut tx = match self.queue.pool().begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to begin handler transaction");
                return;
            }
        };

        debug!(job_id = %job.id, job_type = %job.job_type, "dispatching job");

        match handler.handle(&mut tx, &claimed).await {
            Ok(result) => {
                let finalize = async {
                    Job::mark_complete(&mut *tx, job.id, result).await?;
                    tx.commit().await?;
                    anyhow::Ok(())
                };

                if let Err(e) = finalize.await {
                    // Neither the handler's writes nor the completion landed;
                    // the lease will expire and the job will be re-claimed.
                    error!(job_id = %job.id, error = %e, "failed to commit job completion");
                    return;
                }

                self.sink.emit(JobEvent::Completed {
                    job_id: job.id,
                    job_type: job.job_type.clone(),
                    trace_id: job.trace_id,
                    attempts: job.attempts,
                });
            }
            Err(handler_err) => {
                // Discard the handler's partial writes before recording the
                // failure.
                if let Err(e) = tx.rollback().await {
                    error!(job_id = %job.id, error = %e, "failed to roll back handler transaction");
                }

                self.fail_job(&job, &handler_err.to_string(), handler_err.failure_kind())
                    .await;
            }
        }
    }

    async fn fail_job(&self, job: &Job, error_message: &str, kind: FailureKind) {
        match self.queue.fail(job.id, error_message, kind).await {
            Ok(updated) => {
                self.sink.emit(JobEvent::Failed {
                    job_id: job.id,
                    job_type: job.job_type.clone(),
                    trace_id: job.trace_id,
                    attempts: updated.attempts,
                    error: error_message.to_string(),
                    kind,
                    will_retry: updated.status == JobStatus::Pending,
                });
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to mark job as failed");
            }
        }
    }
}
