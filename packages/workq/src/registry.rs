//! Handler contract and the job-type → handler registry.
//!
//! Handlers are supplied by domain code; the queue only cares about the
//! contract: take the scoped transaction and the claimed job, return a JSON
//! result or a tagged failure. Whether a failure consumes the retry budget
//! is the handler's call, made explicit through [`HandlerError`] instead of
//! being inferred from an exception.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::job::{FailureKind, Job};

/// Failure reported by a handler.
///
/// `Retryable` consumes one attempt and re-arms the job with backoff (if
/// budget remains); `Terminal` dead-ends the job immediately. Use it for
/// malformed payloads and other failures no retry can fix.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Retryable(String),
    #[error("{0}")]
    Terminal(String),
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        HandlerError::Retryable(message.into())
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        HandlerError::Terminal(message.into())
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            HandlerError::Retryable(_) => FailureKind::Retryable,
            HandlerError::Terminal(_) => FailureKind::Terminal,
        }
    }
}

/// Untagged errors default to retryable, matching the queue's historical
/// treat-every-failure-as-transient behavior.
impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::Retryable(format!("{err:#}"))
    }
}

/// The handler's view of a claimed job.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub id: Uuid,
    pub job_type: String,
    /// Opaque payload, exactly as enqueued (plus any committed checkpoints).
    pub payload: Value,
    /// Correlation id for cross-system logs, stable across retries.
    pub trace_id: Uuid,
    /// 1-based attempt number; greater than 1 means this is a re-execution.
    pub attempt: i32,
}

impl From<&Job> for ClaimedJob {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            trace_id: job.trace_id,
            attempt: job.attempts,
        }
    }
}

/// A job execution routine.
///
/// The transaction scopes the handler's storage writes: the worker commits
/// it on success and rolls it back on failure, so partial writes never leak.
///
/// Handlers must be safe to re-invoke for the same job (lease expiry and
/// retries both cause re-execution). For multi-step handlers, commit each
/// completed step through `JobQueue::checkpoint` (which writes outside this
/// transaction) and check on entry whether a step's output already exists,
/// turning "retry the whole handler" into "resume from the last step".
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        job: &ClaimedJob,
    ) -> Result<Value, HandlerError>;
}

/// Maps job type strings to handlers.
///
/// Built once at startup and shared with the worker. A claimed job whose
/// type has no registration is failed terminally before dispatch; no
/// future attempt could resolve it, so it never loops through the budget.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub fn registered_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("registered_types", &self.registered_types())
            .finish()
    }
}

/// Thread-safe registry wrapped in Arc.
pub type SharedHandlerRegistry = Arc<HandlerRegistry>;

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait::async_trait]
    impl JobHandler for NoopHandler {
        async fn handle(
            &self,
            _tx: &mut Transaction<'_, Postgres>,
            _job: &ClaimedJob,
        ) -> Result<Value, HandlerError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        registry.register("noop", Arc::new(NoopHandler));

        assert!(registry.is_registered("noop"));
        assert!(registry.get("noop").is_some());
        assert!(!registry.is_registered("unknown"));
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn registered_types_lists_all() {
        let mut registry = HandlerRegistry::new();
        registry.register("a", Arc::new(NoopHandler));
        registry.register("b", Arc::new(NoopHandler));

        let mut types = registry.registered_types();
        types.sort();
        assert_eq!(types, vec!["a", "b"]);
    }

    #[test]
    fn handler_error_maps_to_failure_kind() {
        assert_eq!(
            HandlerError::retryable("boom").failure_kind(),
            FailureKind::Retryable
        );
        assert_eq!(
            HandlerError::terminal("bad payload").failure_kind(),
            FailureKind::Terminal
        );
    }

    #[test]
    fn anyhow_errors_default_to_retryable() {
        let err: HandlerError = anyhow::anyhow!("connection reset").into();
        assert_eq!(err.failure_kind(), FailureKind::Retryable);
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn claimed_job_view_carries_identity() {
        let job = Job::builder()
            .job_type("test_job")
            .payload(serde_json::json!({"text": "hi"}))
            .build();
        let claimed = ClaimedJob::from(&job);

        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.trace_id, job.trace_id);
        assert_eq!(claimed.job_type, "test_job");
        assert_eq!(claimed.attempt, 0);
    }
}
