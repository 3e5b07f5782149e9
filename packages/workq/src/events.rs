//! Observability records emitted by the worker runtime.
//!
//! One event per claim, per completion, and per failure, carrying enough to
//! correlate across systems (`trace_id` is stable across retries). The sink
//! is an external collaborator; the default forwards to tracing.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::FailureKind;

/// Facts about the job lifecycle, not commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// A worker took the lease on a job.
    Claimed {
        job_id: Uuid,
        job_type: String,
        trace_id: Uuid,
        attempt: i32,
        worker_id: String,
    },

    /// The handler succeeded and the job was finalized.
    Completed {
        job_id: Uuid,
        job_type: String,
        trace_id: Uuid,
        attempts: i32,
    },

    /// An attempt failed; `will_retry` says whether the job was re-armed.
    Failed {
        job_id: Uuid,
        job_type: String,
        trace_id: Uuid,
        attempts: i32,
        error: String,
        kind: FailureKind,
        will_retry: bool,
    },
}

/// Destination for job lifecycle events.
///
/// `emit` is synchronous and must not block; sinks that ship events
/// elsewhere should buffer internally.
pub trait JobEventSink: Send + Sync {
    fn emit(&self, event: JobEvent);
}

/// Default sink: structured tracing records.
pub struct TracingSink;

impl JobEventSink for TracingSink {
    fn emit(&self, event: JobEvent) {
        match event {
            JobEvent::Claimed {
                job_id,
                job_type,
                trace_id,
                attempt,
                worker_id,
            } => {
                tracing::info!(
                    job_id = %job_id,
                    job_type = %job_type,
                    trace_id = %trace_id,
                    attempt,
                    worker_id = %worker_id,
                    "job claimed"
                );
            }
            JobEvent::Completed {
                job_id,
                job_type,
                trace_id,
                attempts,
            } => {
                tracing::info!(
                    job_id = %job_id,
                    job_type = %job_type,
                    trace_id = %trace_id,
                    attempts,
                    "job completed"
                );
            }
            JobEvent::Failed {
                job_id,
                job_type,
                trace_id,
                attempts,
                error,
                kind,
                will_retry,
            } => {
                tracing::warn!(
                    job_id = %job_id,
                    job_type = %job_type,
                    trace_id = %trace_id,
                    attempts,
                    error = %error,
                    kind = ?kind,
                    will_retry,
                    "job failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claimed_event_serializes() {
        let event = JobEvent::Claimed {
            job_id: Uuid::new_v4(),
            job_type: "echo".to_string(),
            trace_id: Uuid::new_v4(),
            attempt: 1,
            worker_id: "worker-1".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("Claimed"));
        assert!(json.contains("worker-1"));
    }

    #[test]
    fn failed_event_serializes_with_retry_flag() {
        let event = JobEvent::Failed {
            job_id: Uuid::new_v4(),
            job_type: "echo".to_string(),
            trace_id: Uuid::new_v4(),
            attempts: 2,
            error: "downstream unavailable".to_string(),
            kind: FailureKind::Retryable,
            will_retry: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("will_retry"));
        assert!(json.contains("downstream unavailable"));
    }

    #[test]
    fn events_roundtrip() {
        let events = vec![
            JobEvent::Claimed {
                job_id: Uuid::new_v4(),
                job_type: "echo".to_string(),
                trace_id: Uuid::new_v4(),
                attempt: 1,
                worker_id: "worker-1".to_string(),
            },
            JobEvent::Completed {
                job_id: Uuid::new_v4(),
                job_type: "echo".to_string(),
                trace_id: Uuid::new_v4(),
                attempts: 1,
            },
            JobEvent::Failed {
                job_id: Uuid::new_v4(),
                job_type: "echo".to_string(),
                trace_id: Uuid::new_v4(),
                attempts: 3,
                error: "boom".to_string(),
                kind: FailureKind::Terminal,
                will_retry: false,
            },
        ];

        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let _: JobEvent = serde_json::from_str(&json).unwrap();
        }
    }
}
