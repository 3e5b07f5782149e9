//! Postgres-backed work queue with lease-based claiming, retries, and a
//! polling worker runtime.
//!
//! The `jobs` table is the single source of truth; workers coordinate only
//! through it. Claiming is one atomic statement (`FOR UPDATE SKIP LOCKED`),
//! which also recovers jobs whose holder died mid-handler: an expired lease
//! makes a `processing` row claimable again. The price is at-least-once
//! execution, so handlers must be idempotent: checkpoint partial progress
//! with [`JobQueue::checkpoint`] and skip already-finished steps on entry.
//!
//! # Architecture
//!
//! ```text
//! callers ──► JobQueue::enqueue ──► jobs table ◄── JobQueue::claim ◄── JobWorker
//!                                      ▲                                  │
//!                                      │                          HandlerRegistry
//!                                      │                                  │
//!                                  complete / fail ◄──────────── handler outcome
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use workq::{JobQueue, JobWorker, JobWorkerConfig, HandlerRegistry, DEFAULT_MAX_ATTEMPTS};
//!
//! let queue = Arc::new(JobQueue::new(pool));
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("transcribe", Arc::new(TranscribeHandler::new(deps)));
//!
//! queue.enqueue("transcribe", payload, DEFAULT_MAX_ATTEMPTS).await?;
//!
//! JobWorker::with_config(queue, Arc::new(registry), JobWorkerConfig::default())
//!     .run_until_shutdown()
//!     .await?;
//! ```

pub mod config;
pub mod events;
pub mod handlers;
mod job;
mod queue;
mod registry;
mod worker;

pub use config::WorkerConfig;
pub use events::{JobEvent, JobEventSink, TracingSink};
pub use job::{FailureKind, Job, JobStatus, DEFAULT_MAX_ATTEMPTS, LEASE_TIMEOUT};
pub use queue::JobQueue;
pub use registry::{ClaimedJob, HandlerError, HandlerRegistry, JobHandler, SharedHandlerRegistry};
pub use worker::{JobWorker, JobWorkerConfig};
