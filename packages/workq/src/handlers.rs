//! Built-in handlers.
//!
//! Domain handlers live with their domains and are registered by the
//! application at startup; the queue ships only a diagnostic handler for
//! verifying a deployment end to end.

use std::sync::Arc;

use serde_json::Value;
use sqlx::{Postgres, Transaction};

use crate::registry::{ClaimedJob, HandlerError, HandlerRegistry, JobHandler};

/// Job type handled by [`EchoHandler`].
pub const ECHO_JOB_TYPE: &str = "echo";

/// Returns its payload unchanged. Enqueue an `echo` job to smoke-test the
/// enqueue → claim → complete pipeline.
pub struct EchoHandler;

#[async_trait::async_trait]
impl JobHandler for EchoHandler {
    async fn handle(
        &self,
        _tx: &mut Transaction<'_, Postgres>,
        job: &ClaimedJob,
    ) -> Result<Value, HandlerError> {
        Ok(job.payload.clone())
    }
}

/// Registry with the built-in handlers, used by the worker binary.
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(ECHO_JOB_TYPE, Arc::new(EchoHandler));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_includes_echo() {
        let registry = default_registry();
        assert!(registry.is_registered(ECHO_JOB_TYPE));
    }
}
