//! Worker process configuration from the environment.

use std::time::Duration;

use anyhow::{Context, Result};
use uuid::Uuid;

/// Settings for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Sleep between empty polls.
    pub poll_interval: Duration,
    /// Identity recorded in `locked_by`; defaults to a fresh `worker-{uuid}`.
    pub worker_id: String,
    /// Comma-separated allowlist of job types; unset claims everything.
    pub accepted_types: Option<Vec<String>>,
    pub max_connections: u32,
}

impl WorkerConfig {
    /// Load from the environment (reads `.env` if present).
    ///
    /// Recognized variables: `DATABASE_URL` (required),
    /// `WORKER_POLL_INTERVAL_MS`, `WORKER_ID`, `WORKER_JOB_TYPES`,
    /// `WORKER_DB_POOL_SIZE`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        let poll_interval = match std::env::var("WORKER_POLL_INTERVAL_MS") {
            Ok(raw) => Duration::from_millis(
                raw.parse()
                    .context("WORKER_POLL_INTERVAL_MS must be an integer")?,
            ),
            Err(_) => Duration::from_secs(1),
        };

        let worker_id = std::env::var("WORKER_ID")
            .unwrap_or_else(|_| format!("worker-{}", Uuid::new_v4()));

        let accepted_types = std::env::var("WORKER_JOB_TYPES")
            .ok()
            .as_deref()
            .and_then(parse_job_types);

        let max_connections = match std::env::var("WORKER_DB_POOL_SIZE") {
            Ok(raw) => raw
                .parse()
                .context("WORKER_DB_POOL_SIZE must be an integer")?,
            Err(_) => 5,
        };

        Ok(Self {
            database_url,
            poll_interval,
            worker_id,
            accepted_types,
            max_connections,
        })
    }
}

fn parse_job_types(raw: &str) -> Option<Vec<String>> {
    let types: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    if types.is_empty() {
        None
    } else {
        Some(types)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_job_types() {
        let types = parse_job_types("echo, transcribe ,synthesize").unwrap();
        assert_eq!(types, vec!["echo", "transcribe", "synthesize"]);
    }

    #[test]
    fn empty_job_types_means_no_filter() {
        assert!(parse_job_types("").is_none());
        assert!(parse_job_types(" , ,").is_none());
    }
}
