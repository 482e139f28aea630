//! Error types for jobvisor operations.
//!
//! Subsystems keep their own error enums close to the code that raises them:
//! - `store::StoreError` for key-value store failures
//! - `supervisor::SupervisorError` for process-control RPC failures
//! - `config::ConfigError` for configuration loading and validation
//!
//! `JobError` is the error surfaced by the dispatcher and orchestrator and
//! wraps all of the above.

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;
use crate::supervisor::SupervisorError;

/// Errors that can occur while queuing, running or supervising jobs.
#[derive(Debug, Error)]
pub enum JobError {
    /// The caller passed a value outside of an enumerated set (queue, command,
    /// worker name). Never retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A lookup that must succeed found nothing (e.g. stop-by-pid).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Background jobs are switched off in the configuration.
    #[error("Background jobs are disabled")]
    Disabled,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// The command handler could not be executed at all.
    #[error("Command handler failed: {0}")]
    Handler(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl JobError {
    /// Returns whether this error signals caller misuse rather than an
    /// infrastructure failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, JobError::InvalidArgument(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_display() {
        let err = JobError::InvalidArgument("bad queue".to_string());
        assert!(err.to_string().contains("bad queue"));
        assert!(err.is_validation());

        let err = JobError::NotFound("Worker with pid=42 not found.".to_string());
        assert!(err.to_string().contains("pid=42"));
        assert!(!err.is_validation());

        assert!(JobError::Disabled.to_string().contains("disabled"));
    }

    #[test]
    fn test_store_error_converts() {
        let err: JobError = StoreError::ConnectionFailed("refused".to_string()).into();
        assert!(matches!(err, JobError::Store(_)));
        assert!(err.to_string().contains("refused"));
    }
}
