//! jobvisor: Redis-backed background jobs with supervisor-managed workers.
//!
//! This library provides a multi-queue job dispatcher on top of a key-value
//! store and an orchestrator that controls worker processes through a
//! supervisor daemon's XML-RPC interface.

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod store;
pub mod supervisor;

// Re-export commonly used types
pub use config::{BackgroundJobsConfig, ConfigError};
pub use error::JobError;
pub use jobs::{BackgroundJobs, JobDispatcher, WorkerOrchestrator};
pub use store::StoreError;
pub use supervisor::SupervisorError;
