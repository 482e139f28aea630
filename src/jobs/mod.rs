//! Background job subsystem.
//!
//! This module provides:
//!
//! - **Types**: the closed sets of queues and commands, worker names, job and
//!   worker records
//! - **JobDispatcher**: enqueue, blocking dequeue, status tracking, run, and
//!   queue introspection
//! - **WorkerOrchestrator**: worker status records and worker process control
//!   through the supervisor
//! - **BackgroundJobs**: facade wiring both onto one store
//! - **WorkerRunner** and **WorkerMonitor**: the two long-running loops
//!
//! # Delivery
//!
//! Jobs are delivered FIFO within a queue, each to exactly one dequeue call.
//! A job popped by a worker that dies before finishing it is lost; there is no
//! redelivery.

pub mod dispatcher;
pub mod handler;
pub mod job;
pub mod monitor;
pub mod orchestrator;
pub mod runner;
pub mod service;
pub mod types;
pub mod worker;
pub mod worker_name;

pub use dispatcher::{JobDispatcher, JobLinker, NoopLinker, StatusTtl};
pub use handler::{CommandHandler, HandlerOutcome, HandlerRegistry, ShellCommandHandler};
pub use job::{BackgroundJob, EnqueueOptions, JobStatus};
pub use monitor::{MonitorReport, WorkerMonitor};
pub use orchestrator::{StatusUpdate, WorkerOrchestrator};
pub use runner::{RunnerConfig, RunnerStats, WorkerRunner};
pub use service::BackgroundJobs;
pub use types::{
    CommandKind, QueueName, JOB_STATUS_PREFIX, WORKER_PROCESS_GROUP, WORKER_STATUS_PREFIX,
};
pub use worker::{WorkerRecord, WorkerStatus};
pub use worker_name::{WorkerName, WorkerRef};
