//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks enqueued and processed jobs, job run time, queue depth and the
//! number of running worker processes.
//!
//! # Example
//!
//! ```ignore
//! use jobvisor::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! MetricsCollector::new().record_job("email", "success", 1.5);
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, JOBS_ENQUEUED_TOTAL, JOBS_PROCESSED_TOTAL, JOB_DURATION, QUEUE_DEPTH, REGISTRY,
};
