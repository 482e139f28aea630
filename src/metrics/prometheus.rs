//! Prometheus metrics registration and export.
//!
//! All jobvisor metrics live in one global registry created by
//! [`init_metrics`]. Recording before initialization is a no-op.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all jobvisor metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Jobs pushed onto a queue, labeled by queue.
pub static JOBS_ENQUEUED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Jobs that reached a terminal status, labeled by queue and status.
pub static JOBS_PROCESSED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Command run time in seconds, labeled by queue.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Pending jobs per queue, as last sampled.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Worker processes reported running by the supervisor.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling it again after a successful call does nothing.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    // Job metrics
    let jobs_enqueued_total = CounterVec::new(
        Opts::new("jobvisor_jobs_enqueued_total", "Total number of jobs enqueued"),
        &["queue"],
    )?;

    let jobs_processed_total = CounterVec::new(
        Opts::new(
            "jobvisor_jobs_processed_total",
            "Total number of jobs that finished running",
        ),
        &["queue", "status"],
    )?;

    let job_duration = HistogramVec::new(
        HistogramOpts::new("jobvisor_job_duration_seconds", "Job run time in seconds")
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 1800.0]),
        &["queue"],
    )?;

    // Queue and worker metrics
    let queue_depth = GaugeVec::new(
        Opts::new("jobvisor_queue_depth", "Number of jobs waiting in queue"),
        &["queue"],
    )?;

    let active_workers = Gauge::new(
        "jobvisor_active_workers",
        "Number of worker processes running under the supervisor",
    )?;

    registry.register(Box::new(jobs_enqueued_total.clone()))?;
    registry.register(Box::new(jobs_processed_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = JOBS_ENQUEUED_TOTAL.set(jobs_enqueued_total);
    let _ = JOBS_PROCESSED_TOTAL.set(jobs_processed_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::debug!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
