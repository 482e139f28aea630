//! High-level recording interface over the raw Prometheus metrics.

use super::prometheus::{
    ACTIVE_WORKERS, JOBS_ENQUEUED_TOTAL, JOBS_PROCESSED_TOTAL, JOB_DURATION, QUEUE_DEPTH,
};

/// Records jobvisor operational metrics.
///
/// Every method silently does nothing until `init_metrics()` has run, so
/// library code can record unconditionally.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a job pushed onto `queue`.
    pub fn record_enqueue(&self, queue: &str) {
        if let Some(counter) = JOBS_ENQUEUED_TOTAL.get() {
            counter.with_label_values(&[queue]).inc();
        }
    }

    /// Record a finished job.
    ///
    /// # Arguments
    ///
    /// * `queue` - Queue the job came from
    /// * `status` - Terminal status (e.g. "success", "failed")
    /// * `duration_secs` - Time spent running the command
    pub fn record_job(&self, queue: &str, status: &str, duration_secs: f64) {
        if let Some(counter) = JOBS_PROCESSED_TOTAL.get() {
            counter.with_label_values(&[queue, status]).inc();
        }

        if let Some(histogram) = JOB_DURATION.get() {
            histogram.with_label_values(&[queue]).observe(duration_secs);
        }

        tracing::trace!(
            queue = queue,
            status = status,
            duration_secs = duration_secs,
            "Recorded job metric"
        );
    }

    pub fn update_queue_depth(&self, queue: &str, depth: usize) {
        if let Some(gauge) = QUEUE_DEPTH.get() {
            gauge.with_label_values(&[queue]).set(depth as f64);
        }
    }

    pub fn update_active_workers(&self, count: usize) {
        if let Some(gauge) = ACTIVE_WORKERS.get() {
            gauge.set(count as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;

    #[test]
    fn test_record_job() {
        init_metrics().unwrap();
        let collector = MetricsCollector::new();
        collector.record_job("email", "success", 0.25);

        let value = JOBS_PROCESSED_TOTAL
            .get()
            .unwrap()
            .with_label_values(&["email", "success"])
            .get();
        assert!(value >= 1.0);
    }

    #[test]
    fn test_update_queue_depth() {
        init_metrics().unwrap();
        let collector = MetricsCollector::new();
        collector.update_queue_depth("cache", 17);

        let value = QUEUE_DEPTH.get().unwrap().with_label_values(&["cache"]).get();
        assert_eq!(value, 17.0);
    }

    #[test]
    fn test_record_enqueue() {
        init_metrics().unwrap();
        let collector = MetricsCollector::new();
        collector.record_enqueue("prio");
        collector.record_enqueue("prio");

        let value = JOBS_ENQUEUED_TOTAL
            .get()
            .unwrap()
            .with_label_values(&["prio"])
            .get();
        assert!(value >= 2.0);
    }
}
