//! Monitor loop: restarts dead workers and samples queue and worker health.
//!
//! Stale worker records are only reported. They may belong to a crashed
//! process, but the supervisor remains the source of truth for liveness and
//! the records are never deleted here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::service::BackgroundJobs;
use super::types::QueueName;
use crate::error::JobError;
use crate::metrics::MetricsCollector;
use crate::supervisor::SupervisorState;

/// Outcome of one monitor pass.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub supervisor: SupervisorState,
    /// Worker processes started by this pass.
    pub restarted: Vec<String>,
    /// Worker processes the supervisor reports alive.
    pub active_workers: usize,
    pub queue_depths: Vec<(QueueName, usize)>,
    /// Pids whose record was not refreshed within the stale threshold.
    pub stale_workers: Vec<u32>,
}

/// Periodic health pass over the worker fleet.
pub struct WorkerMonitor {
    jobs: Arc<BackgroundJobs>,
    interval: Duration,
    stale_after: Duration,
    metrics: MetricsCollector,
}

impl WorkerMonitor {
    pub fn new(jobs: Arc<BackgroundJobs>) -> Self {
        Self {
            jobs,
            interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(300),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Runs one pass: dead worker restart, process count, queue depths and
    /// stale record detection.
    pub async fn check_once(&self) -> Result<MonitorReport, JobError> {
        let orchestrator = self.jobs.orchestrator();

        let supervisor = orchestrator.supervisor_state().await?;
        if !supervisor.is_running() {
            warn!(state = %supervisor.name, "Supervisor is not running");
        }

        let restarted: Vec<String> = orchestrator
            .restart_dead_workers(false)
            .await?
            .into_iter()
            .filter(|result| result.is_success())
            .map(|result| result.name)
            .collect();

        let active_workers = orchestrator
            .worker_processes()
            .await?
            .iter()
            .filter(|process| process.state.is_running())
            .count();
        self.metrics.update_active_workers(active_workers);

        let mut queue_depths = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            let depth = self.jobs.dispatcher().get_queue_size(queue).await?;
            self.metrics.update_queue_depth(queue.as_str(), depth);
            queue_depths.push((queue, depth));
        }

        let now = Utc::now();
        let mut stale_workers = Vec::new();
        for worker in orchestrator.get_workers().await? {
            // negative ages (clock skew) never count as stale
            let Ok(age) = worker.age(now).to_std() else {
                continue;
            };
            if age > self.stale_after {
                warn!(
                    pid = worker.pid,
                    queue = %worker.queue,
                    age_secs = age.as_secs(),
                    "Worker record is stale"
                );
                stale_workers.push(worker.pid);
            }
        }
        stale_workers.sort_unstable();

        Ok(MonitorReport {
            supervisor,
            restarted,
            active_workers,
            queue_depths,
            stale_workers,
        })
    }

    /// Runs passes every interval until `shutdown` fires. Failed passes are
    /// logged and retried on the next tick.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "Monitor started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Monitor received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    match self.check_once().await {
                        Ok(report) if !report.restarted.is_empty() => {
                            info!(restarted = ?report.restarted, "Monitor restarted workers");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Monitor pass failed"),
                    }
                }
            }
        }

        info!("Monitor stopped");
    }
}
