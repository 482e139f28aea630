//! Worker runner: the loop a worker process runs for its queue.
//!
//! The runner registers a worker record for its pid, then repeatedly
//! dequeues and runs jobs until it receives a shutdown signal. The record is
//! flipped to RUNNING around each job and refreshed on every idle timeout, so
//! its `updated_at` doubles as a heartbeat. The record is removed on exit.
//!
//! Shutdown is checked between dequeues; a dequeue already waiting is allowed
//! to finish so a popped job is always run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::job::{BackgroundJob, JobStatus};
use super::service::BackgroundJobs;
use super::types::QueueName;
use super::worker::{WorkerRecord, WorkerStatus};
use crate::error::JobError;

/// Settings for a [`WorkerRunner`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Queue drained by this worker.
    pub queue: QueueName,
    /// Pid the worker record is keyed by.
    pub pid: u32,
    /// How long each dequeue waits. Must stay below the store's idle timeout.
    pub dequeue_timeout: Duration,
    /// Pause after a failed dequeue before trying again.
    pub error_backoff: Duration,
}

impl RunnerConfig {
    pub fn new(queue: QueueName) -> Self {
        Self {
            queue,
            pid: std::process::id(),
            dequeue_timeout: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }
}

/// Counters of a runner's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerStats {
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub total_duration: Duration,
}

impl RunnerStats {
    pub fn total_processed(&self) -> u64 {
        self.jobs_succeeded + self.jobs_failed
    }
}

struct SharedRunnerStats {
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl SharedRunnerStats {
    fn new() -> Self {
        Self {
            jobs_succeeded: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
        }
    }

    fn record(&self, succeeded: bool, duration: Duration) {
        if succeeded {
            self.jobs_succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn snapshot(&self) -> RunnerStats {
        RunnerStats {
            jobs_succeeded: self.jobs_succeeded.load(Ordering::SeqCst),
            jobs_failed: self.jobs_failed.load(Ordering::SeqCst),
            total_duration: Duration::from_millis(self.total_duration_ms.load(Ordering::SeqCst)),
        }
    }
}

/// Dequeue-and-run loop for one queue.
pub struct WorkerRunner {
    jobs: Arc<BackgroundJobs>,
    config: RunnerConfig,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
    stats: Arc<SharedRunnerStats>,
}

impl WorkerRunner {
    pub fn new(jobs: Arc<BackgroundJobs>, config: RunnerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Self {
            jobs,
            config,
            shutdown_tx,
            shutdown_rx,
            stats: Arc::new(SharedRunnerStats::new()),
        }
    }

    /// Sender that stops the loop once the current dequeue or job finishes.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn stats(&self) -> RunnerStats {
        self.stats.snapshot()
    }

    /// Runs until shutdown and returns the final counters.
    ///
    /// # Errors
    ///
    /// Fails only if the worker record cannot be registered; errors inside
    /// the loop are logged and the loop continues.
    pub async fn run(mut self) -> Result<RunnerStats, JobError> {
        let pid = self.config.pid;
        let queue = self.config.queue;
        let orchestrator = self.jobs.orchestrator();

        orchestrator
            .register_worker(&WorkerRecord::new(pid, queue, WorkerStatus::Idle))
            .await?;
        info!(pid = pid, queue = %queue, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(pid = pid, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self
                .jobs
                .dispatcher()
                .dequeue(queue, self.config.dequeue_timeout)
                .await
            {
                Ok(Some(job)) => self.process_job(job).await,
                Ok(None) => {
                    debug!(pid = pid, queue = %queue, "No jobs available");
                    self.set_status(WorkerStatus::Idle).await;
                }
                Err(e) => {
                    error!(pid = pid, queue = %queue, error = %e, "Failed to dequeue job");
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }

        if let Err(e) = orchestrator.unregister_worker(pid).await {
            warn!(pid = pid, error = %e, "Failed to unregister worker");
        }

        let stats = self.stats.snapshot();
        info!(
            pid = pid,
            succeeded = stats.jobs_succeeded,
            failed = stats.jobs_failed,
            "Worker stopped"
        );
        Ok(stats)
    }

    async fn process_job(&self, mut job: BackgroundJob) {
        self.set_status(WorkerStatus::Running).await;

        let start = Instant::now();
        let succeeded = match self.jobs.dispatcher().run(&mut job).await {
            Ok(_) => job.status() == JobStatus::Success,
            Err(e) => {
                error!(
                    pid = self.config.pid,
                    job_id = %job.id(),
                    error = %e,
                    "Failed to run job"
                );
                false
            }
        };
        self.stats.record(succeeded, start.elapsed());

        self.set_status(WorkerStatus::Idle).await;
    }

    async fn set_status(&self, status: WorkerStatus) {
        if let Err(e) = self
            .jobs
            .orchestrator()
            .update_worker_status(self.config.pid, status)
            .await
        {
            warn!(pid = self.config.pid, error = %e, "Failed to update worker status");
        }
    }
}
