//! Job dispatcher: queues jobs, hands them to workers and tracks their status.
//!
//! Jobs are serialized to JSON and pushed onto a store list named after the
//! queue. Alongside, every job has a status record at `job_status:<id>` that
//! expires after the configured history TTL. Delivery relies on the store's
//! blocking pop handing each element to exactly one caller; no locks are taken
//! and status records are last-writer-wins.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::handler::HandlerRegistry;
use super::job::{BackgroundJob, EnqueueOptions, JobStatus};
use super::types::{job_status_key, CommandKind, QueueName};
use crate::config::BackgroundJobsConfig;
use crate::error::JobError;
use crate::metrics::MetricsCollector;
use crate::store::QueueStore;

/// Links a caller-side record to the job created for it.
///
/// Invoked after a successful enqueue that carried a related id. Failures are
/// logged and never fail the enqueue.
#[async_trait]
pub trait JobLinker: Send + Sync {
    async fn link(&self, related_id: i64, job_id: &str) -> Result<(), JobError>;
}

/// Linker that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLinker;

#[async_trait]
impl JobLinker for NoopLinker {
    async fn link(&self, _related_id: i64, _job_id: &str) -> Result<(), JobError> {
        Ok(())
    }
}

/// TTLs applied to job status records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTtl {
    /// Lifetime of tracked jobs' records.
    pub max_job_history: Duration,
    /// Lifetime of untracked jobs' records, capped by `max_job_history`.
    pub untracked: Duration,
}

impl StatusTtl {
    pub fn from_config(config: &BackgroundJobsConfig) -> Self {
        Self {
            max_job_history: config.max_job_history(),
            untracked: config.track_status(),
        }
    }

    pub fn for_job(&self, job: &BackgroundJob) -> Duration {
        if job.track_status() {
            self.max_job_history
        } else {
            self.untracked.min(self.max_job_history)
        }
    }
}

impl Default for StatusTtl {
    fn default() -> Self {
        Self::from_config(&BackgroundJobsConfig::default())
    }
}

/// Enqueues, dequeues and runs background jobs.
pub struct JobDispatcher {
    store: Arc<dyn QueueStore>,
    handlers: HandlerRegistry,
    linker: Arc<dyn JobLinker>,
    ttl: StatusTtl,
    metrics: MetricsCollector,
}

impl JobDispatcher {
    pub fn new(store: Arc<dyn QueueStore>, handlers: HandlerRegistry, ttl: StatusTtl) -> Self {
        Self {
            store,
            handlers,
            linker: Arc::new(NoopLinker),
            ttl,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_linker(mut self, linker: Arc<dyn JobLinker>) -> Self {
        self.linker = linker;
        self
    }

    pub fn status_ttl(&self) -> StatusTtl {
        self.ttl
    }

    /// Creates a job, writes its status record and appends it to the tail of
    /// `queue`. Returns the new job id.
    pub async fn enqueue(
        &self,
        queue: QueueName,
        command: CommandKind,
        args: Vec<String>,
        options: EnqueueOptions,
    ) -> Result<String, JobError> {
        let mut job = BackgroundJob::new(queue, command, args)
            .with_track_status(options.track_status.unwrap_or(true))
            .with_metadata(options.metadata);

        // The record must exist before the job is visible to workers, or a
        // fast worker's RUNNING/terminal write could be overwritten with NEW.
        self.update(&mut job).await?;
        self.store.push_back(queue.as_str(), job.to_json()?).await?;

        debug!(
            job_id = %job.id(),
            queue = %queue,
            command = %command,
            "Job enqueued"
        );
        self.metrics.record_enqueue(queue.as_str());

        if let Some(related_id) = options.related_id {
            if let Err(e) = self.linker.link(related_id, job.id()).await {
                warn!(
                    job_id = %job.id(),
                    related_id = related_id,
                    error = %e,
                    "Failed to link job to related record"
                );
            }
        }

        Ok(job.id().to_string())
    }

    /// Same as [`enqueue`](Self::enqueue) with queue and command given by name.
    ///
    /// # Errors
    ///
    /// Returns `JobError::InvalidArgument` for an unknown queue or command,
    /// before anything is written.
    pub async fn enqueue_named(
        &self,
        queue: &str,
        command: &str,
        args: Vec<String>,
        options: EnqueueOptions,
    ) -> Result<String, JobError> {
        let queue: QueueName = queue.parse()?;
        let command: CommandKind = command.parse()?;
        self.enqueue(queue, command, args, options).await
    }

    /// Pops the head of `queue`, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. A payload that does not
    /// decode as a job is logged and dropped, and also yields `Ok(None)`.
    ///
    /// `timeout` must be non-zero and shorter than the store connection's idle
    /// timeout.
    pub async fn dequeue(
        &self,
        queue: QueueName,
        timeout: Duration,
    ) -> Result<Option<BackgroundJob>, JobError> {
        if timeout.is_zero() {
            return Err(JobError::InvalidArgument(
                "Dequeue timeout must be greater than zero.".to_string(),
            ));
        }

        let Some(raw) = self.store.blocking_pop_front(queue.as_str(), timeout).await? else {
            return Ok(None);
        };

        match BackgroundJob::from_json(&raw) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                error!(
                    queue = %queue,
                    payload = %raw,
                    error = %e,
                    "Failed to parse job, invalid format"
                );
                Ok(None)
            }
        }
    }

    /// Reads a job's status record. Unknown or expired ids yield `None`.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<BackgroundJob>, JobError> {
        let Some(raw) = self.store.get(&job_status_key(job_id)).await? else {
            return Ok(None);
        };
        Ok(Some(BackgroundJob::from_json(&raw)?))
    }

    /// Stamps `updated_at` and overwrites the job's status record.
    pub async fn update(&self, job: &mut BackgroundJob) -> Result<(), JobError> {
        job.touch();
        self.store
            .set_with_ttl(&job_status_key(job.id()), job.to_json()?, self.ttl.for_job(job))
            .await?;
        Ok(())
    }

    /// Runs a job to completion and returns its return code.
    ///
    /// The job is persisted as RUNNING before the handler starts and with its
    /// terminal status afterwards. A handler that cannot be executed at all
    /// marks the job FAILED with return code -1.
    pub async fn run(&self, job: &mut BackgroundJob) -> Result<i32, JobError> {
        job.set_status(JobStatus::Running);
        info!(
            job_id = %job.id(),
            queue = %job.queue(),
            command = %job.command(),
            "[JOB ID: {}] - started.",
            job.id()
        );
        self.update(job).await?;

        let start = Instant::now();
        match self.handlers.execute(job).await {
            Ok(outcome) => job.complete(outcome.return_code, outcome.output, outcome.error),
            Err(e) => {
                error!(job_id = %job.id(), error = %e, "Job handler could not be executed");
                job.complete(-1, None, Some(e.to_string()));
            }
        }
        let duration = start.elapsed();

        self.update(job).await?;

        let return_code = job.return_code().unwrap_or(-1);
        self.metrics.record_job(
            job.queue().as_str(),
            &job.status().to_string(),
            duration.as_secs_f64(),
        );

        if job.status() == JobStatus::Success {
            info!(
                job_id = %job.id(),
                duration_ms = duration.as_millis(),
                "[JOB ID: {}] - completed.",
                job.id()
            );
        } else {
            warn!(
                job_id = %job.id(),
                return_code = return_code,
                duration_ms = duration.as_millis(),
                "[JOB ID: {}] - failed.",
                job.id()
            );
        }

        Ok(return_code)
    }

    /// Number of jobs waiting in `queue`.
    pub async fn get_queue_size(&self, queue: QueueName) -> Result<usize, JobError> {
        Ok(self.store.list_len(queue.as_str()).await?)
    }

    /// Drops every pending job of `queue`. Returns whether there was anything to drop.
    pub async fn clear_queue(&self, queue: QueueName) -> Result<bool, JobError> {
        Ok(self.store.delete(queue.as_str()).await?)
    }

    /// Drops every pending job of `queue` and reports how many were waiting.
    ///
    /// Jobs pushed between the length read and the delete are dropped too
    /// but not counted.
    pub async fn purge_queue(&self, queue: QueueName) -> Result<usize, JobError> {
        let pending = self.store.list_len(queue.as_str()).await?;
        self.store.delete(queue.as_str()).await?;
        if pending > 0 {
            info!(queue = %queue, purged = pending, "Queue purged");
        }
        Ok(pending)
    }

    /// Every valid queue name.
    pub fn get_queues(&self) -> &'static [QueueName] {
        &QueueName::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::handler::{CommandHandler, HandlerOutcome};
    use crate::store::{MemoryStore, StoreError};
    use std::sync::Mutex;

    struct ExitWith(i32);

    #[async_trait]
    impl CommandHandler for ExitWith {
        async fn execute(&self, job: &BackgroundJob) -> Result<HandlerOutcome, JobError> {
            Ok(HandlerOutcome {
                return_code: self.0,
                output: Some(format!("ran {}", job.args().join(" "))),
                error: None,
            })
        }
    }

    #[derive(Default)]
    struct RecordingLinker {
        links: Mutex<Vec<(i64, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl JobLinker for RecordingLinker {
        async fn link(&self, related_id: i64, job_id: &str) -> Result<(), JobError> {
            if self.fail {
                return Err(JobError::Handler("link table unavailable".to_string()));
            }
            self.links.lock().unwrap().push((related_id, job_id.to_string()));
            Ok(())
        }
    }

    fn dispatcher(store: Arc<MemoryStore>, code: i32) -> JobDispatcher {
        let handlers = HandlerRegistry::new()
            .with_handler(CommandKind::Event, Arc::new(ExitWith(code)))
            .with_handler(CommandKind::Admin, Arc::new(ExitWith(code)));
        JobDispatcher::new(store, handlers, StatusTtl::default())
    }

    #[tokio::test]
    async fn test_enqueue_then_dequeue() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(Arc::clone(&store), 0);

        let id = dispatcher
            .enqueue(
                QueueName::Cache,
                CommandKind::Admin,
                vec!["cacheFeeds".into(), "all".into()],
                EnqueueOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(dispatcher.get_queue_size(QueueName::Cache).await.unwrap(), 1);

        let job = dispatcher
            .dequeue(QueueName::Cache, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.id(), id);
        assert_eq!(job.command(), CommandKind::Admin);
        assert_eq!(job.args(), ["cacheFeeds".to_string(), "all".to_string()]);
        assert_eq!(job.status(), JobStatus::New);
        assert_eq!(dispatcher.get_queue_size(QueueName::Cache).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fifo_within_queue() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(store, 0);

        let mut ids = Vec::new();
        for i in 0..3 {
            ids.push(
                dispatcher
                    .enqueue(
                        QueueName::Default,
                        CommandKind::Event,
                        vec![i.to_string()],
                        EnqueueOptions::new(),
                    )
                    .await
                    .unwrap(),
            );
        }

        for id in ids {
            let job = dispatcher
                .dequeue(QueueName::Default, Duration::from_secs(1))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(job.id(), id);
        }
    }

    #[tokio::test]
    async fn test_enqueue_named_rejects_before_store() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(Arc::clone(&store), 0);

        let err = dispatcher
            .enqueue_named("bogus", "event", vec![], EnqueueOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = dispatcher
            .enqueue_named("default", "shell", vec![], EnqueueOptions::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_status_ttl_policy() {
        let store = Arc::new(MemoryStore::new());
        let ttl = StatusTtl {
            max_job_history: Duration::from_secs(3600),
            untracked: Duration::from_secs(60),
        };
        let dispatcher = JobDispatcher::new(store.clone(), HandlerRegistry::new(), ttl);

        let tracked = dispatcher
            .enqueue(QueueName::Email, CommandKind::Event, vec![], EnqueueOptions::new())
            .await
            .unwrap();
        let untracked = dispatcher
            .enqueue(
                QueueName::Email,
                CommandKind::Event,
                vec![],
                EnqueueOptions::new().track_status(false),
            )
            .await
            .unwrap();

        let tracked_ttl = store.ttl(&job_status_key(&tracked)).unwrap();
        let untracked_ttl = store.ttl(&job_status_key(&untracked)).unwrap();
        assert!(tracked_ttl > Duration::from_secs(3500));
        assert!(untracked_ttl <= Duration::from_secs(60));

        let capped = StatusTtl {
            max_job_history: Duration::from_secs(30),
            untracked: Duration::from_secs(60),
        };
        let job = BackgroundJob::new(QueueName::Email, CommandKind::Event, vec![])
            .with_track_status(false);
        assert_eq!(capped.for_job(&job), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_poison_payload_is_dropped() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(Arc::clone(&store), 0);

        store.push_back("prio", "{not a job".to_string()).await.unwrap();
        let result = dispatcher
            .dequeue(QueueName::Prio, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(dispatcher.get_queue_size(QueueName::Prio).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_zero_timeout_rejected() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(store, 0);
        let err = dispatcher
            .dequeue(QueueName::Default, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_run_records_terminal_status() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(store, 4);

        let id = dispatcher
            .enqueue(QueueName::Email, CommandKind::Event, vec!["x".into()], EnqueueOptions::new())
            .await
            .unwrap();
        let mut job = dispatcher
            .dequeue(QueueName::Email, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        let code = dispatcher.run(&mut job).await.unwrap();
        assert_eq!(code, 4);

        let stored = dispatcher.get_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Failed);
        assert_eq!(stored.return_code(), Some(4));
        assert_eq!(stored.output(), Some("ran x"));
    }

    #[tokio::test]
    async fn test_run_without_handler_fails_job() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(store, 0);

        let mut job = BackgroundJob::new(QueueName::Default, CommandKind::Server, vec![]);
        let code = dispatcher.run(&mut job).await.unwrap();
        assert_eq!(code, -1);

        let stored = dispatcher.get_job(job.id()).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Failed);
        assert!(stored.error().unwrap().contains("server"));
    }

    #[tokio::test]
    async fn test_update_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(store, 0);

        let mut job = BackgroundJob::new(QueueName::Update, CommandKind::Admin, vec![]);
        dispatcher.update(&mut job).await.unwrap();
        let first = dispatcher.get_job(job.id()).await.unwrap().unwrap();
        dispatcher.update(&mut job).await.unwrap();
        let second = dispatcher.get_job(job.id()).await.unwrap().unwrap();

        assert_eq!(first.status(), second.status());
        assert_eq!(first.args(), second.args());
        assert!(second.updated_at() >= first.updated_at());
    }

    #[tokio::test]
    async fn test_get_job_missing() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(store, 0);
        assert!(dispatcher.get_job("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_linker_called_and_failure_ignored() {
        let store = Arc::new(MemoryStore::new());
        let linker = Arc::new(RecordingLinker::default());
        let linked = dispatcher(Arc::clone(&store), 0).with_linker(linker.clone());

        let id = linked
            .enqueue(
                QueueName::Default,
                CommandKind::Event,
                vec![],
                EnqueueOptions::new().related_id(99),
            )
            .await
            .unwrap();
        assert_eq!(*linker.links.lock().unwrap(), vec![(99, id)]);

        let failing = Arc::new(RecordingLinker {
            fail: true,
            ..Default::default()
        });
        let unlinked = dispatcher(store, 0).with_linker(failing);
        let id = unlinked
            .enqueue(
                QueueName::Default,
                CommandKind::Event,
                vec![],
                EnqueueOptions::new().related_id(100),
            )
            .await
            .unwrap();
        assert!(unlinked.get_job(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_and_purge_queue() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher(store, 0);

        assert!(!dispatcher.clear_queue(QueueName::Default).await.unwrap());
        for _ in 0..2 {
            dispatcher
                .enqueue(QueueName::Default, CommandKind::Event, vec![], EnqueueOptions::new())
                .await
                .unwrap();
        }
        assert!(dispatcher.clear_queue(QueueName::Default).await.unwrap());
        assert_eq!(dispatcher.get_queue_size(QueueName::Default).await.unwrap(), 0);

        for _ in 0..3 {
            dispatcher
                .enqueue(QueueName::Email, CommandKind::Event, vec![], EnqueueOptions::new())
                .await
                .unwrap();
        }
        assert_eq!(dispatcher.purge_queue(QueueName::Email).await.unwrap(), 3);
        assert_eq!(dispatcher.purge_queue(QueueName::Email).await.unwrap(), 0);
    }

    /// Store whose NEW status writes lag behind, like a slow round trip.
    struct LaggingStatusStore {
        inner: MemoryStore,
        lag: Duration,
    }

    #[async_trait]
    impl QueueStore for LaggingStatusStore {
        async fn push_back(&self, list: &str, value: String) -> Result<(), StoreError> {
            self.inner.push_back(list, value).await
        }

        async fn blocking_pop_front(
            &self,
            list: &str,
            timeout: Duration,
        ) -> Result<Option<String>, StoreError> {
            self.inner.blocking_pop_front(list, timeout).await
        }

        async fn list_len(&self, list: &str) -> Result<usize, StoreError> {
            self.inner.list_len(list).await
        }

        async fn delete(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.delete(key).await
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }

        async fn set_with_ttl(
            &self,
            key: &str,
            value: String,
            ttl: Duration,
        ) -> Result<(), StoreError> {
            if value.contains("\"status\":\"new\"") {
                tokio::time::sleep(self.lag).await;
            }
            self.inner.set_with_ttl(key, value, ttl).await
        }

        async fn scan(&self, cursor: u64, pattern: &str) -> Result<(u64, Vec<String>), StoreError> {
            self.inner.scan(cursor, pattern).await
        }

        async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
            self.inner.get_many(keys).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn test_enqueue_status_never_overwrites_waiting_worker() {
        let store = Arc::new(LaggingStatusStore {
            inner: MemoryStore::new(),
            lag: Duration::from_millis(50),
        });
        let handlers =
            HandlerRegistry::new().with_handler(CommandKind::Event, Arc::new(ExitWith(0)));
        let dispatcher = Arc::new(JobDispatcher::new(store, handlers, StatusTtl::default()));

        let worker = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let mut job = dispatcher
                    .dequeue(QueueName::Email, Duration::from_secs(2))
                    .await
                    .unwrap()
                    .expect("job should be delivered");
                let code = dispatcher.run(&mut job).await.unwrap();
                (job.id().to_string(), code)
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let id = dispatcher
            .enqueue(QueueName::Email, CommandKind::Event, vec![], EnqueueOptions::new())
            .await
            .unwrap();
        let (ran, code) = worker.await.unwrap();
        assert_eq!(ran, id);
        assert_eq!(code, 0);

        let stored = dispatcher.get_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.status(), JobStatus::Success);
        assert_eq!(stored.return_code(), Some(0));
    }

    #[test]
    fn test_get_queues() {
        let dispatcher = JobDispatcher::new(
            Arc::new(MemoryStore::new()),
            HandlerRegistry::new(),
            StatusTtl::default(),
        );
        let names: Vec<&str> = dispatcher.get_queues().iter().map(|q| q.as_str()).collect();
        assert_eq!(names, ["default", "email", "cache", "prio", "update"]);
    }
}
