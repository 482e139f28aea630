//! Entry point wiring the store, the supervisor client and the handlers.

use std::sync::Arc;

use tracing::info;

use super::dispatcher::{JobDispatcher, JobLinker, StatusTtl};
use super::handler::HandlerRegistry;
use super::orchestrator::WorkerOrchestrator;
use crate::config::BackgroundJobsConfig;
use crate::error::JobError;
use crate::store::{QueueStore, RedisStore};
use crate::supervisor::{ProcessSupervisor, SupervisorClient};

/// Background job subsystem: a [`JobDispatcher`] and a [`WorkerOrchestrator`]
/// sharing one store connection.
pub struct BackgroundJobs {
    config: BackgroundJobsConfig,
    store: Arc<dyn QueueStore>,
    dispatcher: JobDispatcher,
    orchestrator: WorkerOrchestrator,
}

impl BackgroundJobs {
    /// Connects to Redis and prepares the supervisor client.
    ///
    /// The supervisor is not contacted here; only building its client can fail.
    ///
    /// # Errors
    ///
    /// - `JobError::Disabled` when background jobs are switched off
    /// - `JobError::Config` when the configuration does not validate
    /// - `JobError::Store` when Redis is unreachable
    /// - `JobError::Supervisor` when the supervisor client cannot be built
    pub async fn connect(config: BackgroundJobsConfig) -> Result<Self, JobError> {
        if !config.enabled {
            return Err(JobError::Disabled);
        }
        config.validate()?;

        let store = RedisStore::connect(config.redis_connection_info(), &config.redis_namespace).await?;
        let supervisor = SupervisorClient::from_config(&config)?;
        let handlers = HandlerRegistry::shell(&config.console_path);

        info!(
            redis = %format!("{}:{}/{}", config.redis_host, config.redis_port, config.redis_database),
            supervisor = %supervisor.endpoint(),
            "Background jobs connected"
        );

        Self::with_backends(config, Arc::new(store), Arc::new(supervisor), handlers)
    }

    /// Builds the subsystem on top of existing backends.
    pub fn with_backends(
        config: BackgroundJobsConfig,
        store: Arc<dyn QueueStore>,
        supervisor: Arc<dyn ProcessSupervisor>,
        handlers: HandlerRegistry,
    ) -> Result<Self, JobError> {
        if !config.enabled {
            return Err(JobError::Disabled);
        }

        let dispatcher =
            JobDispatcher::new(Arc::clone(&store), handlers, StatusTtl::from_config(&config));
        let orchestrator = WorkerOrchestrator::new(Arc::clone(&store), supervisor);

        Ok(Self {
            config,
            store,
            dispatcher,
            orchestrator,
        })
    }

    /// Sets the collaborator notified of related-record links on enqueue.
    pub fn with_linker(mut self, linker: Arc<dyn JobLinker>) -> Self {
        self.dispatcher = self.dispatcher.with_linker(linker);
        self
    }

    pub fn config(&self) -> &BackgroundJobsConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    pub fn orchestrator(&self) -> &WorkerOrchestrator {
        &self.orchestrator
    }

    /// Checks that the store answers.
    pub async fn ping(&self) -> Result<(), JobError> {
        Ok(self.store.ping().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::supervisor::MemorySupervisor;

    #[tokio::test]
    async fn test_connect_disabled() {
        let config = BackgroundJobsConfig {
            enabled: false,
            ..Default::default()
        };
        let err = BackgroundJobs::connect(config).await.err().unwrap();
        assert!(matches!(err, JobError::Disabled));
    }

    #[tokio::test]
    async fn test_connect_invalid_config() {
        let config = BackgroundJobsConfig {
            redis_host: String::new(),
            ..Default::default()
        };
        let err = BackgroundJobs::connect(config).await.err().unwrap();
        assert!(matches!(err, JobError::Config(_)));
    }

    #[tokio::test]
    async fn test_with_backends() {
        let jobs = BackgroundJobs::with_backends(
            BackgroundJobsConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySupervisor::new()),
            HandlerRegistry::new(),
        )
        .unwrap();

        jobs.ping().await.unwrap();
        assert_eq!(
            jobs.dispatcher().status_ttl().max_job_history,
            jobs.config().max_job_history()
        );
    }
}
