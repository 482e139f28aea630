//! Worker orchestrator: worker status records and worker process control.
//!
//! Two independent views of a worker exist. The supervisor daemon owns the
//! process and is authoritative for whether it is alive. The worker record at
//! `worker_status:<pid>` is what the worker last reported about itself; it is
//! advisory and can outlive a crashed process.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::types::{worker_status_key, WORKER_PROCESS_GROUP, WORKER_STATUS_PREFIX};
use super::worker::{WorkerRecord, WorkerStatus};
use super::worker_name::{WorkerName, WorkerRef};
use crate::error::JobError;
use crate::store::{scan_all, QueueStore};
use crate::supervisor::{GroupActionResult, ProcessInfo, ProcessSupervisor, SupervisorState};

/// Result of [`WorkerOrchestrator::update_worker_status`].
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    /// The record existed and was rewritten.
    Updated(WorkerRecord),
    /// No record for the pid; nothing was written.
    WorkerNotFound,
}

/// Manages worker records in the store and worker processes in the supervisor.
pub struct WorkerOrchestrator {
    store: Arc<dyn QueueStore>,
    supervisor: Arc<dyn ProcessSupervisor>,
}

impl WorkerOrchestrator {
    pub fn new(store: Arc<dyn QueueStore>, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        Self { store, supervisor }
    }

    /// Writes the record unconditionally, replacing any previous one for the pid.
    pub async fn register_worker(&self, worker: &WorkerRecord) -> Result<(), JobError> {
        self.store
            .set(&worker_status_key(worker.pid), worker.to_json()?)
            .await?;
        debug!(pid = worker.pid, queue = %worker.queue, "Worker registered");
        Ok(())
    }

    /// Sets the status of an existing record and stamps `updated_at`.
    ///
    /// A missing record is logged and reported as
    /// [`StatusUpdate::WorkerNotFound`] rather than an error.
    pub async fn update_worker_status(
        &self,
        pid: u32,
        status: WorkerStatus,
    ) -> Result<StatusUpdate, JobError> {
        let Some(mut worker) = self.get_worker(pid).await? else {
            warn!(pid = pid, "updateWorkerStatus: worker with PID: {} not found.", pid);
            return Ok(StatusUpdate::WorkerNotFound);
        };

        worker.status = status;
        worker.updated_at = Utc::now();
        self.store.set(&worker_status_key(pid), worker.to_json()?).await?;

        Ok(StatusUpdate::Updated(worker))
    }

    /// Deletes the record for `pid`; a missing record is not an error.
    pub async fn unregister_worker(&self, pid: u32) -> Result<(), JobError> {
        self.store.delete(&worker_status_key(pid)).await?;
        debug!(pid = pid, "Worker unregistered");
        Ok(())
    }

    pub async fn get_worker(&self, pid: u32) -> Result<Option<WorkerRecord>, JobError> {
        let Some(raw) = self.store.get(&worker_status_key(pid)).await? else {
            return Ok(None);
        };
        Ok(Some(WorkerRecord::from_json(&raw)?))
    }

    /// Returns every registered worker record.
    ///
    /// Keys are collected with a full cursor scan and fetched with a single
    /// multi-get. Records removed between the two steps are skipped. Records
    /// that fail to decode are logged and skipped. The result is a snapshot in
    /// no particular order.
    pub async fn get_workers(&self) -> Result<Vec<WorkerRecord>, JobError> {
        let pattern = format!("{}:*", WORKER_STATUS_PREFIX);
        let keys = scan_all(self.store.as_ref(), &pattern).await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values = self.store.get_many(&keys).await?;
        let mut workers = Vec::with_capacity(values.len());
        for (key, value) in keys.iter().zip(values) {
            let Some(raw) = value else {
                continue;
            };
            match WorkerRecord::from_json(&raw) {
                Ok(worker) => workers.push(worker),
                Err(e) => warn!(key = %key, error = %e, "Skipping malformed worker record"),
            }
        }

        Ok(workers)
    }

    /// Starts one worker process by name.
    pub async fn start_worker(&self, name: &WorkerName, wait: bool) -> Result<bool, JobError> {
        info!(worker = %name, wait = wait, "Starting worker");
        Ok(self
            .supervisor
            .start_process(&name.process_address(), wait)
            .await?)
    }

    /// Stops one worker process, addressed by name or by pid.
    ///
    /// A pid is first resolved to its process in the worker group; no match
    /// fails with `JobError::NotFound`.
    pub async fn stop_worker(&self, worker: &WorkerRef, wait: bool) -> Result<bool, JobError> {
        let name = match worker {
            WorkerRef::Name(name) => name.clone(),
            WorkerRef::Pid(pid) => {
                let process = self.process_by_pid(*pid).await?;
                process.name.parse::<WorkerName>()?
            }
        };

        info!(worker = %name, wait = wait, "Stopping worker");
        Ok(self
            .supervisor
            .stop_process(&name.process_address(), wait)
            .await?)
    }

    /// Stops the whole worker group, then starts it again.
    ///
    /// Returns the per-process results of the start.
    pub async fn restart_workers(&self, wait: bool) -> Result<Vec<GroupActionResult>, JobError> {
        let stopped = self
            .supervisor
            .stop_process_group(WORKER_PROCESS_GROUP, wait)
            .await?;
        debug!(stopped = stopped.len(), "Worker group stopped");

        let started = self
            .supervisor
            .start_process_group(WORKER_PROCESS_GROUP, wait)
            .await?;
        info!(started = started.len(), "Workers restarted");
        Ok(started)
    }

    /// Starts every worker process of the group that is not running.
    ///
    /// Running processes are left alone, so this is safe to call periodically.
    pub async fn restart_dead_workers(
        &self,
        wait: bool,
    ) -> Result<Vec<GroupActionResult>, JobError> {
        let started = self
            .supervisor
            .start_process_group(WORKER_PROCESS_GROUP, wait)
            .await?;

        for result in &started {
            if result.is_success() {
                info!(worker = %result.name, "Restarted dead worker");
            } else {
                warn!(
                    worker = %result.name,
                    status = result.status,
                    description = %result.description,
                    "Failed to restart dead worker"
                );
            }
        }

        Ok(started)
    }

    /// Processes of the worker group as seen by the supervisor.
    pub async fn worker_processes(&self) -> Result<Vec<ProcessInfo>, JobError> {
        Ok(self
            .supervisor
            .get_all_process_info()
            .await?
            .into_iter()
            .filter(|process| process.group == WORKER_PROCESS_GROUP)
            .collect())
    }

    pub async fn supervisor_state(&self) -> Result<SupervisorState, JobError> {
        Ok(self.supervisor.get_state().await?)
    }

    async fn process_by_pid(&self, pid: u32) -> Result<ProcessInfo, JobError> {
        self.worker_processes()
            .await?
            .into_iter()
            .find(|process| process.pid != 0 && process.pid == pid)
            .ok_or_else(|| JobError::NotFound(format!("Worker with pid={} not found.", pid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::QueueName;
    use crate::store::MemoryStore;
    use crate::supervisor::{MemorySupervisor, ProcessState};

    fn orchestrator() -> (WorkerOrchestrator, Arc<MemorySupervisor>) {
        let supervisor = Arc::new(
            MemorySupervisor::new()
                .with_processes(WORKER_PROCESS_GROUP, &["default_00", "email_00"])
                .with_processes("other", &["default_00"]),
        );
        let orchestrator = WorkerOrchestrator::new(
            Arc::new(MemoryStore::new().with_scan_batch(1)),
            Arc::clone(&supervisor) as Arc<dyn ProcessSupervisor>,
        );
        (orchestrator, supervisor)
    }

    #[tokio::test]
    async fn test_register_get_unregister() {
        let (orch, _) = orchestrator();
        let worker = WorkerRecord::new(321, QueueName::Prio, WorkerStatus::Idle);
        orch.register_worker(&worker).await.unwrap();

        let loaded = orch.get_worker(321).await.unwrap().unwrap();
        assert_eq!(loaded.pid, 321);
        assert_eq!(loaded.queue, QueueName::Prio);
        assert_eq!(loaded.status, WorkerStatus::Idle);

        orch.unregister_worker(321).await.unwrap();
        assert!(orch.get_worker(321).await.unwrap().is_none());
        // second unregister is fine
        orch.unregister_worker(321).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_worker_status() {
        let (orch, _) = orchestrator();
        let worker = WorkerRecord::new(5, QueueName::Default, WorkerStatus::Idle);
        orch.register_worker(&worker).await.unwrap();

        let update = orch.update_worker_status(5, WorkerStatus::Running).await.unwrap();
        let StatusUpdate::Updated(updated) = update else {
            panic!("expected update");
        };
        assert_eq!(updated.status, WorkerStatus::Running);
        assert!(updated.updated_at >= worker.updated_at);
        assert_eq!(updated.created_at, worker.created_at);

        let missing = orch.update_worker_status(6, WorkerStatus::Running).await.unwrap();
        assert_eq!(missing, StatusUpdate::WorkerNotFound);
        assert!(orch.get_worker(6).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_workers_follows_cursor() {
        let (orch, _) = orchestrator();
        for pid in [30, 10, 20] {
            orch.register_worker(&WorkerRecord::new(pid, QueueName::Cache, WorkerStatus::Idle))
                .await
                .unwrap();
        }

        let mut pids: Vec<u32> = orch.get_workers().await.unwrap().iter().map(|w| w.pid).collect();
        pids.sort_unstable();
        assert_eq!(pids, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_start_and_stop_by_name() {
        let (orch, sup) = orchestrator();
        let name: WorkerName = "default_00".parse().unwrap();

        assert!(orch.start_worker(&name, false).await.unwrap());
        let process = sup.process("jobvisor-workers:default_00").unwrap();
        assert_eq!(process.state, ProcessState::Running);
        // same name in another group untouched
        assert_eq!(sup.process("other:default_00").unwrap().state, ProcessState::Stopped);

        assert!(orch.stop_worker(&WorkerRef::Name(name), true).await.unwrap());
        assert_eq!(
            sup.process("jobvisor-workers:default_00").unwrap().state,
            ProcessState::Stopped
        );
    }

    #[tokio::test]
    async fn test_stop_by_pid() {
        let (orch, sup) = orchestrator();
        orch.restart_dead_workers(false).await.unwrap();
        let pid = sup.process("jobvisor-workers:email_00").unwrap().pid;

        assert!(orch.stop_worker(&WorkerRef::Pid(pid), false).await.unwrap());
        assert_eq!(
            sup.process("jobvisor-workers:email_00").unwrap().state,
            ProcessState::Stopped
        );

        let err = orch.stop_worker(&WorkerRef::Pid(1), false).await.unwrap_err();
        assert!(matches!(err, JobError::NotFound(ref msg) if msg == "Worker with pid=1 not found."));
    }

    #[tokio::test]
    async fn test_stop_by_pid_ignores_other_groups() {
        let (orch, sup) = orchestrator();
        sup.start_process("other:default_00", false).await.unwrap();
        let pid = sup.process("other:default_00").unwrap().pid;

        let err = orch.stop_worker(&WorkerRef::Pid(pid), false).await.unwrap_err();
        assert!(matches!(err, JobError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_restart_dead_workers_only_starts_stopped() {
        let (orch, sup) = orchestrator();
        orch.start_worker(&"default_00".parse().unwrap(), false)
            .await
            .unwrap();
        let pid = sup.process("jobvisor-workers:default_00").unwrap().pid;

        let started = orch.restart_dead_workers(false).await.unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].name, "email_00");
        assert_eq!(sup.process("jobvisor-workers:default_00").unwrap().pid, pid);
    }

    #[tokio::test]
    async fn test_restart_workers_cycles_group() {
        let (orch, sup) = orchestrator();
        orch.restart_dead_workers(false).await.unwrap();
        let before = sup.process("jobvisor-workers:default_00").unwrap().pid;

        let started = orch.restart_workers(true).await.unwrap();
        assert_eq!(started.len(), 2);
        let after = sup.process("jobvisor-workers:default_00").unwrap().pid;
        assert_ne!(before, after);

        let calls = sup.calls();
        assert!(calls.contains(&"stopProcessGroup jobvisor-workers wait=true".to_string()));
        assert!(calls.contains(&"startProcessGroup jobvisor-workers wait=true".to_string()));
    }

    #[tokio::test]
    async fn test_worker_processes_filters_group() {
        let (orch, _) = orchestrator();
        let processes = orch.worker_processes().await.unwrap();
        assert_eq!(processes.len(), 2);
        assert!(processes.iter().all(|p| p.group == WORKER_PROCESS_GROUP));
        assert!(orch.supervisor_state().await.unwrap().is_running());
    }
}
