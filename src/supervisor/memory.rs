//! In-process stand-in for the supervisor daemon.
//!
//! Keeps a process table and applies the daemon's start/stop rules to it:
//! unknown names fault with `BAD_NAME`, starting a running process faults
//! with `ALREADY_STARTED`, stopping a stopped one faults with `NOT_RUNNING`,
//! and group starts only touch processes that are not running.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::process::{
    faults, GroupActionResult, ProcessInfo, ProcessState, ProcessSupervisor, SupervisorError,
    SupervisorState,
};

/// First pid handed out to started processes.
const FIRST_PID: u32 = 1000;

/// In-memory implementation of [`ProcessSupervisor`].
pub struct MemorySupervisor {
    processes: Mutex<Vec<ProcessInfo>>,
    next_pid: AtomicU32,
    /// Log of control calls, e.g. `startProcess workers:default_00`.
    calls: Mutex<Vec<String>>,
}

impl Default for MemorySupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySupervisor {
    pub fn new() -> Self {
        Self {
            processes: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(FIRST_PID),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Adds stopped processes to a group.
    pub fn with_processes(self, group: &str, names: &[&str]) -> Self {
        {
            let mut processes = self.lock_processes();
            for name in names {
                processes.push(ProcessInfo {
                    name: name.to_string(),
                    group: group.to_string(),
                    pid: 0,
                    state: ProcessState::Stopped,
                    description: "Not started".to_string(),
                });
            }
        }
        self
    }

    /// Forces a process into a state, e.g. to simulate a crash.
    pub fn set_state(&self, full_name: &str, state: ProcessState) {
        let mut processes = self.lock_processes();
        if let Some(process) = processes.iter_mut().find(|p| p.full_name() == full_name) {
            process.state = state;
            if !state.is_running() {
                process.pid = 0;
            }
        }
    }

    /// Returns a snapshot of one process.
    pub fn process(&self, full_name: &str) -> Option<ProcessInfo> {
        self.lock_processes()
            .iter()
            .find(|p| p.full_name() == full_name)
            .cloned()
    }

    /// Returns the control calls received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    fn lock_processes(&self) -> std::sync::MutexGuard<'_, Vec<ProcessInfo>> {
        self.processes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn start(&self, process: &mut ProcessInfo) {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        process.pid = pid;
        process.state = ProcessState::Running;
        process.description = format!("pid {}, uptime 0:00:00", pid);
    }

    fn stop(process: &mut ProcessInfo) {
        process.pid = 0;
        process.state = ProcessState::Stopped;
        process.description = "Stopped".to_string();
    }
}

fn bad_name(name: &str) -> SupervisorError {
    SupervisorError::Fault {
        code: faults::BAD_NAME,
        message: format!("BAD_NAME: {}", name),
    }
}

fn action_result(process: &ProcessInfo) -> GroupActionResult {
    GroupActionResult {
        name: process.name.clone(),
        group: process.group.clone(),
        status: faults::SUCCESS,
        description: "OK".to_string(),
    }
}

#[async_trait]
impl ProcessSupervisor for MemorySupervisor {
    async fn get_state(&self) -> Result<SupervisorState, SupervisorError> {
        Ok(SupervisorState::running())
    }

    async fn get_all_process_info(&self) -> Result<Vec<ProcessInfo>, SupervisorError> {
        Ok(self.lock_processes().clone())
    }

    async fn start_process(&self, name: &str, wait: bool) -> Result<bool, SupervisorError> {
        self.record(format!("startProcess {} wait={}", name, wait));
        let mut processes = self.lock_processes();
        let process = processes
            .iter_mut()
            .find(|p| p.full_name() == name)
            .ok_or_else(|| bad_name(name))?;

        if process.state.is_running() {
            return Err(SupervisorError::Fault {
                code: faults::ALREADY_STARTED,
                message: format!("ALREADY_STARTED: {}", name),
            });
        }

        self.start(process);
        Ok(true)
    }

    async fn stop_process(&self, name: &str, wait: bool) -> Result<bool, SupervisorError> {
        self.record(format!("stopProcess {} wait={}", name, wait));
        let mut processes = self.lock_processes();
        let process = processes
            .iter_mut()
            .find(|p| p.full_name() == name)
            .ok_or_else(|| bad_name(name))?;

        if !process.state.is_running() {
            return Err(SupervisorError::Fault {
                code: faults::NOT_RUNNING,
                message: format!("NOT_RUNNING: {}", name),
            });
        }

        Self::stop(process);
        Ok(true)
    }

    async fn start_process_group(
        &self,
        group: &str,
        wait: bool,
    ) -> Result<Vec<GroupActionResult>, SupervisorError> {
        self.record(format!("startProcessGroup {} wait={}", group, wait));
        let mut processes = self.lock_processes();
        if !processes.iter().any(|p| p.group == group) {
            return Err(bad_name(group));
        }

        let mut results = Vec::new();
        for process in processes
            .iter_mut()
            .filter(|p| p.group == group && !p.state.is_running())
        {
            self.start(process);
            results.push(action_result(process));
        }
        Ok(results)
    }

    async fn stop_process_group(
        &self,
        group: &str,
        wait: bool,
    ) -> Result<Vec<GroupActionResult>, SupervisorError> {
        self.record(format!("stopProcessGroup {} wait={}", group, wait));
        let mut processes = self.lock_processes();
        if !processes.iter().any(|p| p.group == group) {
            return Err(bad_name(group));
        }

        let mut results = Vec::new();
        for process in processes
            .iter_mut()
            .filter(|p| p.group == group && p.state.is_running())
        {
            Self::stop(process);
            results.push(action_result(process));
        }
        Ok(results)
    }
}
