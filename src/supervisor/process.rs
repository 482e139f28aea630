//! Process-control capability set and the values it exchanges.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::xmlrpc::Value;

/// Supervisor fault codes the orchestrator cares about.
pub mod faults {
    pub const BAD_NAME: i32 = 10;
    pub const ALREADY_STARTED: i32 = 60;
    pub const NOT_RUNNING: i32 = 70;
    pub const SUCCESS: i32 = 80;
}

/// Errors that can occur while talking to the process-control daemon.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The client could not be constructed.
    #[error("Supervisor connection failed: {0}")]
    ConnectionFailed(String),

    /// The HTTP request failed before a response arrived.
    #[error("Supervisor request failed: {0}")]
    RequestFailed(String),

    /// The daemon answered with a non-success HTTP status.
    #[error("Supervisor returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The daemon answered with an XML-RPC fault.
    #[error("Supervisor fault {code}: {message}")]
    Fault { code: i32, message: String },

    /// The response could not be decoded.
    #[error("Malformed supervisor response: {0}")]
    MalformedResponse(String),
}

impl SupervisorError {
    /// Returns whether this is an XML-RPC fault with the given code.
    pub fn is_fault(&self, fault_code: i32) -> bool {
        matches!(self, SupervisorError::Fault { code, .. } if *code == fault_code)
    }
}

/// Process states as reported by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Backoff,
    Stopping,
    Exited,
    Fatal,
    Unknown,
}

impl ProcessState {
    /// Maps a daemon state code to a state.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => ProcessState::Stopped,
            10 => ProcessState::Starting,
            20 => ProcessState::Running,
            30 => ProcessState::Backoff,
            40 => ProcessState::Stopping,
            100 => ProcessState::Exited,
            200 => ProcessState::Fatal,
            _ => ProcessState::Unknown,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            ProcessState::Stopped => 0,
            ProcessState::Starting => 10,
            ProcessState::Running => 20,
            ProcessState::Backoff => 30,
            ProcessState::Stopping => 40,
            ProcessState::Exited => 100,
            ProcessState::Fatal => 200,
            ProcessState::Unknown => 1000,
        }
    }

    /// States in which the daemon considers the process alive.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Backoff | ProcessState::Stopping
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Stopped => "STOPPED",
            ProcessState::Starting => "STARTING",
            ProcessState::Running => "RUNNING",
            ProcessState::Backoff => "BACKOFF",
            ProcessState::Stopping => "STOPPING",
            ProcessState::Exited => "EXITED",
            ProcessState::Fatal => "FATAL",
            ProcessState::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

/// One process managed by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub name: String,
    pub group: String,
    /// OS pid, 0 when not running.
    pub pid: u32,
    pub state: ProcessState,
    pub description: String,
}

impl ProcessInfo {
    /// `{group}:{name}`, the address accepted by start/stop calls.
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.group, self.name)
    }

    pub(crate) fn from_xmlrpc(value: &Value) -> Result<Self, SupervisorError> {
        let name = required_str(value, "name")?;
        let group = required_str(value, "group")?;
        let pid = value.get("pid").and_then(Value::as_i64).unwrap_or(0);
        let state = value
            .get("state")
            .and_then(Value::as_i64)
            .map(ProcessState::from_code)
            .unwrap_or(ProcessState::Unknown);
        let description = value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            name,
            group,
            pid: u32::try_from(pid).unwrap_or(0),
            state,
            description,
        })
    }
}

/// Per-process outcome of a group start/stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupActionResult {
    pub name: String,
    pub group: String,
    /// Fault code, [`faults::SUCCESS`] when the action succeeded.
    pub status: i32,
    pub description: String,
}

impl GroupActionResult {
    pub fn is_success(&self) -> bool {
        self.status == faults::SUCCESS
    }

    pub(crate) fn from_xmlrpc(value: &Value) -> Result<Self, SupervisorError> {
        Ok(Self {
            name: required_str(value, "name")?,
            group: required_str(value, "group")?,
            status: value
                .get("status")
                .and_then(Value::as_i64)
                .unwrap_or(faults::SUCCESS as i64) as i32,
            description: value
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

/// State of the daemon itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorState {
    /// 2 FATAL, 1 RUNNING, 0 RESTARTING, -1 SHUTDOWN.
    pub code: i64,
    pub name: String,
}

impl SupervisorState {
    pub fn running() -> Self {
        Self {
            code: 1,
            name: "RUNNING".to_string(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.code == 1
    }

    pub(crate) fn from_xmlrpc(value: &Value) -> Result<Self, SupervisorError> {
        Ok(Self {
            code: value
                .get("statecode")
                .and_then(Value::as_i64)
                .ok_or_else(|| SupervisorError::MalformedResponse("missing statecode".into()))?,
            name: required_str(value, "statename")?,
        })
    }
}

fn required_str(value: &Value, member: &str) -> Result<String, SupervisorError> {
    value
        .get(member)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SupervisorError::MalformedResponse(format!("missing '{}' member", member)))
}

/// Remote process-control operations used by the worker orchestrator.
///
/// Process names are addressed as `{group}:{name}`. `wait` asks the daemon to
/// return only once the process reached its target state.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn get_state(&self) -> Result<SupervisorState, SupervisorError>;

    async fn get_all_process_info(&self) -> Result<Vec<ProcessInfo>, SupervisorError>;

    async fn start_process(&self, name: &str, wait: bool) -> Result<bool, SupervisorError>;

    async fn stop_process(&self, name: &str, wait: bool) -> Result<bool, SupervisorError>;

    /// Starts every non-running process of the group; running ones are left alone.
    async fn start_process_group(
        &self,
        group: &str,
        wait: bool,
    ) -> Result<Vec<GroupActionResult>, SupervisorError>;

    /// Stops every running process of the group.
    async fn stop_process_group(
        &self,
        group: &str,
        wait: bool,
    ) -> Result<Vec<GroupActionResult>, SupervisorError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn process_value(pid: i64, state: i64) -> Value {
        let mut members = BTreeMap::new();
        members.insert("name".to_string(), Value::from("email_01"));
        members.insert("group".to_string(), Value::from("workers"));
        members.insert("pid".to_string(), Value::Int(pid));
        members.insert("state".to_string(), Value::Int(state));
        members.insert("description".to_string(), Value::from("pid 77"));
        Value::Struct(members)
    }

    #[test]
    fn test_process_state_codes() {
        for state in [
            ProcessState::Stopped,
            ProcessState::Starting,
            ProcessState::Running,
            ProcessState::Backoff,
            ProcessState::Stopping,
            ProcessState::Exited,
            ProcessState::Fatal,
        ] {
            assert_eq!(ProcessState::from_code(state.code()), state);
        }
        assert_eq!(ProcessState::from_code(12345), ProcessState::Unknown);
        assert!(ProcessState::Running.is_running());
        assert!(!ProcessState::Fatal.is_running());
        assert_eq!(ProcessState::Exited.to_string(), "EXITED");
    }

    #[test]
    fn test_process_info_from_xmlrpc() {
        let info = ProcessInfo::from_xmlrpc(&process_value(77, 20)).unwrap();
        assert_eq!(info.name, "email_01");
        assert_eq!(info.group, "workers");
        assert_eq!(info.pid, 77);
        assert_eq!(info.state, ProcessState::Running);
        assert_eq!(info.full_name(), "workers:email_01");
    }

    #[test]
    fn test_process_info_missing_name() {
        let err = ProcessInfo::from_xmlrpc(&Value::Struct(BTreeMap::new())).unwrap_err();
        assert!(matches!(err, SupervisorError::MalformedResponse(_)));
    }

    #[test]
    fn test_is_fault() {
        let err = SupervisorError::Fault {
            code: faults::ALREADY_STARTED,
            message: "ALREADY_STARTED".to_string(),
        };
        assert!(err.is_fault(faults::ALREADY_STARTED));
        assert!(!err.is_fault(faults::NOT_RUNNING));
        assert!(!SupervisorError::RequestFailed("x".into()).is_fault(faults::ALREADY_STARTED));
    }
}
