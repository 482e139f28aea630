//! Closed sets of queue names and command kinds, plus the store key layout.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Prefix of job status keys: `job_status:<job id>`.
pub const JOB_STATUS_PREFIX: &str = "job_status";

/// Prefix of worker status keys: `worker_status:<pid>`.
pub const WORKER_STATUS_PREFIX: &str = "worker_status";

/// Supervisor process group holding every worker process.
pub const WORKER_PROCESS_GROUP: &str = "jobvisor-workers";

/// Store key of a job's status record.
pub fn job_status_key(job_id: &str) -> String {
    format!("{}:{}", JOB_STATUS_PREFIX, job_id)
}

/// Store key of a worker's status record.
pub fn worker_status_key(pid: u32) -> String {
    format!("{}:{}", WORKER_STATUS_PREFIX, pid)
}

/// Named FIFO queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Default,
    Email,
    Cache,
    Prio,
    Update,
}

impl QueueName {
    /// Every queue, in declaration order.
    pub const ALL: [QueueName; 5] = [
        QueueName::Default,
        QueueName::Email,
        QueueName::Cache,
        QueueName::Prio,
        QueueName::Update,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Default => "default",
            QueueName::Email => "email",
            QueueName::Cache => "cache",
            QueueName::Prio => "prio",
            QueueName::Update => "update",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .into_iter()
            .find(|queue| queue.as_str() == s)
            .ok_or_else(|| JobError::InvalidArgument(format!("Invalid background job queue {}.", s)))
    }
}

/// Kinds of command a job can run. Each maps to exactly one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Event,
    Server,
    Admin,
}

impl CommandKind {
    pub const ALL: [CommandKind; 3] = [CommandKind::Event, CommandKind::Server, CommandKind::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Event => "event",
            CommandKind::Server => "server",
            CommandKind::Admin => "admin",
        }
    }

    /// Identity of the console shell that executes this command.
    pub fn handler_name(&self) -> &'static str {
        match self {
            CommandKind::Event => "EventShell",
            CommandKind::Server => "ServerShell",
            CommandKind::Admin => "AdminShell",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandKind {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandKind::ALL
            .into_iter()
            .find(|command| command.as_str() == s)
            .ok_or_else(|| {
                JobError::InvalidArgument(format!("Invalid background job command {}.", s))
            })
    }
}
