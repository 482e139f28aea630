//! Worker process names of the form `{queue}_{index}`.

use std::fmt;
use std::str::FromStr;

use super::types::{QueueName, WORKER_PROCESS_GROUP};
use crate::error::JobError;

/// Parsed worker name, e.g. `default_00`.
///
/// The index keeps its original digits so `email_7` and `email_07` stay
/// distinct process names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerName {
    queue: QueueName,
    index: String,
}

impl WorkerName {
    /// Builds the conventional name for the `index`-th worker of a queue,
    /// zero-padded to two digits.
    pub fn new(queue: QueueName, index: u32) -> Self {
        Self {
            queue,
            index: format!("{:02}", index),
        }
    }

    pub fn queue(&self) -> QueueName {
        self.queue
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// `{group}:{name}` as addressed in the supervisor.
    pub fn process_address(&self) -> String {
        format!("{}:{}", WORKER_PROCESS_GROUP, self)
    }
}

impl fmt::Display for WorkerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.queue, self.index)
    }
}

impl FromStr for WorkerName {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || JobError::InvalidArgument(format!("Invalid worker name {}.", s));

        let (queue, index) = s.split_once('_').ok_or_else(invalid)?;
        let queue: QueueName = queue.parse().map_err(|_| invalid())?;
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        Ok(Self {
            queue,
            index: index.to_string(),
        })
    }
}

/// Identifies a worker to stop: by supervisor process name or by OS pid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerRef {
    Pid(u32),
    Name(WorkerName),
}

impl FromStr for WorkerRef {
    type Err = JobError;

    /// All-digit input is a pid, anything else must be a valid worker name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            return s
                .parse::<u32>()
                .map(WorkerRef::Pid)
                .map_err(|_| JobError::InvalidArgument(format!("Invalid worker pid {}.", s)));
        }
        s.parse().map(WorkerRef::Name)
    }
}

impl From<WorkerName> for WorkerRef {
    fn from(name: WorkerName) -> Self {
        WorkerRef::Name(name)
    }
}

impl fmt::Display for WorkerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRef::Pid(pid) => write!(f, "pid={}", pid),
            WorkerRef::Name(name) => write!(f, "{}", name),
        }
    }
}
