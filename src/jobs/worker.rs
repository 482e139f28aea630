//! Worker Record: advisory status of one worker process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::QueueName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Waiting on its queue.
    Idle,
    /// Executing a job.
    Running,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Running => write!(f, "running"),
        }
    }
}

/// Worker status record, keyed by pid in the store.
///
/// This mirrors what the worker last reported about itself and may lag
/// behind the supervisor's view of the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRecord {
    pub pid: u32,
    pub queue: QueueName,
    pub status: WorkerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkerRecord {
    pub fn new(pid: u32, queue: QueueName, status: WorkerStatus) -> Self {
        let now = Utc::now();
        Self {
            pid,
            queue,
            status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Time since the worker last reported.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.updated_at
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_record_json() {
        let record = WorkerRecord::new(4242, QueueName::Cache, WorkerStatus::Idle);
        let json = record.to_json().unwrap();
        assert!(json.contains("\"createdAt\""));
        assert!(json.contains("\"status\":\"idle\""));

        let decoded = WorkerRecord::from_json(&json).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_age() {
        let record = WorkerRecord::new(1, QueueName::Default, WorkerStatus::Running);
        let later = record.updated_at + chrono::Duration::seconds(90);
        assert_eq!(record.age(later).num_seconds(), 90);
    }
}
