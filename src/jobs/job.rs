//! Job Record: one unit of work plus its run-time status.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{CommandKind, QueueName};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Enqueued, not yet picked up.
    New,
    /// A worker is executing the command.
    Running,
    /// The command exited with return code 0.
    Success,
    /// The command exited non-zero or could not be executed.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    /// Terminal status for a command's return code.
    pub fn from_return_code(code: i32) -> Self {
        if code == 0 {
            JobStatus::Success
        } else {
            JobStatus::Failed
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::New => "new",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A background job as stored on its queue and in its status record.
///
/// `id`, `queue` and `command` are fixed at construction; because queue and
/// command are typed, a record with an unknown queue or command cannot be
/// built or decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundJob {
    id: String,
    queue: QueueName,
    command: CommandKind,
    #[serde(default)]
    args: Vec<String>,
    track_status: bool,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
    status: JobStatus,
    #[serde(default)]
    return_code: Option<i32>,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BackgroundJob {
    /// Creates a job with a fresh id and status NEW.
    pub fn new(queue: QueueName, command: CommandKind, args: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            queue,
            command,
            args,
            track_status: true,
            metadata: BTreeMap::new(),
            status: JobStatus::New,
            return_code: None,
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_track_status(mut self, track_status: bool) -> Self {
        self.track_status = track_status;
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue(&self) -> QueueName {
        self.queue
    }

    pub fn command(&self) -> CommandKind {
        self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn track_status(&self) -> bool {
        self.track_status
    }

    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn return_code(&self) -> Option<i32> {
        self.return_code
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
    }

    /// Records the outcome of the command and the matching terminal status.
    pub fn complete(&mut self, return_code: i32, output: Option<String>, error: Option<String>) {
        self.return_code = Some(return_code);
        self.status = JobStatus::from_return_code(return_code);
        self.output = output;
        self.error = error;
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Serializes the record to the JSON stored on queues and status keys.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Optional parts of an enqueue request.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Whether intermediate status should be kept for the full history TTL.
    /// `None` means the default (tracked).
    pub track_status: Option<bool>,
    /// Identifier of a caller-side record to link to the new job.
    pub related_id: Option<i64>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_status(mut self, track: bool) -> Self {
        self.track_status = Some(track);
        self
    }

    pub fn related_id(mut self, id: i64) -> Self {
        self.related_id = Some(id);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job() {
        let job = BackgroundJob::new(QueueName::Email, CommandKind::Event, vec!["publish".into()]);
        assert_eq!(job.status(), JobStatus::New);
        assert_eq!(job.queue(), QueueName::Email);
        assert_eq!(job.command(), CommandKind::Event);
        assert_eq!(job.args(), ["publish".to_string()]);
        assert!(job.track_status());
        assert!(job.return_code().is_none());
        assert!(Uuid::parse_str(job.id()).is_ok());

        let other = BackgroundJob::new(QueueName::Email, CommandKind::Event, vec![]);
        assert_ne!(job.id(), other.id());
    }

    #[test]
    fn test_json_field_names() {
        let job = BackgroundJob::new(QueueName::Default, CommandKind::Admin, vec!["1".into()])
            .with_track_status(false);
        let value: serde_json::Value = serde_json::from_str(&job.to_json().unwrap()).unwrap();

        assert_eq!(value["queue"], "default");
        assert_eq!(value["command"], "admin");
        assert_eq!(value["trackStatus"], false);
        assert_eq!(value["status"], "new");
        assert!(value.get("returnCode").is_some());
        assert!(value.get("updatedAt").is_some());
    }

    #[test]
    fn test_decode_rejects_unknown_queue() {
        let job = BackgroundJob::new(QueueName::Default, CommandKind::Admin, vec![]);
        let raw = job.to_json().unwrap().replace("\"default\"", "\"bogus\"");
        assert!(BackgroundJob::from_json(&raw).is_err());
        assert!(BackgroundJob::from_json("not json").is_err());
    }

    #[test]
    fn test_complete_sets_terminal_status() {
        let mut job = BackgroundJob::new(QueueName::Prio, CommandKind::Server, vec![]);
        job.complete(0, Some("done".into()), None);
        assert_eq!(job.status(), JobStatus::Success);
        assert_eq!(job.output(), Some("done"));

        job.complete(3, None, Some("boom".into()));
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.return_code(), Some(3));
        assert_eq!(job.error(), Some("boom"));
        assert!(job.status().is_terminal());
    }

    #[test]
    fn test_enqueue_options_builder() {
        let opts = EnqueueOptions::new()
            .track_status(false)
            .related_id(7)
            .metadata("user", "admin@example.com");
        assert_eq!(opts.track_status, Some(false));
        assert_eq!(opts.related_id, Some(7));
        assert_eq!(opts.metadata["user"], "admin@example.com");
    }
}
