//! Command handlers that execute a job's command.
//!
//! Every [`CommandKind`] is served by exactly one handler. The production
//! handler runs the console executable with the command's shell name, e.g.
//! `./console EventShell publish 42`, and reports its exit code.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::job::BackgroundJob;
use super::types::CommandKind;
use crate::error::JobError;

/// Environment variable carrying the job id into the child process.
pub const JOB_ID_ENV: &str = "JOBVISOR_JOB_ID";

/// What a handler reports back after the command finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub return_code: i32,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl HandlerOutcome {
    pub fn new(return_code: i32) -> Self {
        Self {
            return_code,
            output: None,
            error: None,
        }
    }
}

/// Executes one kind of command to completion.
///
/// The return code is passed through untouched; only a failure to execute
/// the command at all is an error.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(&self, job: &BackgroundJob) -> Result<HandlerOutcome, JobError>;
}

/// Runs `{console} {ShellName} {args...}` as a child process.
pub struct ShellCommandHandler {
    console_path: PathBuf,
}

impl ShellCommandHandler {
    pub fn new(console_path: impl Into<PathBuf>) -> Self {
        Self {
            console_path: console_path.into(),
        }
    }
}

fn non_empty(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes).trim_end().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl CommandHandler for ShellCommandHandler {
    async fn execute(&self, job: &BackgroundJob) -> Result<HandlerOutcome, JobError> {
        let shell = job.command().handler_name();
        debug!(
            job_id = %job.id(),
            console = %self.console_path.display(),
            shell = shell,
            "Spawning command"
        );

        let output = Command::new(&self.console_path)
            .arg(shell)
            .args(job.args())
            .env(JOB_ID_ENV, job.id())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                JobError::Handler(format!(
                    "Failed to spawn {} {}: {}",
                    self.console_path.display(),
                    shell,
                    e
                ))
            })?;

        Ok(HandlerOutcome {
            // killed by a signal
            return_code: output.status.code().unwrap_or(-1),
            output: non_empty(&output.stdout),
            error: non_empty(&output.stderr),
        })
    }
}

/// Maps each command kind to its handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<CommandKind, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry serving every command kind through the console executable.
    pub fn shell(console_path: impl Into<PathBuf>) -> Self {
        let handler: Arc<dyn CommandHandler> = Arc::new(ShellCommandHandler::new(console_path));
        let mut registry = Self::new();
        for command in CommandKind::ALL {
            registry = registry.with_handler(command, Arc::clone(&handler));
        }
        registry
    }

    /// Registers (or replaces) the handler for a command kind.
    pub fn with_handler(mut self, command: CommandKind, handler: Arc<dyn CommandHandler>) -> Self {
        self.handlers.insert(command, handler);
        self
    }

    pub fn get(&self, command: CommandKind) -> Option<&Arc<dyn CommandHandler>> {
        self.handlers.get(&command)
    }

    pub async fn execute(&self, job: &BackgroundJob) -> Result<HandlerOutcome, JobError> {
        let handler = self.get(job.command()).ok_or_else(|| {
            JobError::Handler(format!("No handler registered for command {}", job.command()))
        })?;
        handler.execute(job).await
    }
}
