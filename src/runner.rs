//! Running shell commands through a throttle.
//!
//! Used by the `pacer` binary to pace scripts that call rate-limited APIs,
//! e.g. one `curl` per line of input.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::trace;

use crate::error::Cancelled;
use crate::throttle::RequestThrottle;

/// Errors from running a single command.
#[derive(Debug, Error)]
pub enum RunError {
    /// The command could not be started
    #[error("failed to start command: {0}")]
    Spawn(#[from] std::io::Error),

    /// The command ran and exited unsuccessfully
    #[error("command exited with {}", exit_label(.code))]
    Failed {
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// The throttle dropped the command before running it
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

/// Something that can execute a command line.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a single command to completion.
    async fn run(&self, command: &str) -> Result<CommandOutput, RunError>;
}

/// Runs commands with `<shell> -c <command>`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    /// Use a specific shell binary.
    pub fn new(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<CommandOutput, RunError> {
        trace!(shell = %self.shell, command = %command, "Running command");

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .kill_on_drop(true)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if output.status.success() {
            Ok(CommandOutput {
                code: output.status.code(),
                stdout,
                stderr,
            })
        } else {
            Err(RunError::Failed {
                code: output.status.code(),
                stderr,
            })
        }
    }
}

/// Outcome of one command in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Position in the input
    pub index: usize,
    /// Throttle task id
    pub task_id: u64,
    /// The command line
    pub command: String,
    /// Whether the command succeeded
    pub success: bool,
    /// Exit code, when known
    pub exit_code: Option<i32>,
    /// Standard output on success, the error otherwise
    pub output: String,
    /// Milliseconds from batch start until the result was collected
    pub finished_ms: u64,
}

impl BatchResult {
    fn new(
        index: usize,
        task_id: u64,
        command: String,
        outcome: Result<CommandOutput, RunError>,
        finished_ms: u64,
    ) -> Self {
        let (success, exit_code, output) = match outcome {
            Ok(out) => (true, out.code, out.stdout),
            Err(RunError::Failed { code, stderr }) => {
                let label = exit_label(&code);
                let output = if stderr.trim().is_empty() {
                    format!("command exited with {}", label)
                } else {
                    format!("command exited with {}: {}", label, stderr.trim_end())
                };
                (false, code, output)
            }
            Err(err) => (false, None, err.to_string()),
        };

        Self {
            index,
            task_id,
            command,
            success,
            exit_code,
            output,
            finished_ms,
        }
    }

    /// Human-readable rendering: a status line followed by indented output.
    pub fn render(&self) -> String {
        let status = if self.success { "ok" } else { "FAIL" };
        let mut text = format!(
            "[{}] {} +{}ms  {}",
            self.index, status, self.finished_ms, self.command
        );

        for line in self.output.lines() {
            text.push_str("\n    ");
            text.push_str(line);
        }

        text
    }
}

/// Split input into commands: one per line, skipping blanks and `#` comments.
pub fn parse_commands(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Submit every command to `throttle` up front, then collect results in
/// submission order, calling `on_result` as each one arrives.
///
/// A failing command does not affect the others.
pub async fn run_batch<R, F>(
    throttle: &RequestThrottle,
    runner: Arc<R>,
    commands: Vec<String>,
    mut on_result: F,
) -> Vec<BatchResult>
where
    R: CommandRunner + 'static,
    F: FnMut(&BatchResult),
{
    let origin = Instant::now();

    let submissions: Vec<_> = commands
        .into_iter()
        .map(|command| {
            let runner = Arc::clone(&runner);
            let line = command.clone();
            let submission = throttle.submit(move || async move { runner.run(&line).await });
            (command, submission)
        })
        .collect();

    let mut results = Vec::with_capacity(submissions.len());
    for (index, (command, submission)) in submissions.into_iter().enumerate() {
        let task_id = submission.id();
        let outcome = submission.await;
        let finished_ms = origin.elapsed().as_millis() as u64;

        let result = BatchResult::new(index, task_id, command, outcome, finished_ms);
        on_result(&result);
        results.push(result);
    }

    results
}
