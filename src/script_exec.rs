//! Plugin script execution.
//!
//! Spawns plugin executables with an environment overlay, captures
//! stdout/stderr, and enforces a hard timeout. Every failure mode
//! (missing executable, non-zero exit, signal, timeout) is data on the
//! returned `ExecutionResult` — the scheduler always gets a well-formed
//! result, never an unhandled error.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Command;
use uuid::Uuid;

use crate::terminal::{self, TerminalApp, TerminalLauncher};

/// Default cap on a single execution (30 seconds).
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum stdout kept per execution (5 MB).
pub const MAX_STDOUT_BYTES: usize = 5 * 1024 * 1024;

/// Maximum stderr bytes kept on the result. Keeps logs readable and
/// avoids spilling secrets a script might emit on stderr.
const MAX_STDERR_BYTES: usize = 256;

/// Why an execution did not produce usable output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum ExecFailure {
    /// The executable does not exist.
    NotFound,
    /// Spawn or wait failed for another reason.
    SpawnFailed { message: String },
    NonZeroExit { code: i32 },
    /// Terminated by a signal (no exit code).
    Signal,
    /// Forcibly terminated after the configured timeout.
    Timeout { after_ms: u64 },
    /// Exited cleanly but stdout was not valid UTF-8.
    InvalidUtf8,
}

/// The immutable record of one script invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub id: Uuid,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub failure: Option<ExecFailure>,
}

impl ExecutionResult {
    pub fn ok(&self) -> bool {
        self.failure.is_none()
    }

    fn failure_of(started_at: DateTime<Utc>, begin: Instant, failure: ExecFailure) -> Self {
        ExecutionResult {
            id: Uuid::new_v4(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            started_at,
            duration_ms: begin.elapsed().as_millis() as u64,
            failure: Some(failure),
        }
    }

    #[cfg(test)]
    pub(crate) fn ok_for_test(stdout: &str) -> Self {
        ExecutionResult {
            id: Uuid::new_v4(),
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            started_at: Utc::now(),
            duration_ms: 0,
            failure: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn failed_for_test(failure: ExecFailure) -> Self {
        ExecutionResult {
            failure: Some(failure),
            ..Self::ok_for_test("")
        }
    }
}

/// How an invocation is observed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Block until completion or timeout; result returned to the caller.
    Sync,
    /// Fire and forget; outcome is only logged.
    Background,
    /// Hand the assembled command line to the terminal-launch
    /// collaborator instead of executing directly.
    Interactive,
}

/// Runs plugin executables. Cheap to clone; carries only the timeout.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    timeout: Duration,
}

impl Default for ScriptRunner {
    fn default() -> Self {
        ScriptRunner {
            timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }
}

impl ScriptRunner {
    pub fn new(timeout: Duration) -> Self {
        ScriptRunner { timeout }
    }

    /// Dispatch one invocation in the given mode. Only `Sync` produces a
    /// result; `Background` logs its outcome, `Interactive` ends at the
    /// launcher handoff.
    pub async fn execute(
        &self,
        program: &Path,
        args: &[String],
        env: &HashMap<String, String>,
        mode: ExecMode,
        launcher: Option<(&dyn TerminalLauncher, TerminalApp)>,
    ) -> Option<ExecutionResult> {
        match mode {
            ExecMode::Sync => Some(self.run_sync(program, args, env).await),
            ExecMode::Background => {
                self.spawn_background(program.to_path_buf(), args.to_vec(), env.clone());
                None
            }
            ExecMode::Interactive => {
                let command = terminal::shell_command(program, args);
                let assembled = terminal::interactive_command(&command, env);
                if let Some((launcher, app)) = launcher {
                    launcher.launch(&assembled, app);
                } else {
                    tracing::warn!("interactive execution requested without a terminal launcher");
                }
                None
            }
        }
    }

    /// Spawn, capture, and wait with a timeout. On expiry the child is
    /// killed; whatever was captured before termination is discarded and
    /// the result carries a timeout failure.
    pub async fn run_sync(
        &self,
        program: &Path,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let begin = Instant::now();

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let failure = if e.kind() == ErrorKind::NotFound {
                    ExecFailure::NotFound
                } else {
                    ExecFailure::SpawnFailed {
                        message: e.to_string(),
                    }
                };
                return ExecutionResult::failure_of(started_at, begin, failure);
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ExecutionResult::failure_of(
                    started_at,
                    begin,
                    ExecFailure::SpawnFailed {
                        message: e.to_string(),
                    },
                );
            }
            // Dropping the wait future kills the child (kill_on_drop).
            Err(_) => {
                return ExecutionResult::failure_of(
                    started_at,
                    begin,
                    ExecFailure::Timeout {
                        after_ms: self.timeout.as_millis() as u64,
                    },
                );
            }
        };

        let stdout_bytes = &output.stdout[..output.stdout.len().min(MAX_STDOUT_BYTES)];
        let stderr_bytes = &output.stderr[..output.stderr.len().min(MAX_STDERR_BYTES)];

        let exit_code = output.status.code();
        let failure = if !output.status.success() {
            Some(match exit_code {
                Some(code) => ExecFailure::NonZeroExit { code },
                None => ExecFailure::Signal,
            })
        } else if std::str::from_utf8(stdout_bytes).is_err() {
            // Stdout is still carried lossily for diagnostics, but the
            // result is a failure so the menu shows the sentinel rather
            // than a silently mangled tree.
            Some(ExecFailure::InvalidUtf8)
        } else {
            None
        };

        ExecutionResult {
            id: Uuid::new_v4(),
            stdout: String::from_utf8_lossy(stdout_bytes).into_owned(),
            stderr: String::from_utf8_lossy(stderr_bytes).into_owned(),
            exit_code,
            started_at,
            duration_ms: begin.elapsed().as_millis() as u64,
            failure,
        }
    }

    /// Run without blocking the caller. Used for user-triggered one-off
    /// actions where the menu does not need updated output.
    pub fn spawn_background(
        &self,
        program: PathBuf,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) {
        let runner = self.clone();
        tokio::spawn(async move {
            let result = runner.run_sync(&program, &args, &env).await;
            match &result.failure {
                None => tracing::info!(
                    program = %program.display(),
                    duration_ms = result.duration_ms,
                    "background command finished"
                ),
                Some(failure) => tracing::warn!(
                    program = %program.display(),
                    ?failure,
                    stderr = %result.stderr,
                    "background command failed"
                ),
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
