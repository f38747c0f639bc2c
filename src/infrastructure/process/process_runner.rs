use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::common::error::RepoflowError;
use crate::common::result::RepoflowResult;

/// Default per-command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// 外部コマンドの1回分の呼び出し
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    /// None uses the runner's default timeout.
    pub timeout: Option<Duration>,
}

impl CommandInvocation {
    pub fn new<I, S>(working_directory: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            working_directory: working_directory.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 表示用のコマンドライン
    pub fn display(&self) -> String {
        format!("git {}", self.args.join(" "))
    }
}

/// How the process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandStatus {
    Exited,
    TimedOut,
    Cancelled,
}

/// 外部コマンドの実行結果
///
/// A non-zero exit code is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub status: CommandStatus,
}

impl CommandResult {
    pub fn exited(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration_ms: 0,
            status: CommandStatus::Exited,
        }
    }

    pub fn timed_out(timeout: Duration, duration_ms: u64) -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: format!("command timed out after {} seconds", timeout.as_secs()),
            duration_ms,
            status: CommandStatus::TimedOut,
        }
    }

    pub fn cancelled(duration_ms: u64) -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: "command cancelled".to_string(),
            duration_ms,
            status: CommandStatus::Cancelled,
        }
    }

    pub fn success(&self) -> bool {
        self.status == CommandStatus::Exited && self.exit_code == 0
    }

    /// stdout と stderr を結合したテキスト
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}

/// Runs the version-control executable.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs one command and waits for it to exit, time out or be cancelled.
    ///
    /// Fails only when the command cannot be started at all.
    async fn run(&self, invocation: CommandInvocation) -> RepoflowResult<CommandResult>;
}

/// 実行中のコマンドを中断するためのハンドル
///
/// Each front-end operation calls [`CancellationSource::begin`] to get a
/// fresh token; [`CancellationSource::cancel`] trips the current one. A
/// tripped token stops exactly one command: the runner re-arms the source
/// once it has reported the cancellation, so the stash restore that follows
/// still runs.
#[derive(Debug, Clone, Default)]
pub struct CancellationSource {
    current: Arc<Mutex<CancellationToken>>,
}

impl CancellationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新しい操作の開始
    pub fn begin(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = CancellationToken::new();
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.current
            .lock()
            .map(|current| current.clone())
            .unwrap_or_default()
    }

    /// Replaces a tripped token with a fresh one; an untripped one is kept.
    pub fn rearm(&self) {
        if let Ok(mut current) = self.current.lock() {
            if current.is_cancelled() {
                *current = CancellationToken::new();
            }
        }
    }

    pub fn cancel(&self) {
        if let Ok(current) = self.current.lock() {
            current.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token().is_cancelled()
    }
}

/// `git` を tokio のプロセスとして実行する ProcessRunner
#[derive(Debug, Clone)]
pub struct GitProcessRunner {
    executable: PathBuf,
    default_timeout: Duration,
    cancellation: CancellationSource,
}

impl Default for GitProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl GitProcessRunner {
    pub fn new() -> Self {
        Self {
            executable: PathBuf::from("git"),
            default_timeout: DEFAULT_TIMEOUT,
            cancellation: CancellationSource::new(),
        }
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationSource) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn cancellation(&self) -> &CancellationSource {
        &self.cancellation
    }

    fn check_working_directory(invocation: &CommandInvocation) -> RepoflowResult<()> {
        let dir = &invocation.working_directory;
        if !dir.is_absolute() {
            return Err(RepoflowError::invalid_target(
                format!("working directory must be absolute: {}", dir.display()),
                Some(dir.clone()),
            ));
        }
        if !dir.is_dir() {
            return Err(RepoflowError::invalid_target(
                format!("working directory does not exist: {}", dir.display()),
                Some(dir.clone()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessRunner for GitProcessRunner {
    async fn run(&self, invocation: CommandInvocation) -> RepoflowResult<CommandResult> {
        Self::check_working_directory(&invocation)?;

        let timeout = invocation.timeout.unwrap_or(self.default_timeout);
        let token = self.cancellation.token();
        let command_line = invocation.display();
        debug!(
            "Running '{}' in {}",
            command_line,
            invocation.working_directory.display()
        );

        if token.is_cancelled() {
            warn!("'{}' cancelled before it started", command_line);
            self.cancellation.rearm();
            return Ok(CommandResult::cancelled(0));
        }

        let mut cmd = Command::new(&self.executable);
        cmd.args(&invocation.args)
            .current_dir(&invocation.working_directory)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_EDITOR", "true")
            .env("GIT_MERGE_AUTOEDIT", "no")
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start_time = Instant::now();
        let child = cmd
            .spawn()
            .map_err(|e| RepoflowError::spawn(command_line.clone(), e))?;

        // Dropping the wait future drops the child, which kills it.
        let result = tokio::select! {
            output = child.wait_with_output() => {
                let output = output.map_err(|e| RepoflowError::spawn(command_line.clone(), e))?;
                CommandResult {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    duration_ms: start_time.elapsed().as_millis() as u64,
                    status: CommandStatus::Exited,
                }
            }
            _ = tokio::time::sleep(timeout) => {
                warn!("'{}' timed out after {:?}", command_line, timeout);
                CommandResult::timed_out(timeout, start_time.elapsed().as_millis() as u64)
            }
            _ = token.cancelled() => {
                warn!("'{}' cancelled", command_line);
                self.cancellation.rearm();
                CommandResult::cancelled(start_time.elapsed().as_millis() as u64)
            }
        };

        debug!(
            "'{}' finished: exit={} status={:?} in {}ms",
            command_line, result.exit_code, result.status, result.duration_ms
        );
        Ok(result)
    }
}
