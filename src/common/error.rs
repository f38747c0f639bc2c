use std::path::PathBuf;
use thiserror::Error;

use crate::domain::entities::operation::FailureKind;

/// repoflow のエラー
///
/// Git itself reporting "nothing to do" or a conflict is not an error; those
/// come back as an `Outcome`. Variants here stop an operation outright.
#[derive(Error, Debug)]
pub enum RepoflowError {
    /// 対象リポジトリが使えない（パス不正・存在しない・Git管理外）
    #[error("Invalid repository target: {reason}")]
    InvalidTarget { reason: String, path: Option<PathBuf> },

    /// 入力値の検証エラー
    #[error("Invalid {field}: {reason}")]
    InvalidRequest {
        field: String,
        reason: String,
        value: Option<String>,
    },

    #[error("'{operation}' needs explicit confirmation")]
    ConfirmationRequired { operation: String },

    /// リポジトリの状態が操作を許さない
    #[error("{reason}")]
    RepositoryState { reason: String, path: Option<PathBuf> },

    #[error("{command} exited with status {exit_code}: {output}")]
    GitFailed {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("could not run {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} gave no answer within {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("{command} was cancelled")]
    Cancelled { command: String },

    #[error("{context}")]
    Io {
        context: String,
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Config(String),

    #[error("operation record could not be encoded")]
    LogEncoding(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RepoflowError {
    pub fn invalid_target(reason: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::InvalidTarget {
            reason: reason.into(),
            path,
        }
    }

    pub fn invalid_request(
        field: impl Into<String>,
        reason: impl Into<String>,
        value: Option<String>,
    ) -> Self {
        Self::InvalidRequest {
            field: field.into(),
            reason: reason.into(),
            value,
        }
    }

    pub fn confirmation_required(operation: impl Into<String>) -> Self {
        Self::ConfirmationRequired {
            operation: operation.into(),
        }
    }

    pub fn repository_state(reason: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::RepositoryState {
            reason: reason.into(),
            path,
        }
    }

    pub fn git_failed(command: impl Into<String>, exit_code: i32, output: impl Into<String>) -> Self {
        Self::GitFailed {
            command: command.into(),
            exit_code,
            output: output.into(),
        }
    }

    pub fn spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            command: command.into(),
            source,
        }
    }

    pub fn timeout(command: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            command: command.into(),
            seconds,
        }
    }

    pub fn cancelled(command: impl Into<String>) -> Self {
        Self::Cancelled {
            command: command.into(),
        }
    }

    pub fn io(context: impl Into<String>, path: Option<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            path,
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Classification used when an error is reported as an operation result.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::InvalidTarget { .. } => FailureKind::InvalidTarget,
            Self::InvalidRequest { .. } | Self::RepositoryState { .. } => {
                FailureKind::InvalidRequest
            }
            Self::ConfirmationRequired { .. } => FailureKind::ConfirmationRequired,
            Self::GitFailed { .. } | Self::Spawn { .. } => FailureKind::ExternalCommand,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::Io { .. } | Self::Config(_) | Self::LogEncoding(_) | Self::Internal(_) => {
                FailureKind::Internal
            }
        }
    }
}

impl From<std::io::Error> for RepoflowError {
    fn from(source: std::io::Error) -> Self {
        Self::io(source.to_string(), None, source)
    }
}
