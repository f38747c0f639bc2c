use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::common::error::RepoflowError;
use crate::domain::entities::conflict::ConflictState;

/// 操作の種類（ログレコードの operation 欄）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Status,
    Branch,
    Pull,
    Push,
    Rebase,
    Reset,
    Stash,
    Workflow,
    DeleteBranch,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Branch => "branch",
            Self::Pull => "pull",
            Self::Push => "push",
            Self::Rebase => "rebase",
            Self::Reset => "reset",
            Self::Stash => "stash",
            Self::Workflow => "workflow",
            Self::DeleteBranch => "delete-branch",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 失敗の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    InvalidTarget,
    InvalidRequest,
    ConfirmationRequired,
    ExternalCommand,
    Network,
    Authentication,
    NoUpstream,
    NonFastForward,
    Timeout,
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidTarget => "invalid-target",
            Self::InvalidRequest => "invalid-request",
            Self::ConfirmationRequired => "confirmation-required",
            Self::ExternalCommand => "external-command-failure",
            Self::Network => "network-failure",
            Self::Authentication => "authentication-failure",
            Self::NoUpstream => "no-upstream",
            Self::NonFastForward => "non-fast-forward",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal-error",
        }
    }
}

/// Fine-grained classification of what an operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Completed,
    Created,
    Switched,
    AlreadyOnBranch,
    Deleted,
    UpToDate,
    FastForwarded,
    Merged,
    Committed,
    Pushed,
    PublishedUpstream,
    Stashed,
    Popped,
    Dropped,
    ResetToBase,
    Rebased,
    RebaseAborted,
    NothingToCommit,
    NothingToStash,
    NothingToPop,
    NothingToAbort,
    NotFound,
    Conflict,
    /// Exit code 0 but the output matched no known wording.
    Unclassified,
    Failed(FailureKind),
}

impl Outcome {
    pub fn status(&self) -> OperationStatus {
        match self {
            Self::NothingToCommit
            | Self::NothingToStash
            | Self::NothingToPop
            | Self::NothingToAbort
            | Self::NotFound => OperationStatus::Noop,
            Self::Conflict => OperationStatus::Conflict,
            Self::Failed(FailureKind::Cancelled) => OperationStatus::Cancelled,
            Self::Failed(_) => OperationStatus::Failure,
            _ => OperationStatus::Success,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Created => "created",
            Self::Switched => "switched",
            Self::AlreadyOnBranch => "already-on-branch",
            Self::Deleted => "deleted",
            Self::UpToDate => "up-to-date",
            Self::FastForwarded => "fast-forwarded",
            Self::Merged => "merged",
            Self::Committed => "committed",
            Self::Pushed => "pushed",
            Self::PublishedUpstream => "published-upstream",
            Self::Stashed => "stashed",
            Self::Popped => "popped",
            Self::Dropped => "dropped",
            Self::ResetToBase => "reset-to-base",
            Self::Rebased => "rebased",
            Self::RebaseAborted => "rebase-aborted",
            Self::NothingToCommit => "nothing-to-commit",
            Self::NothingToStash => "nothing-to-stash",
            Self::NothingToPop => "nothing-to-pop",
            Self::NothingToAbort => "nothing-to-abort",
            Self::NotFound => "not-found",
            Self::Conflict => "conflict",
            Self::Unclassified => "unclassified",
            Self::Failed(kind) => kind.as_str(),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// ログに記録される結果ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Noop,
    Conflict,
    Failure,
    Cancelled,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Noop => "noop",
            Self::Conflict => "conflict",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The value every manager call reports back to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub kind: OperationKind,
    pub outcome: Outcome,
    pub message: String,
    pub branch: Option<String>,
    /// Captured stdout/stderr of the deciding command.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictState>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<OperationResult>,
}

impl OperationResult {
    pub fn new(kind: OperationKind, outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            kind,
            outcome,
            message: message.into(),
            branch: None,
            output: String::new(),
            conflict: None,
            metadata: BTreeMap::new(),
            steps: Vec::new(),
        }
    }

    pub fn failed(kind: OperationKind, failure: FailureKind, message: impl Into<String>) -> Self {
        Self::new(kind, Outcome::Failed(failure), message)
    }

    /// Failure result describing an error raised before or during the call.
    pub fn from_error(kind: OperationKind, error: &RepoflowError) -> Self {
        Self::failed(kind, error.failure_kind(), error.to_string())
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Sets the branch when one is known; keeps the current value otherwise.
    pub fn with_optional_branch(mut self, branch: Option<String>) -> Self {
        if branch.is_some() {
            self.branch = branch;
        }
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_conflict(mut self, conflict: ConflictState) -> Self {
        self.conflict = Some(conflict);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_steps(mut self, steps: Vec<OperationResult>) -> Self {
        self.steps = steps;
        self
    }

    pub fn status(&self) -> OperationStatus {
        self.outcome.status()
    }

    /// Success or benign no-op.
    pub fn is_success(&self) -> bool {
        matches!(self.status(), OperationStatus::Success | OperationStatus::Noop)
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == OperationStatus::Conflict
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.outcome {
            Outcome::Failed(kind) => Some(kind),
            _ => None,
        }
    }

    /// Whether one of the direct steps stashed the working tree.
    pub fn stashed(&self) -> bool {
        self.steps.iter().any(|step| step.outcome == Outcome::Stashed)
    }

    /// Conflict state of this result or of the step that produced it.
    pub fn conflict_state(&self) -> Option<&ConflictState> {
        self.conflict
            .as_ref()
            .or_else(|| self.steps.iter().rev().find_map(|step| step.conflict_state()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::conflict::ConflictOrigin;
    use std::path::PathBuf;

    #[test]
    fn test_status_from_outcome() {
        assert_eq!(Outcome::Switched.status(), OperationStatus::Success);
        assert_eq!(Outcome::NothingToCommit.status(), OperationStatus::Noop);
        assert_eq!(Outcome::NotFound.status(), OperationStatus::Noop);
        assert_eq!(Outcome::Conflict.status(), OperationStatus::Conflict);
        assert_eq!(
            Outcome::Failed(FailureKind::Network).status(),
            OperationStatus::Failure
        );
        assert_eq!(
            Outcome::Failed(FailureKind::Cancelled).status(),
            OperationStatus::Cancelled
        );
    }

    #[test]
    fn test_result_from_error() {
        let error = RepoflowError::confirmation_required("reset");
        let result = OperationResult::from_error(OperationKind::Reset, &error);
        assert_eq!(result.failure_kind(), Some(FailureKind::ConfirmationRequired));
        assert!(!result.is_success());
    }

    #[test]
    fn test_conflict_state_found_in_steps() {
        let conflict = ConflictState::new(ConflictOrigin::Rebase, PathBuf::from("/r"), vec![]);
        let step = OperationResult::new(OperationKind::Rebase, Outcome::Conflict, "conflict")
            .with_conflict(conflict.clone());
        let composite = OperationResult::new(OperationKind::Workflow, Outcome::Conflict, "flow")
            .with_steps(vec![
                OperationResult::new(OperationKind::Pull, Outcome::UpToDate, "ok"),
                step,
            ]);

        assert_eq!(composite.conflict_state(), Some(&conflict));
        assert!(composite.is_conflict());
    }

    #[test]
    fn test_stashed_looks_at_direct_steps() {
        let result = OperationResult::new(OperationKind::Branch, Outcome::Switched, "switched")
            .with_steps(vec![OperationResult::new(
                OperationKind::Stash,
                Outcome::Stashed,
                "saved",
            )]);
        assert!(result.stashed());
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&Outcome::AlreadyOnBranch).unwrap();
        assert_eq!(json, "\"already-on-branch\"");
        let json = serde_json::to_string(&Outcome::Failed(FailureKind::NoUpstream)).unwrap();
        assert_eq!(json, "{\"failed\":\"no-upstream\"}");
    }
}
