//! gitの出力テキストを Outcome に分類する
//!
//! Commands run with `LC_ALL=C`, so the English wording below is stable.
//! Text that matches nothing degrades to `Unclassified` on a zero exit and
//! to a generic external-command failure otherwise.

use regex::Regex;
use std::sync::LazyLock;

use crate::domain::entities::operation::{FailureKind, Outcome};
use crate::infrastructure::process::{CommandResult, CommandStatus};

static CONFLICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^CONFLICT|Automatic merge failed|could not apply|Resolve all conflicts")
        .expect("conflict pattern")
});

static AUTHENTICATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)authentication failed|permission denied|could not read (username|password)|terminal prompts disabled|returned error: 40[13]",
    )
    .expect("authentication pattern")
});

static NO_UPSTREAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)does not appear to be a git repository|no such remote|couldn't find remote ref|no tracking information|has no upstream branch",
    )
    .expect("no-upstream pattern")
});

static NETWORK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)could not resolve host|unable to access|connection (refused|timed out|reset)|network is unreachable|could not read from remote repository|early eof|the remote end hung up",
    )
    .expect("network pattern")
});

static REJECTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[rejected\]|non-fast-forward|fetch first|updates were rejected")
        .expect("rejected pattern")
});

fn interrupted(result: &CommandResult) -> Option<Outcome> {
    match result.status {
        CommandStatus::TimedOut => Some(Outcome::Failed(FailureKind::Timeout)),
        CommandStatus::Cancelled => Some(Outcome::Failed(FailureKind::Cancelled)),
        CommandStatus::Exited => None,
    }
}

/// Failure reasons shared by every command that talks to the remote.
pub fn remote_failure(text: &str) -> Option<FailureKind> {
    if AUTHENTICATION.is_match(text) {
        Some(FailureKind::Authentication)
    } else if NO_UPSTREAM.is_match(text) {
        Some(FailureKind::NoUpstream)
    } else if NETWORK.is_match(text) {
        Some(FailureKind::Network)
    } else {
        None
    }
}

pub fn has_conflict(text: &str) -> bool {
    CONFLICT.is_match(text)
}

fn failure(text: &str) -> Outcome {
    Outcome::Failed(remote_failure(text).unwrap_or(FailureKind::ExternalCommand))
}

/// `git pull --no-rebase origin <branch>`
pub fn classify_pull(result: &CommandResult) -> Outcome {
    if let Some(outcome) = interrupted(result) {
        return outcome;
    }
    let text = result.combined_output();
    if has_conflict(&text) {
        return Outcome::Conflict;
    }
    if !result.success() {
        return failure(&text);
    }
    if text.contains("Already up to date") || text.contains("Already up-to-date") {
        Outcome::UpToDate
    } else if text.contains("Fast-forward") {
        Outcome::FastForwarded
    } else if text.contains("Merge made by") {
        Outcome::Merged
    } else {
        Outcome::Unclassified
    }
}

/// `git fetch origin <branch>:<branch>` for a branch that is not checked out.
pub fn classify_fetch_update(result: &CommandResult) -> Outcome {
    if let Some(outcome) = interrupted(result) {
        return outcome;
    }
    let text = result.combined_output();
    if !result.success() {
        if REJECTED.is_match(&text) {
            return Outcome::Failed(FailureKind::NonFastForward);
        }
        return failure(&text);
    }
    if text.contains("[new branch]") {
        Outcome::Created
    } else if text.contains("..") && text.contains("->") {
        Outcome::FastForwarded
    } else if text.trim().is_empty() || text.contains("[up to date]") {
        Outcome::UpToDate
    } else {
        Outcome::Unclassified
    }
}

/// `git push [--set-upstream] origin <branch>`
pub fn classify_push(result: &CommandResult) -> Outcome {
    if let Some(outcome) = interrupted(result) {
        return outcome;
    }
    let text = result.combined_output();
    if !result.success() {
        if let Some(kind) = remote_failure(&text) {
            return Outcome::Failed(kind);
        }
        if REJECTED.is_match(&text) {
            return Outcome::Failed(FailureKind::NonFastForward);
        }
        return Outcome::Failed(FailureKind::ExternalCommand);
    }
    if text.contains("Everything up-to-date") {
        Outcome::UpToDate
    } else {
        Outcome::Pushed
    }
}

/// `git rebase <base>` and `git rebase --continue|--skip`
pub fn classify_rebase(result: &CommandResult) -> Outcome {
    if let Some(outcome) = interrupted(result) {
        return outcome;
    }
    let text = result.combined_output();
    if has_conflict(&text) {
        return Outcome::Conflict;
    }
    if !result.success() {
        return Outcome::Failed(FailureKind::ExternalCommand);
    }
    if text.contains("is up to date") {
        Outcome::UpToDate
    } else if text.contains("Successfully rebased") {
        Outcome::Rebased
    } else {
        Outcome::Unclassified
    }
}

/// `git stash pop`
pub fn classify_stash_pop(result: &CommandResult) -> Outcome {
    if let Some(outcome) = interrupted(result) {
        return outcome;
    }
    let text = result.combined_output();
    if has_conflict(&text) {
        return Outcome::Conflict;
    }
    if text.contains("No stash entries found") {
        return Outcome::NothingToPop;
    }
    if result.success() {
        Outcome::Popped
    } else {
        Outcome::Failed(FailureKind::ExternalCommand)
    }
}

/// Any other command: success, interruption or generic failure.
pub fn classify_plain(result: &CommandResult, success: Outcome) -> Outcome {
    if let Some(outcome) = interrupted(result) {
        return outcome;
    }
    if result.success() {
        success
    } else {
        failure(&result.combined_output())
    }
}
