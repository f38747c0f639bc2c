use async_trait::async_trait;
use chrono::Local;

use super::{ManagerContext, Operation};
use crate::common::result::RepoflowResult;
use crate::domain::entities::conflict::{ConflictOrigin, ConflictState};
use crate::domain::entities::operation::{FailureKind, OperationKind, OperationResult, Outcome};
use crate::domain::entities::repository_target::RepositoryTarget;
use crate::infrastructure::git::output::{classify_plain, classify_stash_pop};

/// StashManager への要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StashRequest {
    Save { label: Option<String> },
    Pop,
    Drop,
}

/// 作業ツリーの一時退避
#[derive(Debug, Clone)]
pub struct StashManager {
    ctx: ManagerContext,
}

impl StashManager {
    pub fn new(ctx: ManagerContext) -> Self {
        Self { ctx }
    }

    /// Untracked files count as pending changes.
    pub async fn has_pending_changes(&self, target: &RepositoryTarget) -> RepoflowResult<bool> {
        self.ctx.repo(target).is_dirty().await
    }

    /// Stashes tracked and untracked changes; a clean tree is `NothingToStash`.
    pub async fn save(
        &self,
        target: &RepositoryTarget,
        label: Option<&str>,
    ) -> RepoflowResult<OperationResult> {
        let result = self.save_inner(target, label).await;
        self.ctx.finish(target, OperationKind::Stash, None, result)
    }

    async fn save_inner(
        &self,
        target: &RepositoryTarget,
        label: Option<&str>,
    ) -> RepoflowResult<OperationResult> {
        let repo = self.ctx.repo(target);
        let branch = repo.current_branch().await?;

        if !repo.is_dirty().await? {
            return Ok(
                OperationResult::new(OperationKind::Stash, Outcome::NothingToStash, "working tree is clean")
                    .with_optional_branch(branch),
            );
        }

        let label = label
            .map(str::to_string)
            .unwrap_or_else(|| format!("repoflow {}", Local::now().format("%Y-%m-%d %H:%M:%S")));
        let result = repo
            .run(&["stash", "push", "--include-untracked", "-m", &label])
            .await?;

        let mut outcome = classify_plain(&result, Outcome::Stashed);
        if result.combined_output().contains("No local changes to save") {
            outcome = Outcome::NothingToStash;
        }
        let message = match outcome {
            Outcome::Stashed => format!("stashed changes as '{}'", label),
            Outcome::NothingToStash => "no local changes to save".to_string(),
            _ => "failed to stash changes".to_string(),
        };

        Ok(OperationResult::new(OperationKind::Stash, outcome, message)
            .with_optional_branch(branch)
            .with_output(result.combined_output())
            .with_metadata("label", label))
    }

    /// Re-applies the newest entry. A conflict keeps the entry.
    pub async fn pop(&self, target: &RepositoryTarget) -> RepoflowResult<OperationResult> {
        let result = self.pop_inner(target).await;
        self.ctx.finish(target, OperationKind::Stash, None, result)
    }

    async fn pop_inner(&self, target: &RepositoryTarget) -> RepoflowResult<OperationResult> {
        let repo = self.ctx.repo(target);
        let branch = repo.current_branch().await?;

        if repo.stash_count().await? == 0 {
            return Ok(
                OperationResult::new(OperationKind::Stash, Outcome::NothingToPop, "no stash entries")
                    .with_optional_branch(branch),
            );
        }

        let result = repo.run(&["stash", "pop"]).await?;
        let outcome = classify_stash_pop(&result);
        let message = match outcome {
            Outcome::Popped => "re-applied stashed changes",
            Outcome::NothingToPop => "no stash entries",
            Outcome::Conflict => "stashed changes conflict; entry kept until dropped",
            _ => "failed to re-apply stashed changes; entry kept",
        };
        let mut operation = OperationResult::new(OperationKind::Stash, outcome, message)
            .with_output(result.combined_output());

        if outcome == Outcome::Conflict {
            let paths = repo.conflicted_paths().await?;
            operation = operation.with_conflict(ConflictState::new(
                ConflictOrigin::StashPop,
                target.path().to_path_buf(),
                paths,
            ));
        }

        Ok(operation.with_optional_branch(branch))
    }

    /// Pop used to give back what an operation stashed earlier.
    ///
    /// Never fails: an error becomes a failed step so the caller can still
    /// report the entry as kept.
    pub async fn reapply(&self, target: &RepositoryTarget) -> OperationResult {
        match self.pop(target).await {
            Ok(result) => result,
            Err(e) => OperationResult::from_error(OperationKind::Stash, &e),
        }
    }

    /// Discards the newest entry, e.g. after a pop conflict was fixed by hand.
    pub async fn drop_latest(&self, target: &RepositoryTarget) -> RepoflowResult<OperationResult> {
        let result = self.drop_inner(target).await;
        self.ctx.finish(target, OperationKind::Stash, None, result)
    }

    async fn drop_inner(&self, target: &RepositoryTarget) -> RepoflowResult<OperationResult> {
        let repo = self.ctx.repo(target);
        let branch = repo.current_branch().await?;

        if repo.stash_count().await? == 0 {
            return Ok(
                OperationResult::new(OperationKind::Stash, Outcome::NothingToPop, "no stash entries")
                    .with_optional_branch(branch),
            );
        }

        let result = repo.run(&["stash", "drop"]).await?;
        let outcome = classify_plain(&result, Outcome::Dropped);
        let message = if outcome == Outcome::Dropped {
            "dropped newest stash entry"
        } else {
            "failed to drop stash entry"
        };

        Ok(OperationResult::new(OperationKind::Stash, outcome, message)
            .with_optional_branch(branch)
            .with_output(result.combined_output()))
    }
}

/// Folds the outcome of [`StashManager::reapply`] into the result of the
/// operation that stashed.
///
/// A successful result turns into a conflict or a failure when the pop did
/// not give the changes back; an already failed result keeps its outcome.
/// Either way the result says the entry is still in the stash.
pub fn fold_reapply(mut result: OperationResult, pop: &OperationResult) -> OperationResult {
    if pop.is_success() {
        return result;
    }

    if pop.is_conflict() {
        if result.is_success() {
            result.outcome = Outcome::Conflict;
            result.conflict = pop.conflict.clone();
        }
        result.message.push_str("; re-applying stashed changes conflicted, entry kept");
    } else {
        if result.is_success() {
            result.outcome = Outcome::Failed(pop.failure_kind().unwrap_or(FailureKind::ExternalCommand));
        }
        result.message.push_str("; stashed changes could not be re-applied, entry kept");
    }
    result.with_metadata("stash", "kept")
}

#[async_trait]
impl Operation for StashManager {
    type Params = StashRequest;

    async fn execute(
        &mut self,
        target: &RepositoryTarget,
        params: StashRequest,
    ) -> RepoflowResult<OperationResult> {
        match params {
            StashRequest::Save { label } => self.save(target, label.as_deref()).await,
            StashRequest::Pop => self.pop(target).await,
            StashRequest::Drop => self.drop_latest(target).await,
        }
    }
}
