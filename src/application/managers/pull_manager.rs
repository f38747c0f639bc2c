use async_trait::async_trait;

use super::stash_manager::{fold_reapply, StashManager};
use super::{ManagerContext, Operation};
use crate::common::error::RepoflowError;
use crate::common::result::RepoflowResult;
use crate::domain::entities::conflict::{ConflictChoice, ConflictOrigin, ConflictState};
use crate::domain::entities::operation::{FailureKind, OperationKind, OperationResult, Outcome};
use crate::domain::entities::repository_target::RepositoryTarget;
use crate::domain::value_objects::branch_name::BranchName;
use crate::infrastructure::git::output::{classify_fetch_update, classify_plain, classify_pull};
use crate::infrastructure::git::REMOTE;

/// PullManager への要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequest {
    Pull(BranchName),
    ResolveConflict(ConflictChoice),
}

/// リモートからの取り込み
#[derive(Debug, Clone)]
pub struct PullManager {
    ctx: ManagerContext,
    stash: StashManager,
}

impl PullManager {
    pub fn new(ctx: ManagerContext, stash: StashManager) -> Self {
        Self { ctx, stash }
    }

    /// Brings `branch` up to date with its remote counterpart.
    ///
    /// A checked-out branch is merged (stashing a dirty tree around it); any
    /// other branch is fast-forwarded without touching the working tree.
    pub async fn pull(
        &self,
        target: &RepositoryTarget,
        branch: &BranchName,
    ) -> RepoflowResult<OperationResult> {
        let result = self.pull_inner(target, branch).await;
        self.ctx
            .finish(target, OperationKind::Pull, Some(branch.as_str()), result)
    }

    async fn pull_inner(
        &self,
        target: &RepositoryTarget,
        branch: &BranchName,
    ) -> RepoflowResult<OperationResult> {
        let repo = self.ctx.repo(target);
        let dirty = repo.is_dirty().await?;
        let current = repo.current_branch().await?;

        if current.as_deref() != Some(branch.as_str()) {
            let refspec = format!("{}:{}", branch, branch);
            let fetch = repo.run(&["fetch", REMOTE, &refspec]).await?;
            let outcome = classify_fetch_update(&fetch);
            return Ok(OperationResult::new(
                OperationKind::Pull,
                outcome,
                pull_message(outcome, branch),
            )
            .with_branch(branch.as_str())
            .with_output(fetch.combined_output()));
        }

        let mut steps = Vec::new();
        let mut stashed = false;
        if dirty {
            let save = self
                .stash
                .save(target, Some(&format!("repoflow: before pulling {}", branch)))
                .await?;
            stashed = save.outcome == Outcome::Stashed;
            let saved_ok = save.is_success();
            steps.push(save);
            if !saved_ok {
                return Ok(OperationResult::failed(
                    OperationKind::Pull,
                    FailureKind::ExternalCommand,
                    format!("could not stash changes before pulling {}", branch),
                )
                .with_branch(branch.as_str())
                .with_steps(steps));
            }
        }

        let mut result = match self.merge_remote(target, branch).await {
            Ok(result) => result,
            Err(e) if stashed => {
                let failed = OperationResult::from_error(OperationKind::Pull, &e)
                    .with_branch(branch.as_str())
                    .with_metadata("stash", "kept");
                return Ok(failed.with_steps(steps));
            }
            Err(e) => return Err(e),
        };

        if result.is_conflict() {
            if stashed {
                result.message.push_str("; stashed changes stay in the stash until the merge is resolved");
                result = result.with_metadata("stash", "kept");
            }
            return Ok(result.with_steps(steps));
        }

        if stashed {
            let pop = self.stash.reapply(target).await;
            result = fold_reapply(result, &pop);
            steps.push(pop);
        }

        Ok(result.with_steps(steps))
    }

    /// `git pull --no-rebase origin <branch>` on the checked-out branch.
    async fn merge_remote(
        &self,
        target: &RepositoryTarget,
        branch: &BranchName,
    ) -> RepoflowResult<OperationResult> {
        let repo = self.ctx.repo(target);
        let pull = repo
            .run(&["pull", "--no-rebase", REMOTE, branch.as_str()])
            .await?;
        let outcome = classify_pull(&pull);
        let result = OperationResult::new(OperationKind::Pull, outcome, pull_message(outcome, branch))
            .with_branch(branch.as_str())
            .with_output(pull.combined_output());

        if outcome != Outcome::Conflict {
            return Ok(result);
        }
        let paths = repo.conflicted_paths().await?;
        Ok(result.with_conflict(ConflictState::new(
            ConflictOrigin::Merge,
            target.path().to_path_buf(),
            paths,
        )))
    }

    /// 進行中のマージコンフリクトを解決する
    pub async fn resolve_conflict(
        &self,
        target: &RepositoryTarget,
        choice: ConflictChoice,
    ) -> RepoflowResult<OperationResult> {
        let result = self.resolve_inner(target, choice).await;
        self.ctx.finish(target, OperationKind::Pull, None, result)
    }

    async fn resolve_inner(
        &self,
        target: &RepositoryTarget,
        choice: ConflictChoice,
    ) -> RepoflowResult<OperationResult> {
        if choice == ConflictChoice::Skip {
            return Err(RepoflowError::invalid_request(
                "choice",
                "skip is only available while rebasing",
                Some(choice.to_string()),
            ));
        }

        let repo = self.ctx.repo(target);
        let branch = repo.current_branch().await?;
        if !repo.merge_in_progress().await? {
            return Ok(OperationResult::new(
                OperationKind::Pull,
                Outcome::NothingToAbort,
                "no merge in progress",
            )
            .with_optional_branch(branch));
        }

        match choice {
            ConflictChoice::Abort => {
                let abort = repo.run(&["merge", "--abort"]).await?;
                let outcome = classify_plain(&abort, Outcome::Completed);
                let message = if abort.success() { "merge aborted" } else { "failed to abort merge" };
                Ok(OperationResult::new(OperationKind::Pull, outcome, message)
                    .with_optional_branch(branch)
                    .with_output(abort.combined_output()))
            }
            _ => {
                let paths = repo.conflicted_paths().await?;
                if !paths.is_empty() {
                    return Ok(OperationResult::new(
                        OperationKind::Pull,
                        Outcome::Conflict,
                        format!("{} paths still unmerged; fix and stage them first", paths.len()),
                    )
                    .with_optional_branch(branch)
                    .with_conflict(ConflictState::new(
                        ConflictOrigin::Merge,
                        target.path().to_path_buf(),
                        paths,
                    )));
                }

                let commit = repo.run(&["commit", "--no-edit"]).await?;
                let outcome = classify_plain(&commit, Outcome::Merged);
                let message = if commit.success() { "merge concluded" } else { "failed to conclude merge" };
                Ok(OperationResult::new(OperationKind::Pull, outcome, message)
                    .with_optional_branch(branch)
                    .with_output(commit.combined_output()))
            }
        }
    }
}

fn pull_message(outcome: Outcome, branch: &BranchName) -> String {
    match outcome {
        Outcome::UpToDate => format!("{} is up to date", branch),
        Outcome::FastForwarded => format!("fast-forwarded {}", branch),
        Outcome::Merged => format!("merged {}/{} into {}", REMOTE, branch, branch),
        Outcome::Created => format!("created {} from {}/{}", branch, REMOTE, branch),
        Outcome::Conflict => format!("pulling {} produced conflicts", branch),
        Outcome::Unclassified => format!("pulled {}", branch),
        Outcome::Failed(FailureKind::NoUpstream) => format!("{} has no upstream on {}", branch, REMOTE),
        Outcome::Failed(FailureKind::Network) => format!("could not reach {} to pull {}", REMOTE, branch),
        Outcome::Failed(FailureKind::Authentication) => format!("authentication failed pulling {}", branch),
        Outcome::Failed(FailureKind::NonFastForward) => {
            format!("local {} has diverged from {}/{}", branch, REMOTE, branch)
        }
        Outcome::Failed(FailureKind::Timeout) => format!("pulling {} timed out", branch),
        Outcome::Failed(FailureKind::Cancelled) => format!("pulling {} was cancelled", branch),
        _ => format!("failed to pull {}", branch),
    }
}

#[async_trait]
impl Operation for PullManager {
    type Params = PullRequest;

    async fn execute(
        &mut self,
        target: &RepositoryTarget,
        params: PullRequest,
    ) -> RepoflowResult<OperationResult> {
        match params {
            PullRequest::Pull(branch) => self.pull(target, &branch).await,
            PullRequest::ResolveConflict(choice) => self.resolve_conflict(target, choice).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::managers::test_support::{exit, ok, ok_stderr, target, Harness};
    use crate::domain::entities::operation::OperationStatus;

    const BRANCH: [&str; 4] = ["symbolic-ref", "--quiet", "--short", "HEAD"];

    fn manager(ctx: ManagerContext) -> PullManager {
        PullManager::new(ctx.clone(), StashManager::new(ctx))
    }

    #[tokio::test]
    async fn test_pull_checked_out_branch() {
        let mut harness = Harness::new();
        harness
            .expect(&["status", "--porcelain"], ok(""))
            .expect(&BRANCH, ok("main\n"))
            .expect(&["pull", "--no-rebase", "origin", "main"], ok("Already up to date.\n"));
        let (ctx, _log, _dir) = harness.context();

        let result = manager(ctx)
            .pull(&target(), &BranchName::new("main").unwrap())
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::UpToDate);
    }

    #[tokio::test]
    async fn test_pull_other_branch_fetches_into_ref() {
        let mut harness = Harness::new();
        harness
            .expect(&["status", "--porcelain"], ok(" M a.txt\n"))
            .expect(&BRANCH, ok("feature/x\n"))
            .expect(
                &["fetch", "origin", "main:main"],
                ok_stderr("   1a2b3c4..5d6e7f8  main       -> main\n"),
            );
        let (ctx, _log, _dir) = harness.context();

        let result = manager(ctx)
            .pull(&target(), &BranchName::new("main").unwrap())
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::FastForwarded);
        assert!(!result.stashed());
    }

    #[tokio::test]
    async fn test_pull_without_remote_is_logged_failure() {
        let mut harness = Harness::new();
        harness
            .expect(&["status", "--porcelain"], ok(""))
            .expect(&BRANCH, ok("main\n"))
            .expect(
                &["pull", "--no-rebase", "origin", "main"],
                exit(1, "fatal: 'origin' does not appear to be a git repository\nfatal: Could not read from remote repository."),
            );
        let (ctx, log, _dir) = harness.context();

        let result = manager(ctx)
            .pull(&target(), &BranchName::new("main").unwrap())
            .await
            .unwrap();
        assert_eq!(result.failure_kind(), Some(FailureKind::NoUpstream));

        let records = log.read_today().unwrap();
        assert_eq!(records.last().unwrap().status, OperationStatus::Failure);
    }

    #[tokio::test]
    async fn test_resolve_skip_is_rejected_for_merges() {
        let harness = Harness::new();
        let (ctx, _log, _dir) = harness.context();

        let error = manager(ctx)
            .resolve_conflict(&target(), ConflictChoice::Skip)
            .await
            .unwrap_err();
        assert_eq!(error.failure_kind(), FailureKind::InvalidRequest);
    }
}
