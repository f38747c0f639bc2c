use async_trait::async_trait;
use tracing::debug;

use super::stash_manager::{fold_reapply, StashManager};
use super::{ManagerContext, Operation};
use crate::common::error::RepoflowError;
use crate::common::result::RepoflowResult;
use crate::domain::entities::operation::{FailureKind, OperationKind, OperationResult, Outcome};
use crate::domain::entities::repository_target::RepositoryTarget;
use crate::domain::value_objects::branch_name::BranchName;
use crate::infrastructure::git::output::classify_plain;
use crate::infrastructure::git::{GitRepository, REMOTE};

/// BranchManager への要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchRequest {
    Ensure(BranchName),
    Delete {
        name: BranchName,
        also_remote: bool,
        confirmed: bool,
    },
    List,
}

/// ブランチの切り替え・作成・削除
#[derive(Debug, Clone)]
pub struct BranchManager {
    ctx: ManagerContext,
    stash: StashManager,
}

impl BranchManager {
    pub fn new(ctx: ManagerContext, stash: StashManager) -> Self {
        Self { ctx, stash }
    }

    /// 指定ブランチをチェックアウトする（必要なら作成）
    ///
    /// A dirty tree is stashed before the switch and re-applied after it.
    pub async fn ensure_branch(
        &self,
        target: &RepositoryTarget,
        desired: &BranchName,
    ) -> RepoflowResult<OperationResult> {
        let result = self.ensure_inner(target, desired).await;
        self.ctx
            .finish(target, OperationKind::Branch, Some(desired.as_str()), result)
    }

    async fn ensure_inner(
        &self,
        target: &RepositoryTarget,
        desired: &BranchName,
    ) -> RepoflowResult<OperationResult> {
        let repo = self.ctx.repo(target);
        let current = repo.current_branch().await?;

        if current.as_deref() == Some(desired.as_str()) {
            return Ok(OperationResult::new(
                OperationKind::Branch,
                Outcome::AlreadyOnBranch,
                format!("already on {}", desired),
            )
            .with_branch(desired.as_str()));
        }

        let mut steps = Vec::new();
        let mut stashed = false;
        if repo.is_dirty().await? {
            let save = self
                .stash
                .save(target, Some(&format!("repoflow: before switching to {}", desired)))
                .await?;
            stashed = save.outcome == Outcome::Stashed;
            let saved_ok = save.is_success();
            steps.push(save);
            if !saved_ok {
                return Ok(OperationResult::failed(
                    OperationKind::Branch,
                    FailureKind::ExternalCommand,
                    format!("could not stash changes before switching to {}", desired),
                )
                .with_branch(desired.as_str())
                .with_steps(steps));
            }
        }

        let (args, success) = match self.checkout_args(&repo, target, desired).await {
            Ok(Some(plan)) => plan,
            Err(e) if stashed => {
                let failed = OperationResult::from_error(OperationKind::Branch, &e)
                    .with_branch(desired.as_str());
                return Ok(self.give_back(target, failed, stashed, steps).await);
            }
            Err(e) => return Err(e),
            Ok(None) => {
                let failed = OperationResult::failed(
                    OperationKind::Branch,
                    FailureKind::InvalidRequest,
                    format!(
                        "cannot create {}: base branch {} not found locally or on {}",
                        desired,
                        target.base_branch(),
                        REMOTE
                    ),
                )
                .with_branch(desired.as_str());
                return Ok(self.give_back(target, failed, stashed, steps).await);
            }
        };

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let checkout = match repo.run(&arg_refs).await {
            Ok(checkout) => checkout,
            Err(e) if stashed => {
                let failed = OperationResult::from_error(OperationKind::Branch, &e)
                    .with_branch(desired.as_str());
                return Ok(self.give_back(target, failed, stashed, steps).await);
            }
            Err(e) => return Err(e),
        };
        let outcome = classify_plain(&checkout, success);

        if !checkout.success() {
            let failed = OperationResult::new(
                OperationKind::Branch,
                outcome,
                format!("failed to check out {}", desired),
            )
            .with_branch(desired.as_str())
            .with_output(checkout.combined_output());
            return Ok(self.give_back(target, failed, stashed, steps).await);
        }

        let verb = if success == Outcome::Created { "created" } else { "switched to" };
        let result = OperationResult::new(OperationKind::Branch, outcome, format!("{} {}", verb, desired))
            .with_branch(desired.as_str())
            .with_output(checkout.combined_output());
        Ok(self.give_back(target, result, stashed, steps).await)
    }

    /// Re-applies what this call stashed and attaches the collected steps.
    async fn give_back(
        &self,
        target: &RepositoryTarget,
        mut result: OperationResult,
        stashed: bool,
        mut steps: Vec<OperationResult>,
    ) -> OperationResult {
        if stashed {
            let pop = self.stash.reapply(target).await;
            result = fold_reapply(result, &pop);
            steps.push(pop);
        }
        result.with_steps(steps)
    }

    /// Returns the checkout arguments and the outcome they produce, or None
    /// when no start point exists for a new branch.
    async fn checkout_args(
        &self,
        repo: &GitRepository,
        target: &RepositoryTarget,
        desired: &BranchName,
    ) -> RepoflowResult<Option<(Vec<String>, Outcome)>> {
        let name = desired.as_str().to_string();

        if repo.local_branch_exists(&name).await? {
            return Ok(Some((vec!["checkout".into(), name], Outcome::Switched)));
        }

        if repo.remote_branch_exists(&name).await? {
            debug!("{} exists on {}, creating tracking branch", name, REMOTE);
            let fetch = repo.run(&["fetch", REMOTE, &name]).await?;
            GitRepository::check(&["fetch", REMOTE, &name], &fetch)?;
            let upstream = format!("{}/{}", REMOTE, name);
            return Ok(Some((
                vec![
                    "checkout".into(),
                    "-b".into(),
                    name,
                    "--track".into(),
                    upstream,
                ],
                Outcome::Created,
            )));
        }

        let base = target.base_branch().as_str();
        let start = if repo.local_branch_exists(base).await? {
            base.to_string()
        } else if repo.remote_tracking_exists(base).await? {
            format!("{}/{}", REMOTE, base)
        } else {
            return Ok(None);
        };

        Ok(Some((
            vec!["checkout".into(), "-b".into(), name, start],
            Outcome::Created,
        )))
    }

    /// ブランチを削除する（確認フラグ必須）
    pub async fn delete_branch(
        &self,
        target: &RepositoryTarget,
        name: &BranchName,
        also_remote: bool,
        confirmed: bool,
    ) -> RepoflowResult<OperationResult> {
        let result = self.delete_inner(target, name, also_remote, confirmed).await;
        self.ctx
            .finish(target, OperationKind::DeleteBranch, Some(name.as_str()), result)
    }

    async fn delete_inner(
        &self,
        target: &RepositoryTarget,
        name: &BranchName,
        also_remote: bool,
        confirmed: bool,
    ) -> RepoflowResult<OperationResult> {
        if !confirmed {
            return Err(RepoflowError::confirmation_required(format!(
                "delete-branch {}",
                name
            )));
        }
        if name == target.base_branch() {
            return Err(RepoflowError::invalid_request(
                "branch",
                "refusing to delete the base branch",
                Some(name.to_string()),
            ));
        }

        let repo = self.ctx.repo(target);
        let current = repo.current_branch().await?;
        if current.as_deref() == Some(name.as_str()) {
            return Err(RepoflowError::repository_state(
                format!("refusing to delete the checked-out branch {}", name),
                Some(target.path().to_path_buf()),
            ));
        }

        let dirty = repo.is_dirty().await?;
        let local = repo.local_branch_exists(name.as_str()).await?;
        let remote = also_remote && repo.remote_branch_exists(name.as_str()).await?;

        if !local && !remote {
            return Ok(OperationResult::new(
                OperationKind::DeleteBranch,
                Outcome::NotFound,
                format!("branch {} does not exist", name),
            )
            .with_branch(name.as_str()));
        }

        let mut steps = Vec::new();
        let mut deleted = Vec::new();
        if local {
            let result = repo.run(&["branch", "-D", name.as_str()]).await?;
            let outcome = classify_plain(&result, Outcome::Deleted);
            let step = OperationResult::new(OperationKind::DeleteBranch, outcome, "local branch")
                .with_output(result.combined_output());
            steps.push(step);
            if outcome != Outcome::Deleted {
                return Ok(OperationResult::new(
                    OperationKind::DeleteBranch,
                    outcome,
                    format!("failed to delete local branch {}", name),
                )
                .with_branch(name.as_str())
                .with_output(result.combined_output())
                .with_steps(steps));
            }
            deleted.push("local");
        }

        if remote {
            let result = repo
                .run(&["push", REMOTE, "--delete", name.as_str()])
                .await?;
            let outcome = classify_plain(&result, Outcome::Deleted);
            steps.push(
                OperationResult::new(OperationKind::DeleteBranch, outcome, "remote branch")
                    .with_output(result.combined_output()),
            );
            if outcome != Outcome::Deleted {
                return Ok(OperationResult::new(
                    OperationKind::DeleteBranch,
                    outcome,
                    format!("failed to delete {}/{}", REMOTE, name),
                )
                .with_branch(name.as_str())
                .with_output(result.combined_output())
                .with_steps(steps));
            }
            deleted.push("remote");
        }

        let mut result = OperationResult::new(
            OperationKind::DeleteBranch,
            Outcome::Deleted,
            format!("deleted {} ({})", name, deleted.join(" + ")),
        )
        .with_branch(name.as_str())
        .with_steps(steps);
        if dirty {
            result = result.with_metadata("working_tree", "dirty");
        }
        Ok(result)
    }

    /// ローカルブランチの一覧
    pub async fn list_branches(&self, target: &RepositoryTarget) -> RepoflowResult<OperationResult> {
        let result = self.list_inner(target).await;
        self.ctx.finish(target, OperationKind::Branch, None, result)
    }

    async fn list_inner(&self, target: &RepositoryTarget) -> RepoflowResult<OperationResult> {
        let repo = self.ctx.repo(target);
        let current = repo.current_branch().await?;
        let branches = repo.local_branches().await?;

        let listing = branches
            .iter()
            .map(|branch| {
                if Some(branch.as_str()) == current.as_deref() {
                    format!("* {}", branch)
                } else {
                    format!("  {}", branch)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(OperationResult::new(
            OperationKind::Branch,
            Outcome::Completed,
            format!("{} local branches", branches.len()),
        )
        .with_optional_branch(current)
        .with_output(listing))
    }
}

#[async_trait]
impl Operation for BranchManager {
    type Params = BranchRequest;

    async fn execute(
        &mut self,
        target: &RepositoryTarget,
        params: BranchRequest,
    ) -> RepoflowResult<OperationResult> {
        match params {
            BranchRequest::Ensure(name) => self.ensure_branch(target, &name).await,
            BranchRequest::Delete {
                name,
                also_remote,
                confirmed,
            } => self.delete_branch(target, &name, also_remote, confirmed).await,
            BranchRequest::List => self.list_branches(target).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::managers::test_support::{missing, ok, ok_stderr, target, Harness};
    use crate::domain::entities::operation::OperationStatus;

    const BRANCH: [&str; 4] = ["symbolic-ref", "--quiet", "--short", "HEAD"];

    fn manager(ctx: ManagerContext) -> BranchManager {
        BranchManager::new(ctx.clone(), StashManager::new(ctx))
    }

    #[tokio::test]
    async fn test_delete_without_confirmation_runs_nothing() {
        // 期待値を設定しないモックは呼び出されるとパニックする
        let harness = Harness::new();
        let (ctx, log, _dir) = harness.context();
        let name = BranchName::new("old").unwrap();

        let error = manager(ctx)
            .delete_branch(&target(), &name, true, false)
            .await
            .unwrap_err();
        assert!(matches!(error, RepoflowError::ConfirmationRequired { .. }));

        let records = log.read_today().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, OperationKind::DeleteBranch);
        assert_eq!(records[0].status, OperationStatus::Failure);
    }

    #[tokio::test]
    async fn test_delete_refuses_base_branch() {
        let harness = Harness::new();
        let (ctx, _log, _dir) = harness.context();
        let name = BranchName::new("main").unwrap();

        let error = manager(ctx)
            .delete_branch(&target(), &name, false, true)
            .await
            .unwrap_err();
        assert!(matches!(error, RepoflowError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_delete_missing_branch_is_not_found() {
        let mut harness = Harness::new();
        harness
            .expect(&BRANCH, ok("feature/x\n"))
            .expect(&["status", "--porcelain"], ok(""))
            .expect(&["show-ref", "--verify", "--quiet", "refs/heads/old"], missing());
        let (ctx, _log, _dir) = harness.context();
        let name = BranchName::new("old").unwrap();

        let result = manager(ctx)
            .delete_branch(&target(), &name, false, true)
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::NotFound);
        assert_eq!(result.status(), OperationStatus::Noop);
    }

    #[tokio::test]
    async fn test_already_on_branch_does_not_stash() {
        let mut harness = Harness::new();
        harness.expect(&BRANCH, ok("feature/x\n"));
        let (ctx, _log, _dir) = harness.context();
        let name = BranchName::new("feature/x").unwrap();

        let result = manager(ctx).ensure_branch(&target(), &name).await.unwrap();
        assert_eq!(result.outcome, Outcome::AlreadyOnBranch);
        assert!(!result.stashed());
    }

    #[tokio::test]
    async fn test_switch_on_clean_tree() {
        let mut harness = Harness::new();
        harness
            .expect(&BRANCH, ok("main\n"))
            .expect(&["status", "--porcelain"], ok(""))
            .expect(&["show-ref", "--verify", "--quiet", "refs/heads/feature/x"], ok(""))
            .expect(&["checkout", "feature/x"], ok_stderr("Switched to branch 'feature/x'\n"));
        let (ctx, _log, _dir) = harness.context();
        let name = BranchName::new("feature/x").unwrap();

        let result = manager(ctx).ensure_branch(&target(), &name).await.unwrap();
        assert_eq!(result.outcome, Outcome::Switched);
        assert!(result.steps.is_empty());
    }

    #[tokio::test]
    async fn test_new_branch_starts_at_base() {
        let mut harness = Harness::new();
        harness
            .expect(&BRANCH, ok("main\n"))
            .expect(&["status", "--porcelain"], ok(""))
            .expect(&["show-ref", "--verify", "--quiet", "refs/heads/feature/x"], missing())
            .expect(&["ls-remote", "--heads", "origin", "feature/x"], ok(""))
            .expect(&["show-ref", "--verify", "--quiet", "refs/heads/main"], ok(""))
            .expect(&["checkout", "-b", "feature/x", "main"], ok(""));
        let (ctx, _log, _dir) = harness.context();
        let name = BranchName::new("feature/x").unwrap();

        let result = manager(ctx).ensure_branch(&target(), &name).await.unwrap();
        assert_eq!(result.outcome, Outcome::Created);
    }
}
