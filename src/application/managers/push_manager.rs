use async_trait::async_trait;
use tracing::{info, warn};

use super::{ManagerContext, Operation};
use crate::common::error::RepoflowError;
use crate::common::result::RepoflowResult;
use crate::domain::entities::operation::{FailureKind, OperationKind, OperationResult, Outcome};
use crate::domain::entities::repository_target::RepositoryTarget;
use crate::domain::value_objects::branch_name::BranchName;
use crate::infrastructure::git::output::{classify_plain, classify_push};
use crate::infrastructure::git::{GitRepository, REMOTE};

/// PushManager への要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushRequest {
    Commit(String),
    Push(BranchName),
    CommitAndPush { message: String, branch: BranchName },
}

/// コミットとリモートへの送信
#[derive(Debug, Clone)]
pub struct PushManager {
    ctx: ManagerContext,
}

impl PushManager {
    pub fn new(ctx: ManagerContext) -> Self {
        Self { ctx }
    }

    /// Stages everything and commits. A clean tree is `NothingToCommit`.
    pub async fn commit(
        &self,
        target: &RepositoryTarget,
        message: &str,
    ) -> RepoflowResult<OperationResult> {
        let result = self.commit_inner(target, message).await;
        self.ctx.finish(target, OperationKind::Push, None, result)
    }

    async fn commit_inner(
        &self,
        target: &RepositoryTarget,
        message: &str,
    ) -> RepoflowResult<OperationResult> {
        let message = message.trim();
        if message.is_empty() {
            return Err(RepoflowError::invalid_request(
                "message",
                "commit message cannot be empty",
                None,
            ));
        }

        let repo = self.ctx.repo(target);
        if !repo.is_dirty().await? {
            let branch = repo.current_branch().await?;
            return Ok(OperationResult::new(
                OperationKind::Push,
                Outcome::NothingToCommit,
                "nothing to commit, working tree clean",
            )
            .with_optional_branch(branch));
        }

        let branch = repo.current_branch().await?;
        let add = repo.run(&["add", "-A"]).await?;
        GitRepository::check(&["add", "-A"], &add)?;

        let commit = repo.run(&["commit", "-m", message]).await?;
        let output = commit.combined_output();
        let outcome = if output.contains("nothing to commit") {
            Outcome::NothingToCommit
        } else {
            classify_plain(&commit, Outcome::Committed)
        };
        let text = match outcome {
            Outcome::Committed => format!("committed: {}", message),
            Outcome::NothingToCommit => "nothing to commit".to_string(),
            _ => "commit failed".to_string(),
        };

        Ok(OperationResult::new(OperationKind::Push, outcome, text)
            .with_optional_branch(branch)
            .with_output(output))
    }

    /// Pushes `branch`, publishing it with an upstream on the first push.
    ///
    /// A published branch is fetched first; when `origin/<branch>` has
    /// commits the local branch lacks, nothing is pushed.
    pub async fn push(
        &self,
        target: &RepositoryTarget,
        branch: &BranchName,
    ) -> RepoflowResult<OperationResult> {
        let result = self.push_inner(target, branch).await;
        self.ctx
            .finish(target, OperationKind::Push, Some(branch.as_str()), result)
    }

    async fn push_inner(
        &self,
        target: &RepositoryTarget,
        branch: &BranchName,
    ) -> RepoflowResult<OperationResult> {
        let repo = self.ctx.repo(target);
        let dirty = repo.is_dirty().await?;
        let published = repo.remote_tracking_exists(branch.as_str()).await?;
        let tracking = format!("{}/{}", REMOTE, branch);

        if published {
            let fetch = repo.run(&["fetch", REMOTE, branch.as_str()]).await?;
            if fetch.success() {
                let behind = repo.count_commits(&format!("{}..{}", branch, tracking)).await?;
                if behind > 0 {
                    info!("{} is {} commit(s) behind {}; not pushing", branch, behind, tracking);
                    return Ok(OperationResult::failed(
                        OperationKind::Push,
                        FailureKind::NonFastForward,
                        format!("{} is {} commit(s) behind {}; pull first", branch, behind, tracking),
                    )
                    .with_branch(branch.as_str())
                    .with_metadata("behind", behind.to_string()));
                }
            } else {
                warn!("could not fetch {} before pushing: {}", tracking, fetch.stderr.trim());
            }
        }

        // 初回は送信先がないのでブランチの全コミットが対象
        let pending = if published {
            repo.count_commits(&format!("{}..{}", tracking, branch)).await?
        } else {
            repo.count_commits(branch.as_str()).await?
        };

        let push = if published {
            repo.run(&["push", REMOTE, branch.as_str()]).await?
        } else {
            repo.run(&["push", "--set-upstream", REMOTE, branch.as_str()])
                .await?
        };

        let mut outcome = classify_push(&push);
        if !published && outcome == Outcome::Pushed {
            outcome = Outcome::PublishedUpstream;
        }

        let message = match outcome {
            Outcome::Pushed => format!("pushed {} to {}", branch, REMOTE),
            Outcome::PublishedUpstream => format!("published {} to {} with upstream", branch, REMOTE),
            Outcome::UpToDate => format!("{} already up to date on {}", branch, REMOTE),
            Outcome::Failed(FailureKind::NonFastForward) => format!(
                "{}/{} has commits you do not have; pull or rebase first",
                REMOTE, branch
            ),
            Outcome::Failed(FailureKind::Authentication) => {
                format!("authentication failed pushing {}", branch)
            }
            Outcome::Failed(FailureKind::Network) => format!("could not reach {}", REMOTE),
            Outcome::Failed(FailureKind::NoUpstream) => format!("no {} remote configured", REMOTE),
            _ => format!("failed to push {}", branch),
        };

        let mut result = OperationResult::new(OperationKind::Push, outcome, message)
            .with_branch(branch.as_str())
            .with_output(push.combined_output())
            .with_metadata("pending_commits", pending.to_string());
        if dirty {
            result = result.with_metadata("uncommitted_changes", "true");
        }
        Ok(result)
    }

    /// コミットしてからプッシュする
    ///
    /// Pushing still happens when there was nothing new to commit.
    pub async fn commit_and_push(
        &self,
        target: &RepositoryTarget,
        message: &str,
        branch: &BranchName,
    ) -> RepoflowResult<OperationResult> {
        let commit = self.commit(target, message).await?;
        if !commit.is_success() {
            return Ok(OperationResult::new(
                OperationKind::Push,
                commit.outcome,
                commit.message.clone(),
            )
            .with_branch(branch.as_str())
            .with_steps(vec![commit]));
        }

        let push = self.push(target, branch).await?;
        Ok(OperationResult::new(OperationKind::Push, push.outcome, push.message.clone())
            .with_branch(branch.as_str())
            .with_steps(vec![commit, push]))
    }
}

#[async_trait]
impl Operation for PushManager {
    type Params = PushRequest;

    async fn execute(
        &mut self,
        target: &RepositoryTarget,
        params: PushRequest,
    ) -> RepoflowResult<OperationResult> {
        match params {
            PushRequest::Commit(message) => self.commit(target, &message).await,
            PushRequest::Push(branch) => self.push(target, &branch).await,
            PushRequest::CommitAndPush { message, branch } => {
                self.commit_and_push(target, &message, &branch).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::managers::test_support::{exit, missing, ok, ok_stderr, target, Harness};
    use crate::domain::entities::operation::OperationStatus;

    const BRANCH: [&str; 4] = ["symbolic-ref", "--quiet", "--short", "HEAD"];

    #[tokio::test]
    async fn test_commit_clean_tree_runs_no_commit() {
        // commit コマンドが呼ばれればモックがパニックする
        let mut harness = Harness::new();
        harness
            .expect(&["status", "--porcelain"], ok(""))
            .expect(&BRANCH, ok("feature/x\n"));
        let (ctx, log, _dir) = harness.context();

        let result = PushManager::new(ctx)
            .commit(&target(), "wip")
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::NothingToCommit);

        let records = log.read_today().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, OperationKind::Push);
        assert_eq!(records[0].status, OperationStatus::Noop);
    }

    #[tokio::test]
    async fn test_commit_rejects_empty_message() {
        let harness = Harness::new();
        let (ctx, _log, _dir) = harness.context();

        let error = PushManager::new(ctx).commit(&target(), "  ").await.unwrap_err();
        assert!(matches!(error, RepoflowError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_first_push_sets_upstream() {
        let mut harness = Harness::new();
        harness
            .expect(&["status", "--porcelain"], ok(""))
            .expect(
                &["show-ref", "--verify", "--quiet", "refs/remotes/origin/feature/x"],
                missing(),
            )
            .expect(&["rev-list", "--count", "feature/x"], ok("3\n"))
            .expect(
                &["push", "--set-upstream", "origin", "feature/x"],
                ok_stderr(" * [new branch]      feature/x -> feature/x\nbranch 'feature/x' set up to track 'origin/feature/x'.\n"),
            );
        let (ctx, _log, _dir) = harness.context();

        let result = PushManager::new(ctx)
            .push(&target(), &BranchName::new("feature/x").unwrap())
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::PublishedUpstream);
        assert_eq!(result.metadata.get("pending_commits").map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn test_rejected_push_is_non_fast_forward() {
        let mut harness = Harness::new();
        harness
            .expect(&["status", "--porcelain"], ok(""))
            .expect(
                &["show-ref", "--verify", "--quiet", "refs/remotes/origin/feature/x"],
                ok(""),
            )
            .expect(&["fetch", "origin", "feature/x"], ok(""))
            .expect(&["rev-list", "--count", "feature/x..origin/feature/x"], ok("0\n"))
            .expect(&["rev-list", "--count", "origin/feature/x..feature/x"], ok("1\n"))
            .expect(
                &["push", "origin", "feature/x"],
                exit(1, " ! [rejected]        feature/x -> feature/x (fetch first)\nerror: failed to push some refs"),
            );
        let (ctx, _log, _dir) = harness.context();

        let result = PushManager::new(ctx)
            .push(&target(), &BranchName::new("feature/x").unwrap())
            .await
            .unwrap();
        assert_eq!(result.failure_kind(), Some(FailureKind::NonFastForward));
    }

    #[tokio::test]
    async fn test_branch_behind_remote_is_not_pushed() {
        // push コマンドが呼ばれればモックがパニックする
        let mut harness = Harness::new();
        harness
            .expect(&["status", "--porcelain"], ok(""))
            .expect(
                &["show-ref", "--verify", "--quiet", "refs/remotes/origin/feature/x"],
                ok(""),
            )
            .expect(&["fetch", "origin", "feature/x"], ok(""))
            .expect(&["rev-list", "--count", "feature/x..origin/feature/x"], ok("2\n"));
        let (ctx, log, _dir) = harness.context();

        let result = PushManager::new(ctx)
            .push(&target(), &BranchName::new("feature/x").unwrap())
            .await
            .unwrap();
        assert_eq!(result.failure_kind(), Some(FailureKind::NonFastForward));
        assert_eq!(result.metadata.get("behind").map(String::as_str), Some("2"));
        assert_eq!(result.message, "feature/x is 2 commit(s) behind origin/feature/x; pull first");
        assert_eq!(log.read_today().unwrap()[0].status, OperationStatus::Failure);
    }

    #[tokio::test]
    async fn test_failed_sync_fetch_still_pushes() {
        let mut harness = Harness::new();
        harness
            .expect(&["status", "--porcelain"], ok(""))
            .expect(
                &["show-ref", "--verify", "--quiet", "refs/remotes/origin/feature/x"],
                ok(""),
            )
            .expect(&["fetch", "origin", "feature/x"], exit(128, "fatal: unable to access"))
            .expect(&["rev-list", "--count", "origin/feature/x..feature/x"], ok("1\n"))
            .expect(
                &["push", "origin", "feature/x"],
                ok_stderr("   abc123..def456  feature/x -> feature/x\n"),
            );
        let (ctx, _log, _dir) = harness.context();

        let result = PushManager::new(ctx)
            .push(&target(), &BranchName::new("feature/x").unwrap())
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Pushed);
        assert_eq!(result.metadata.get("pending_commits").map(String::as_str), Some("1"));
    }
}
