use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::common::error::RepoflowError;
use crate::common::result::RepoflowResult;
use crate::infrastructure::process::{CommandInvocation, CommandResult, CommandStatus, ProcessRunner};

/// Name of the remote every operation talks to.
pub const REMOTE: &str = "origin";

/// 1つの作業ツリーに対するgitクエリのヘルパー
///
/// Every query runs a fresh command; nothing is cached between calls.
#[derive(Clone)]
pub struct GitRepository {
    runner: Arc<dyn ProcessRunner>,
    path: PathBuf,
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository").field("path", &self.path).finish()
    }
}

impl GitRepository {
    pub fn new(runner: Arc<dyn ProcessRunner>, path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `git <args>` and returns the raw result.
    pub async fn run(&self, args: &[&str]) -> RepoflowResult<CommandResult> {
        self.runner
            .run(CommandInvocation::new(&self.path, args.iter().copied()))
            .await
    }

    /// Runs `git <args>` and returns trimmed stdout, failing on non-zero exit.
    pub async fn run_checked(&self, args: &[&str]) -> RepoflowResult<String> {
        let result = self.run(args).await?;
        Self::check(args, &result)?;
        Ok(result.stdout.trim().to_string())
    }

    /// Converts an unsuccessful result into an error.
    pub fn check(args: &[&str], result: &CommandResult) -> RepoflowResult<()> {
        let command = format!("git {}", args.join(" "));
        match result.status {
            CommandStatus::TimedOut => Err(RepoflowError::timeout(command, result.duration_ms / 1000)),
            CommandStatus::Cancelled => Err(RepoflowError::cancelled(command)),
            CommandStatus::Exited if result.exit_code != 0 => Err(RepoflowError::git_failed(
                command,
                result.exit_code,
                result.combined_output().trim(),
            )),
            CommandStatus::Exited => Ok(()),
        }
    }

    /// Runs a query whose exit code is the answer; interrupted runs are errors.
    async fn probe(&self, args: &[&str]) -> RepoflowResult<CommandResult> {
        let result = self.run(args).await?;
        if result.status != CommandStatus::Exited {
            Self::check(args, &result)?;
        }
        Ok(result)
    }

    /// 未コミットの変更（追跡外ファイルを含む）があるかどうか
    pub async fn is_dirty(&self) -> RepoflowResult<bool> {
        let status = self.run_checked(&["status", "--porcelain"]).await?;
        Ok(!status.is_empty())
    }

    /// 現在のブランチ名（detached HEAD の場合は None）
    pub async fn current_branch(&self) -> RepoflowResult<Option<String>> {
        let result = self.probe(&["symbolic-ref", "--quiet", "--short", "HEAD"]).await?;
        if result.exit_code == 0 {
            let branch = result.stdout.trim();
            Ok((!branch.is_empty()).then(|| branch.to_string()))
        } else {
            Ok(None)
        }
    }

    pub async fn local_branch_exists(&self, name: &str) -> RepoflowResult<bool> {
        let reference = format!("refs/heads/{}", name);
        let result = self
            .probe(&["show-ref", "--verify", "--quiet", &reference])
            .await?;
        Ok(result.exit_code == 0)
    }

    /// Remote-tracking ref `origin/<name>` exists locally.
    pub async fn remote_tracking_exists(&self, name: &str) -> RepoflowResult<bool> {
        let reference = format!("refs/remotes/{}/{}", REMOTE, name);
        let result = self
            .probe(&["show-ref", "--verify", "--quiet", &reference])
            .await?;
        Ok(result.exit_code == 0)
    }

    /// Asks the remote whether it has the branch. Unreachable remotes count as "no".
    pub async fn remote_branch_exists(&self, name: &str) -> RepoflowResult<bool> {
        let result = self.probe(&["ls-remote", "--heads", REMOTE, name]).await?;
        if result.exit_code != 0 {
            debug!("ls-remote failed in {}: {}", self.path.display(), result.stderr.trim());
            return Ok(false);
        }
        Ok(!result.stdout.trim().is_empty())
    }

    pub async fn has_remote(&self) -> RepoflowResult<bool> {
        let remotes = self.run_checked(&["remote"]).await?;
        Ok(remotes.lines().any(|line| line.trim() == REMOTE))
    }

    pub async fn rev_parse(&self, rev: &str) -> RepoflowResult<Option<String>> {
        let result = self.probe(&["rev-parse", "--verify", "--quiet", rev]).await?;
        if result.exit_code == 0 {
            Ok(Some(result.stdout.trim().to_string()))
        } else {
            Ok(None)
        }
    }

    pub async fn head(&self) -> RepoflowResult<String> {
        self.run_checked(&["rev-parse", "HEAD"]).await
    }

    pub async fn stash_count(&self) -> RepoflowResult<usize> {
        let list = self.run_checked(&["stash", "list"]).await?;
        Ok(list.lines().filter(|line| !line.trim().is_empty()).count())
    }

    /// マージされていない（コンフリクト中の）パス
    pub async fn conflicted_paths(&self) -> RepoflowResult<Vec<String>> {
        let output = self
            .run_checked(&["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn local_branches(&self) -> RepoflowResult<Vec<String>> {
        let output = self
            .run_checked(&["branch", "--format=%(refname:short)"])
            .await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub async fn rebase_in_progress(&self) -> RepoflowResult<bool> {
        for marker in ["rebase-merge", "rebase-apply"] {
            let path = self.run_checked(&["rev-parse", "--git-path", marker]).await?;
            let path = PathBuf::from(path);
            let path = if path.is_absolute() {
                path
            } else {
                self.path.join(path)
            };
            if path.is_dir() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn merge_in_progress(&self) -> RepoflowResult<bool> {
        let result = self
            .probe(&["rev-parse", "-q", "--verify", "MERGE_HEAD"])
            .await?;
        Ok(result.exit_code == 0)
    }

    pub async fn cherry_pick_in_progress(&self) -> RepoflowResult<bool> {
        let result = self
            .probe(&["rev-parse", "-q", "--verify", "CHERRY_PICK_HEAD"])
            .await?;
        Ok(result.exit_code == 0)
    }

    /// `rev-list --count <range>`
    pub async fn count_commits(&self, range: &str) -> RepoflowResult<usize> {
        let count = self.run_checked(&["rev-list", "--count", range]).await?;
        count.trim().parse().map_err(|_| {
            RepoflowError::internal(format!("rev-list --count {} printed {:?}", range, count))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::process::process_runner::MockProcessRunner;
    use mockall::predicate::function;

    fn repo_with(runner: MockProcessRunner) -> GitRepository {
        GitRepository::new(Arc::new(runner), "/work/repo")
    }

    #[tokio::test]
    async fn test_is_dirty_reads_porcelain_status() {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .with(function(|inv: &CommandInvocation| inv.args == ["status", "--porcelain"]))
            .times(1)
            .returning(|_| Ok(CommandResult::exited(0, "?? new.txt\n", "")));

        assert!(repo_with(runner).is_dirty().await.unwrap());
    }

    #[tokio::test]
    async fn test_detached_head_has_no_branch() {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandResult::exited(1, "", "")));

        assert_eq!(repo_with(runner).current_branch().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_checked_maps_failures() {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandResult::exited(128, "", "fatal: not a git repository")));

        let error = repo_with(runner).head().await.unwrap_err();
        assert!(matches!(error, RepoflowError::GitFailed { exit_code: 128, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_query_is_an_error() {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .returning(|_| Ok(CommandResult::cancelled(5)));

        let error = repo_with(runner).local_branch_exists("x").await.unwrap_err();
        assert!(matches!(error, RepoflowError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_stash_count_and_conflicts() {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .with(function(|inv: &CommandInvocation| inv.args[0] == "stash"))
            .returning(|_| Ok(CommandResult::exited(0, "stash@{0}: On main: a\nstash@{1}: On main: b\n", "")));
        runner
            .expect_run()
            .with(function(|inv: &CommandInvocation| inv.args[0] == "diff"))
            .returning(|_| Ok(CommandResult::exited(0, "a.txt\nb.txt\n", "")));

        let repo = repo_with(runner);
        assert_eq!(repo.stash_count().await.unwrap(), 2);
        assert_eq!(repo.conflicted_paths().await.unwrap(), vec!["a.txt", "b.txt"]);
    }
}
