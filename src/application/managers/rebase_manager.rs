use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

use super::branch_manager::BranchManager;
use super::pull_manager::PullManager;
use super::stash_manager::{fold_reapply, StashManager};
use super::{ManagerContext, Operation};
use crate::common::error::RepoflowError;
use crate::common::result::RepoflowResult;
use crate::domain::entities::conflict::{ConflictChoice, ConflictOrigin, ConflictState};
use crate::domain::entities::operation::{FailureKind, OperationKind, OperationResult, Outcome};
use crate::domain::entities::repository_target::RepositoryTarget;
use crate::domain::value_objects::branch_name::BranchName;
use crate::infrastructure::git::output::{classify_plain, classify_rebase};
use crate::infrastructure::git::GitRepository;
use crate::infrastructure::process::CommandStatus;

/// リベースの状態遷移
///
/// `Idle -> PullingBase -> Rebasing -> {Succeeded, Conflict, Aborted}`;
/// `Conflict` is left through [`RebaseManager::resume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseState {
    Idle,
    PullingBase,
    Rebasing,
    Succeeded,
    Conflict(ConflictState),
    Aborted,
}

impl RebaseState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Aborted)
    }
}

/// 中断・再開のために保持するリベースの文脈
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebaseSession {
    pub path: PathBuf,
    pub base: BranchName,
    pub feature: BranchName,
    pub original_branch: Option<String>,
    pub original_head: Option<String>,
    /// Whether the rebase stashed the tree and still owes a pop.
    pub stashed: bool,
    pub state: RebaseState,
}

/// RebaseManager への要求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseRequest {
    Start,
    Resume(ConflictChoice),
    Cancel,
}

/// ベースブランチへの安全なリベース
#[derive(Debug)]
pub struct RebaseManager {
    ctx: ManagerContext,
    pull: PullManager,
    branch: BranchManager,
    stash: StashManager,
    session: Option<RebaseSession>,
}

impl RebaseManager {
    pub fn new(
        ctx: ManagerContext,
        pull: PullManager,
        branch: BranchManager,
        stash: StashManager,
    ) -> Self {
        Self {
            ctx,
            pull,
            branch,
            stash,
            session: None,
        }
    }

    pub fn state(&self) -> RebaseState {
        self.session
            .as_ref()
            .map(|session| session.state.clone())
            .unwrap_or(RebaseState::Idle)
    }

    pub fn session(&self) -> Option<&RebaseSession> {
        self.session.as_ref()
    }

    fn set_state(&mut self, state: RebaseState) {
        if let Some(session) = self.session.as_mut() {
            debug!("rebase state -> {:?}", state);
            session.state = state;
        }
    }

    /// pull(base) → stash → checkout(feature) → `rebase <base>`
    pub async fn rebase(&mut self, target: &RepositoryTarget) -> RepoflowResult<OperationResult> {
        self.run_rebase(target, true).await
    }

    /// [`rebase`](Self::rebase) without pulling the base branch, for callers
    /// that have just pulled it themselves.
    pub async fn rebase_pulled(&mut self, target: &RepositoryTarget) -> RepoflowResult<OperationResult> {
        self.run_rebase(target, false).await
    }

    async fn run_rebase(
        &mut self,
        target: &RepositoryTarget,
        pull_base: bool,
    ) -> RepoflowResult<OperationResult> {
        let result = self.rebase_inner(target, pull_base).await;
        let feature = target.feature_branch().map(BranchName::as_str);
        self.ctx.finish(target, OperationKind::Rebase, feature, result)
    }

    async fn rebase_inner(
        &mut self,
        target: &RepositoryTarget,
        pull_base: bool,
    ) -> RepoflowResult<OperationResult> {
        let repo = self.ctx.repo(target);
        if repo.rebase_in_progress().await? {
            return Err(RepoflowError::repository_state(
                "a rebase is already in progress; continue, skip or abort it first",
                Some(target.path().to_path_buf()),
            ));
        }

        let feature = target.require_feature_branch()?.clone();
        let base = target.base_branch().clone();

        self.session = Some(RebaseSession {
            path: target.path().to_path_buf(),
            base: base.clone(),
            feature: feature.clone(),
            original_branch: repo.current_branch().await?,
            original_head: repo.rev_parse("HEAD").await?,
            stashed: false,
            state: RebaseState::Idle,
        });

        let mut steps = Vec::new();

        if pull_base {
            self.set_state(RebaseState::PullingBase);
            let pull = match self.pull.pull(target, &base).await {
                Ok(pull) => pull,
                Err(e) => {
                    self.set_state(RebaseState::Aborted);
                    return Err(e);
                }
            };
            let pulled = pull.is_success();
            steps.push(pull);
            if !pulled {
                self.set_state(RebaseState::Aborted);
                return Ok(composite(
                    steps,
                    &feature,
                    format!("pulling {} failed; rebase not started", base),
                ));
            }
        }

        self.set_state(RebaseState::Rebasing);
        match self.rebase_feature(target, &repo, &base, &feature, &mut steps).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.set_state(RebaseState::Aborted);
                if !self.session.as_ref().is_some_and(|session| session.stashed) {
                    return Err(e);
                }
                // 作業ツリーの状態が不明なので pop せず、退避したままにする
                Ok(OperationResult::from_error(OperationKind::Rebase, &e)
                    .with_branch(feature.as_str())
                    .with_metadata("stash", "kept")
                    .with_steps(steps))
            }
        }
    }

    async fn rebase_feature(
        &mut self,
        target: &RepositoryTarget,
        repo: &GitRepository,
        base: &BranchName,
        feature: &BranchName,
        steps: &mut Vec<OperationResult>,
    ) -> RepoflowResult<OperationResult> {
        if repo.is_dirty().await? {
            let save = self
                .stash
                .save(target, Some(&format!("repoflow: before rebasing {}", feature)))
                .await?;
            let stashed = save.outcome == Outcome::Stashed;
            let saved_ok = save.is_success();
            steps.push(save);
            if !saved_ok {
                self.set_state(RebaseState::Aborted);
                return Ok(OperationResult::failed(
                    OperationKind::Rebase,
                    FailureKind::ExternalCommand,
                    "could not stash changes before rebasing",
                )
                .with_branch(feature.as_str())
                .with_steps(std::mem::take(steps)));
            }
            if let Some(session) = self.session.as_mut() {
                session.stashed = stashed;
            }
        }

        let checkout = self.branch.ensure_branch(target, feature).await?;
        let checked_out = checkout.is_success();
        steps.push(checkout);
        if !checked_out {
            self.set_state(RebaseState::Aborted);
            let result = composite(
                std::mem::take(steps),
                feature,
                format!("could not check out {}; rebase not started", feature),
            );
            return Ok(self.give_back(target, result).await);
        }

        let rebase = repo.run(&["rebase", base.as_str()]).await?;
        let outcome = classify_rebase(&rebase);
        let output = rebase.combined_output();

        if outcome == Outcome::Conflict || repo.rebase_in_progress().await? {
            let paths = repo.conflicted_paths().await?;
            let conflict = ConflictState::new(ConflictOrigin::Rebase, target.path().to_path_buf(), paths);
            self.set_state(RebaseState::Conflict(conflict.clone()));
            info!("rebase of {} onto {} stopped on conflicts", feature, base);
            return Ok(OperationResult::new(
                OperationKind::Rebase,
                Outcome::Conflict,
                format!("rebasing {} onto {} produced conflicts", feature, base),
            )
            .with_branch(feature.as_str())
            .with_output(output)
            .with_conflict(conflict)
            .with_steps(std::mem::take(steps)));
        }

        if !rebase.success() {
            self.set_state(RebaseState::Aborted);
            let result = OperationResult::new(
                OperationKind::Rebase,
                outcome,
                format!("failed to rebase {} onto {}", feature, base),
            )
            .with_branch(feature.as_str())
            .with_output(output)
            .with_steps(std::mem::take(steps));
            return Ok(self.give_back(target, result).await);
        }

        self.set_state(RebaseState::Succeeded);
        let outcome = if outcome == Outcome::Unclassified { Outcome::Rebased } else { outcome };
        let message = match outcome {
            Outcome::UpToDate => format!("{} is already up to date with {}", feature, base),
            _ => format!("rebased {} onto {}", feature, base),
        };
        let result = OperationResult::new(OperationKind::Rebase, outcome, message)
            .with_branch(feature.as_str())
            .with_output(output)
            .with_steps(std::mem::take(steps));
        Ok(self.give_back(target, result).await)
    }

    /// Pops what the session stashed, if anything, and folds the pop into
    /// `result`.
    async fn give_back(&mut self, target: &RepositoryTarget, mut result: OperationResult) -> OperationResult {
        if self.take_stash_flag() {
            let pop = self.stash.reapply(target).await;
            result = fold_reapply(result, &pop);
            result.steps.push(pop);
        }
        result
    }

    fn take_stash_flag(&mut self) -> bool {
        self.session
            .as_mut()
            .map(|session| std::mem::replace(&mut session.stashed, false))
            .unwrap_or(false)
    }

    /// 中断中のリベースを continue / skip / abort で再開する
    pub async fn resume(
        &mut self,
        target: &RepositoryTarget,
        choice: ConflictChoice,
    ) -> RepoflowResult<OperationResult> {
        let result = self.resume_inner(target, choice).await;
        let feature = self
            .session
            .as_ref()
            .map(|session| session.feature.as_str().to_string());
        self.ctx
            .finish(target, OperationKind::Rebase, feature.as_deref(), result)
    }

    async fn resume_inner(
        &mut self,
        target: &RepositoryTarget,
        choice: ConflictChoice,
    ) -> RepoflowResult<OperationResult> {
        let repo = self.ctx.repo(target);
        if !repo.rebase_in_progress().await? {
            if matches!(self.state(), RebaseState::Conflict(_)) {
                self.set_state(RebaseState::Aborted);
            }
            return Ok(OperationResult::new(
                OperationKind::Rebase,
                Outcome::NothingToAbort,
                "no rebase in progress",
            ));
        }

        let known = self
            .session
            .as_ref()
            .map(|session| session.path == target.path())
            .unwrap_or(false);
        if !known {
            self.session = Some(self.rebuild_session(target, &repo).await?);
        }

        let feature = self
            .session
            .as_ref()
            .map(|session| session.feature.clone())
            .unwrap_or_else(|| target.base_branch().clone());

        match choice {
            ConflictChoice::Abort => self.abort(target, &repo, &feature).await,
            ConflictChoice::Continue | ConflictChoice::Skip => {
                if choice == ConflictChoice::Continue {
                    let paths = repo.conflicted_paths().await?;
                    if !paths.is_empty() {
                        let conflict =
                            ConflictState::new(ConflictOrigin::Rebase, target.path().to_path_buf(), paths);
                        self.set_state(RebaseState::Conflict(conflict.clone()));
                        return Ok(OperationResult::new(
                            OperationKind::Rebase,
                            Outcome::Conflict,
                            format!(
                                "{} paths still unmerged; fix and stage them first",
                                conflict.conflicted_paths.len()
                            ),
                        )
                        .with_branch(feature.as_str())
                        .with_conflict(conflict));
                    }
                }

                let flag = if choice == ConflictChoice::Continue { "--continue" } else { "--skip" };
                let step = repo.run(&["rebase", flag]).await?;
                self.after_step(target, &repo, &feature, step).await
            }
        }
    }

    async fn after_step(
        &mut self,
        target: &RepositoryTarget,
        repo: &GitRepository,
        feature: &BranchName,
        step: crate::infrastructure::process::CommandResult,
    ) -> RepoflowResult<OperationResult> {
        let output = step.combined_output();
        let outcome = classify_rebase(&step);

        if step.status != CommandStatus::Exited {
            return Ok(OperationResult::new(
                OperationKind::Rebase,
                outcome,
                "rebase step interrupted; the rebase is still in progress",
            )
            .with_branch(feature.as_str())
            .with_output(output));
        }

        if repo.rebase_in_progress().await? {
            let paths = repo.conflicted_paths().await?;
            let conflict = ConflictState::new(ConflictOrigin::Rebase, target.path().to_path_buf(), paths);
            self.set_state(RebaseState::Conflict(conflict.clone()));
            return Ok(OperationResult::new(
                OperationKind::Rebase,
                Outcome::Conflict,
                format!("rebase of {} stopped again on conflicts", feature),
            )
            .with_branch(feature.as_str())
            .with_output(output)
            .with_conflict(conflict));
        }

        if !step.success() {
            self.set_state(RebaseState::Aborted);
            return Ok(OperationResult::new(
                OperationKind::Rebase,
                Outcome::Failed(FailureKind::ExternalCommand),
                format!("rebase of {} failed", feature),
            )
            .with_branch(feature.as_str())
            .with_output(output));
        }

        self.set_state(RebaseState::Succeeded);
        let result = OperationResult::new(
            OperationKind::Rebase,
            Outcome::Rebased,
            format!("rebase of {} completed", feature),
        )
        .with_branch(feature.as_str())
        .with_output(output);
        Ok(self.give_back(target, result).await)
    }

    /// `rebase --abort`, then back to the branch the rebase started from.
    async fn abort(
        &mut self,
        target: &RepositoryTarget,
        repo: &GitRepository,
        feature: &BranchName,
    ) -> RepoflowResult<OperationResult> {
        let abort = repo.run(&["rebase", "--abort"]).await?;
        let outcome = classify_plain(&abort, Outcome::RebaseAborted);
        if outcome != Outcome::RebaseAborted {
            return Ok(OperationResult::new(
                OperationKind::Rebase,
                outcome,
                "failed to abort the rebase",
            )
            .with_branch(feature.as_str())
            .with_output(abort.combined_output()));
        }
        self.set_state(RebaseState::Aborted);

        let mut steps = Vec::new();
        let original = self
            .session
            .as_ref()
            .and_then(|session| session.original_branch.clone());
        let current = repo.current_branch().await?;
        if let Some(original) = original {
            if current.as_deref() != Some(original.as_str()) {
                let checkout = repo.run(&["checkout", &original]).await?;
                let outcome = classify_plain(&checkout, Outcome::Switched);
                steps.push(
                    OperationResult::new(
                        OperationKind::Branch,
                        outcome,
                        format!("returned to {}", original),
                    )
                    .with_branch(original.as_str())
                    .with_output(checkout.combined_output()),
                );
            }
        }

        let result = OperationResult::new(
            OperationKind::Rebase,
            Outcome::RebaseAborted,
            format!("rebase of {} aborted", feature),
        )
        .with_branch(feature.as_str())
        .with_output(abort.combined_output())
        .with_steps(steps);
        Ok(self.give_back(target, result).await)
    }

    /// Session for a rebase started elsewhere (another process or by hand).
    async fn rebuild_session(
        &self,
        target: &RepositoryTarget,
        repo: &GitRepository,
    ) -> RepoflowResult<RebaseSession> {
        let feature = match target.feature_branch() {
            Some(feature) => feature.clone(),
            None => target.base_branch().clone(),
        };
        let paths = repo.conflicted_paths().await?;
        debug!("rebuilding rebase session for {}", target.path().display());

        Ok(RebaseSession {
            path: target.path().to_path_buf(),
            base: target.base_branch().clone(),
            feature,
            original_branch: None,
            original_head: None,
            stashed: false,
            state: RebaseState::Conflict(ConflictState::new(
                ConflictOrigin::Rebase,
                target.path().to_path_buf(),
                paths,
            )),
        })
    }

    /// 進行中のリベースを中止する（なければ NothingToAbort）
    ///
    /// A cherry-pick stopped on conflicts is aborted the same way when no
    /// rebase is in progress.
    pub async fn cancel_rebase(&mut self, target: &RepositoryTarget) -> RepoflowResult<OperationResult> {
        let repo = self.ctx.repo(target);
        let cherry_pick = match stopped_cherry_pick(&repo).await {
            Ok(stopped) => stopped,
            Err(e) => return self.ctx.finish(target, OperationKind::Rebase, None, Err(e)),
        };
        if !cherry_pick {
            return self.resume(target, ConflictChoice::Abort).await;
        }

        let result = abort_cherry_pick(&repo).await;
        self.ctx.finish(target, OperationKind::Rebase, None, result)
    }
}

async fn stopped_cherry_pick(repo: &GitRepository) -> RepoflowResult<bool> {
    Ok(!repo.rebase_in_progress().await? && repo.cherry_pick_in_progress().await?)
}

async fn abort_cherry_pick(repo: &GitRepository) -> RepoflowResult<OperationResult> {
    let abort = repo.run(&["cherry-pick", "--abort"]).await?;
    let outcome = classify_plain(&abort, Outcome::Completed);
    let message = if abort.success() {
        "cherry-pick aborted"
    } else {
        "failed to abort the cherry-pick"
    };
    Ok(OperationResult::new(OperationKind::Rebase, outcome, message)
        .with_optional_branch(repo.current_branch().await?)
        .with_output(abort.combined_output()))
}

/// Result for a rebase that stopped at one of its delegated steps.
fn composite(steps: Vec<OperationResult>, feature: &BranchName, message: String) -> OperationResult {
    let last = steps.last();
    let outcome = last
        .map(|step| step.outcome)
        .unwrap_or(Outcome::Failed(FailureKind::Internal));
    let conflict = last.and_then(|step| step.conflict_state().cloned());

    let mut result = OperationResult::new(OperationKind::Rebase, outcome, message)
        .with_branch(feature.as_str());
    result.conflict = conflict;
    result.with_steps(steps)
}

#[async_trait]
impl Operation for RebaseManager {
    type Params = RebaseRequest;

    async fn execute(
        &mut self,
        target: &RepositoryTarget,
        params: RebaseRequest,
    ) -> RepoflowResult<OperationResult> {
        match params {
            RebaseRequest::Start => self.rebase(target).await,
            RebaseRequest::Resume(choice) => self.resume(target, choice).await,
            RebaseRequest::Cancel => self.cancel_rebase(target).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::managers::test_support::{exit, ok, target, Harness};
    use crate::infrastructure::process::{CommandInvocation, CommandResult};
    use mockall::predicate::function;

    fn manager(ctx: ManagerContext) -> RebaseManager {
        let stash = StashManager::new(ctx.clone());
        RebaseManager::new(
            ctx.clone(),
            PullManager::new(ctx.clone(), stash.clone()),
            BranchManager::new(ctx, stash.clone()),
            stash,
        )
    }

    fn no_rebase_dirs(harness: &mut Harness, dir: &std::path::Path) {
        let missing = dir.join("no-such-rebase-dir").display().to_string();
        harness
            .runner
            .expect_run()
            .with(function(|inv: &CommandInvocation| {
                inv.args.len() == 3 && inv.args[0] == "rev-parse" && inv.args[1] == "--git-path"
            }))
            .returning(move |_| Ok(CommandResult::exited(0, missing.clone(), "")));
    }

    #[tokio::test]
    async fn test_state_is_idle_without_session() {
        let harness = Harness::new();
        let (ctx, _log, _dir) = harness.context();
        assert_eq!(manager(ctx).state(), RebaseState::Idle);
    }

    #[tokio::test]
    async fn test_rebase_requires_feature_branch() {
        let mut harness = Harness::new();
        let scratch = tempfile::TempDir::new().unwrap();
        no_rebase_dirs(&mut harness, scratch.path());
        let (ctx, _log, _dir) = harness.context();
        let target = RepositoryTarget::new("/work/repo", "main").unwrap();

        let error = manager(ctx).rebase(&target).await.unwrap_err();
        assert!(matches!(error, RepoflowError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_cancel_without_rebase_is_noop() {
        let mut harness = Harness::new();
        let scratch = tempfile::TempDir::new().unwrap();
        no_rebase_dirs(&mut harness, scratch.path());
        harness.expect(&["rev-parse", "-q", "--verify", "CHERRY_PICK_HEAD"], exit(1, ""));
        let (ctx, _log, _dir) = harness.context();

        let result = manager(ctx).cancel_rebase(&target()).await.unwrap();
        assert_eq!(result.outcome, Outcome::NothingToAbort);
    }

    #[tokio::test]
    async fn test_failed_base_pull_aborts() {
        let mut harness = Harness::new();
        let scratch = tempfile::TempDir::new().unwrap();
        no_rebase_dirs(&mut harness, scratch.path());
        harness
            .expect(&["symbolic-ref", "--quiet", "--short", "HEAD"], ok("feature/x\n"))
            .expect(&["rev-parse", "--verify", "--quiet", "HEAD"], ok("abc123\n"))
            .expect(&["status", "--porcelain"], ok(""))
            .expect(&["symbolic-ref", "--quiet", "--short", "HEAD"], ok("feature/x\n"))
            .expect(
                &["fetch", "origin", "main:main"],
                CommandResult::exited(128, "", "fatal: unable to access 'https://example.invalid/': Could not resolve host: example.invalid"),
            );
        let (ctx, _log, _dir) = harness.context();

        let mut rebase = manager(ctx);
        let result = rebase.rebase(&target()).await.unwrap();
        assert_eq!(result.failure_kind(), Some(FailureKind::Network));
        assert_eq!(rebase.state(), RebaseState::Aborted);
        assert_eq!(
            rebase.session().unwrap().original_head.as_deref(),
            Some("abc123")
        );
    }

    #[tokio::test]
    async fn test_rebase_pulled_goes_straight_to_rebase() {
        let mut harness = Harness::new();
        let scratch = tempfile::TempDir::new().unwrap();
        no_rebase_dirs(&mut harness, scratch.path());
        harness
            .expect(&["symbolic-ref", "--quiet", "--short", "HEAD"], ok("feature/x\n"))
            .expect(&["rev-parse", "--verify", "--quiet", "HEAD"], ok("abc123\n"))
            .expect(&["status", "--porcelain"], ok(""))
            .expect(&["symbolic-ref", "--quiet", "--short", "HEAD"], ok("feature/x\n"))
            .expect(&["rebase", "main"], ok("Current branch feature/x is up to date.\n"));
        let (ctx, log, _dir) = harness.context();

        let mut rebase = manager(ctx);
        let result = rebase.rebase_pulled(&target()).await.unwrap();
        assert_eq!(result.outcome, Outcome::UpToDate);
        assert_eq!(
            result.steps.iter().map(|s| s.kind).collect::<Vec<_>>(),
            vec![OperationKind::Branch]
        );
        assert_eq!(rebase.state(), RebaseState::Succeeded);
        assert_eq!(log.read_today().unwrap().last().unwrap().operation, OperationKind::Rebase);
    }

    #[tokio::test]
    async fn test_cancel_aborts_stopped_cherry_pick() {
        let mut harness = Harness::new();
        let scratch = tempfile::TempDir::new().unwrap();
        no_rebase_dirs(&mut harness, scratch.path());
        harness
            .expect(&["rev-parse", "-q", "--verify", "CHERRY_PICK_HEAD"], ok("def456\n"))
            .expect(&["cherry-pick", "--abort"], ok(""))
            .expect(&["symbolic-ref", "--quiet", "--short", "HEAD"], ok("main\n"));
        let (ctx, log, _dir) = harness.context();

        let mut rebase = manager(ctx);
        let result = rebase.cancel_rebase(&target()).await.unwrap();
        assert_eq!(result.outcome, Outcome::Completed);
        assert_eq!(result.message, "cherry-pick aborted");
        assert_eq!(result.branch.as_deref(), Some("main"));
        assert_eq!(rebase.state(), RebaseState::Idle);
        assert_eq!(log.read_today().unwrap()[0].operation, OperationKind::Rebase);
    }
}
