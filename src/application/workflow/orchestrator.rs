use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::managers::{
    BranchManager, BranchRequest, ManagerContext, Operation, PullManager, PullRequest, PushManager,
    PushRequest, RebaseManager, RebaseRequest, RebaseState, ResetManager, ResetRequest,
    StashManager, StashRequest,
};
use crate::common::error::RepoflowError;
use crate::common::result::RepoflowResult;
use crate::domain::entities::conflict::{ConflictChoice, ConflictOrigin};
use crate::domain::entities::operation::{FailureKind, OperationKind, OperationResult, Outcome};
use crate::domain::entities::operation_record::OperationRecord;
use crate::domain::entities::repository_target::RepositoryTarget;
use crate::domain::value_objects::branch_name::BranchName;
use crate::infrastructure::git::output::classify_plain;
use crate::infrastructure::logging::OperationLog;
use crate::infrastructure::process::{CancellationSource, ProcessRunner};

/// メニューで選択できる操作コード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCode {
    Status = 1,
    Branches = 2,
    SwitchToFeature = 3,
    PullBase = 4,
    PullCurrent = 5,
    CommitAndPush = 6,
    Rebase = 7,
    ResolveConflict = 8,
    CancelRebase = 9,
    ResetToBase = 10,
    StashSave = 11,
    StashPop = 12,
    StashDrop = 13,
    DeleteBranch = 14,
    FullFlow = 15,
    ViewLogs = 16,
    Exit = 0,
}

impl OperationCode {
    pub const ALL: [OperationCode; 17] = [
        Self::Status,
        Self::Branches,
        Self::SwitchToFeature,
        Self::PullBase,
        Self::PullCurrent,
        Self::CommitAndPush,
        Self::Rebase,
        Self::ResolveConflict,
        Self::CancelRebase,
        Self::ResetToBase,
        Self::StashSave,
        Self::StashPop,
        Self::StashDrop,
        Self::DeleteBranch,
        Self::FullFlow,
        Self::ViewLogs,
        Self::Exit,
    ];

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.code() == code)
    }

    pub fn code(&self) -> u32 {
        *self as u32
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Status => "Show working tree status",
            Self::Branches => "List local branches",
            Self::SwitchToFeature => "Switch to the feature branch",
            Self::PullBase => "Pull the base branch",
            Self::PullCurrent => "Pull the current branch",
            Self::CommitAndPush => "Commit all changes and push",
            Self::Rebase => "Rebase the feature branch onto base",
            Self::ResolveConflict => "Resolve a pending conflict",
            Self::CancelRebase => "Abort an in-progress rebase or cherry-pick",
            Self::ResetToBase => "Hard-reset the current branch to base",
            Self::StashSave => "Stash local changes",
            Self::StashPop => "Re-apply the newest stash",
            Self::StashDrop => "Drop the newest stash",
            Self::DeleteBranch => "Delete a branch",
            Self::FullFlow => "Full flow: pull base, switch, rebase",
            Self::ViewLogs => "View today's operation log",
            Self::Exit => "Exit",
        }
    }

    /// Operations the front-end must confirm before dispatching.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::ResetToBase | Self::DeleteBranch | Self::StashDrop)
    }
}

impl fmt::Display for OperationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>2}. {}", self.code(), self.description())
    }
}

/// オーケストレーターに渡す単一操作の要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationRequest {
    Status,
    ListBranches,
    /// None switches to the target's feature branch.
    Branch { name: Option<BranchName> },
    /// None pulls the currently checked-out branch.
    Pull { branch: Option<BranchName> },
    /// Commits first when a message is given.
    Push { message: Option<String> },
    Rebase,
    ResolveConflict(ConflictChoice),
    CancelRebase,
    Reset { create_backup: bool, confirmed: bool },
    StashSave { label: Option<String> },
    StashPop,
    StashDrop,
    DeleteBranch {
        name: BranchName,
        also_remote: bool,
        confirmed: bool,
    },
    FullFlow,
}

impl OperationRequest {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Status => OperationKind::Status,
            Self::ListBranches | Self::Branch { .. } => OperationKind::Branch,
            Self::Pull { .. } => OperationKind::Pull,
            Self::Push { .. } => OperationKind::Push,
            Self::Rebase | Self::CancelRebase => OperationKind::Rebase,
            Self::ResolveConflict(_) => OperationKind::Rebase,
            Self::Reset { .. } => OperationKind::Reset,
            Self::StashSave { .. } | Self::StashPop | Self::StashDrop => OperationKind::Stash,
            Self::DeleteBranch { .. } => OperationKind::DeleteBranch,
            Self::FullFlow => OperationKind::Workflow,
        }
    }
}

/// 全マネージャーを束ねる窓口
///
/// One operation at a time: every entry point takes `&mut self`.
#[derive(Debug)]
pub struct WorkflowOrchestrator {
    ctx: ManagerContext,
    branch: BranchManager,
    pull: PullManager,
    push: PushManager,
    stash: StashManager,
    reset: ResetManager,
    rebase: RebaseManager,
    cancellation: CancellationSource,
}

impl WorkflowOrchestrator {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        log: Arc<OperationLog>,
        cancellation: CancellationSource,
    ) -> Self {
        let ctx = ManagerContext::new(runner, log);
        let stash = StashManager::new(ctx.clone());
        let branch = BranchManager::new(ctx.clone(), stash.clone());
        let pull = PullManager::new(ctx.clone(), stash.clone());
        let rebase = RebaseManager::new(ctx.clone(), pull.clone(), branch.clone(), stash.clone());

        Self {
            push: PushManager::new(ctx.clone()),
            reset: ResetManager::new(ctx.clone(), stash.clone()),
            ctx,
            branch,
            pull,
            stash,
            rebase,
            cancellation,
        }
    }

    pub fn log(&self) -> &Arc<OperationLog> {
        self.ctx.log()
    }

    pub fn cancellation(&self) -> &CancellationSource {
        &self.cancellation
    }

    pub fn rebase_state(&self) -> RebaseState {
        self.rebase.state()
    }

    /// Maps a request to a manager call; errors become failure results.
    pub async fn dispatch(
        &mut self,
        target: &RepositoryTarget,
        request: OperationRequest,
    ) -> OperationResult {
        self.cancellation.begin();
        let kind = request.kind();
        match self.dispatch_inner(target, request).await {
            Ok(result) => result,
            Err(e) => OperationResult::from_error(kind, &e),
        }
    }

    async fn dispatch_inner(
        &mut self,
        target: &RepositoryTarget,
        request: OperationRequest,
    ) -> RepoflowResult<OperationResult> {
        match request {
            OperationRequest::Status => self.status(target).await,
            OperationRequest::ListBranches => self.branch.execute(target, BranchRequest::List).await,
            OperationRequest::Branch { name } => {
                let name = match name {
                    Some(name) => name,
                    None => {
                        let feature = target.require_feature_branch().cloned();
                        self.log_early(target, OperationKind::Branch, feature)?
                    }
                };
                self.branch.execute(target, BranchRequest::Ensure(name)).await
            }
            OperationRequest::Pull { branch } => {
                let branch = match branch {
                    Some(branch) => branch,
                    None => {
                        let current = self.current_branch(target).await;
                        self.log_early(target, OperationKind::Pull, current)?
                    }
                };
                self.pull.execute(target, PullRequest::Pull(branch)).await
            }
            OperationRequest::Push { message } => {
                let current = self.current_branch(target).await;
                let branch = self.log_early(target, OperationKind::Push, current)?;
                let request = match message {
                    Some(message) => PushRequest::CommitAndPush { message, branch },
                    None => PushRequest::Push(branch),
                };
                self.push.execute(target, request).await
            }
            OperationRequest::Rebase => self.rebase.execute(target, RebaseRequest::Start).await,
            OperationRequest::ResolveConflict(choice) => self.resolve_conflict(target, choice).await,
            OperationRequest::CancelRebase => self.rebase.execute(target, RebaseRequest::Cancel).await,
            OperationRequest::Reset {
                create_backup,
                confirmed,
            } => {
                self.reset
                    .execute(
                        target,
                        ResetRequest {
                            create_backup,
                            confirmed,
                        },
                    )
                    .await
            }
            OperationRequest::StashSave { label } => {
                self.stash.execute(target, StashRequest::Save { label }).await
            }
            OperationRequest::StashPop => self.stash.execute(target, StashRequest::Pop).await,
            OperationRequest::StashDrop => self.stash.execute(target, StashRequest::Drop).await,
            OperationRequest::DeleteBranch {
                name,
                also_remote,
                confirmed,
            } => {
                self.branch
                    .execute(
                        target,
                        BranchRequest::Delete {
                            name,
                            also_remote,
                            confirmed,
                        },
                    )
                    .await
            }
            OperationRequest::FullFlow => self.run_full_flow(target).await,
        }
    }

    /// Logs a failure raised before any manager ran.
    fn log_early<T>(
        &self,
        target: &RepositoryTarget,
        kind: OperationKind,
        value: RepoflowResult<T>,
    ) -> RepoflowResult<T> {
        if let Err(e) = &value {
            warn!("{} on {} failed: {}", kind, target.label(), e);
            self.ctx
                .log()
                .record(&OperationRecord::failure(target, kind, None, e));
        }
        value
    }

    async fn current_branch(&self, target: &RepositoryTarget) -> RepoflowResult<BranchName> {
        let current = self.ctx.repo(target).current_branch().await?.ok_or_else(|| {
            RepoflowError::repository_state(
                "HEAD is detached; check out a branch first",
                Some(target.path().to_path_buf()),
            )
        })?;
        BranchName::new(&current)
            .map_err(|e| RepoflowError::invalid_request("branch", e.to_string(), Some(current)))
    }

    /// `git status --short --branch`
    pub async fn status(&self, target: &RepositoryTarget) -> RepoflowResult<OperationResult> {
        let result = self.status_inner(target).await;
        self.ctx.finish(target, OperationKind::Status, None, result)
    }

    async fn status_inner(&self, target: &RepositoryTarget) -> RepoflowResult<OperationResult> {
        let repo = self.ctx.repo(target);
        let status = repo.run(&["status", "--short", "--branch"]).await?;
        let outcome = classify_plain(&status, Outcome::Completed);
        let branch = if status.success() {
            repo.current_branch().await?
        } else {
            None
        };

        let changed = status
            .stdout
            .lines()
            .filter(|line| !line.starts_with("##") && !line.trim().is_empty())
            .count();
        let message = if !status.success() {
            "failed to read status".to_string()
        } else if changed == 0 {
            "working tree clean".to_string()
        } else {
            format!("{} changed paths", changed)
        };

        Ok(OperationResult::new(OperationKind::Status, outcome, message)
            .with_optional_branch(branch)
            .with_output(status.combined_output()))
    }

    /// Routes a resolution to the rebase session or to a pending merge.
    pub async fn resolve_conflict(
        &mut self,
        target: &RepositoryTarget,
        choice: ConflictChoice,
    ) -> RepoflowResult<OperationResult> {
        let repo = self.ctx.repo(target);
        let rebase_pending = matches!(self.rebase.state(), RebaseState::Conflict(ref c) if c.origin == ConflictOrigin::Rebase)
            || repo.rebase_in_progress().await?;

        if rebase_pending {
            self.rebase
                .execute(target, RebaseRequest::Resume(choice))
                .await
        } else {
            self.pull
                .execute(target, PullRequest::ResolveConflict(choice))
                .await
        }
    }

    /// pull(base) → ensure_branch(feature) → rebase
    ///
    /// The first failing step stops the flow; earlier effects stay in place.
    pub async fn run_full_flow(&mut self, target: &RepositoryTarget) -> RepoflowResult<OperationResult> {
        let result = self.full_flow_inner(target).await;
        let feature = target.feature_branch().map(BranchName::as_str);
        self.ctx.finish(target, OperationKind::Workflow, feature, result)
    }

    async fn full_flow_inner(&mut self, target: &RepositoryTarget) -> RepoflowResult<OperationResult> {
        let feature = target.require_feature_branch()?.clone();
        let base = target.base_branch().clone();
        let mut steps = Vec::new();

        let pull = self.pull.pull(target, &base).await?;
        let pulled = pull.is_success();
        steps.push(pull);
        if !pulled {
            return Ok(stopped(steps, &feature, format!("pulling {} failed", base)));
        }

        let checkout = self.branch.ensure_branch(target, &feature).await?;
        let checked_out = checkout.is_success();
        steps.push(checkout);
        if !checked_out {
            return Ok(stopped(steps, &feature, format!("switching to {} failed", feature)));
        }

        // base は上で pull 済み
        let rebase = self.rebase.rebase_pulled(target).await?;
        let rebased = rebase.is_success();
        steps.push(rebase);
        if !rebased {
            return Ok(stopped(steps, &feature, format!("rebasing {} onto {} stopped", feature, base)));
        }

        info!("full flow finished for {}", target.label());
        Ok(OperationResult::new(
            OperationKind::Workflow,
            Outcome::Completed,
            format!("{} is up to date with {}", feature, base),
        )
        .with_branch(feature.as_str())
        .with_steps(steps))
    }
}

/// Composite result carrying the classification of the step that stopped the flow.
fn stopped(steps: Vec<OperationResult>, feature: &BranchName, message: String) -> OperationResult {
    let last = steps.last();
    let outcome = last
        .map(|step| step.outcome)
        .unwrap_or(Outcome::Failed(FailureKind::Internal));
    let conflict = last.and_then(|step| step.conflict_state().cloned());

    let mut result = OperationResult::new(OperationKind::Workflow, outcome, message)
        .with_branch(feature.as_str());
    result.conflict = conflict;
    result.with_steps(steps)
}
