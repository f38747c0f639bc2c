use async_trait::async_trait;
use chrono::Local;

use super::stash_manager::StashManager;
use super::{ManagerContext, Operation};
use crate::common::error::RepoflowError;
use crate::common::result::RepoflowResult;
use crate::domain::entities::operation::{FailureKind, OperationKind, OperationResult, Outcome};
use crate::domain::entities::repository_target::RepositoryTarget;
use crate::domain::value_objects::branch_name::BranchName;
use crate::infrastructure::git::output::classify_plain;
use crate::infrastructure::git::REMOTE;

/// ResetManager への要求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetRequest {
    pub create_backup: bool,
    pub confirmed: bool,
}

/// ベースブランチへのハードリセット
#[derive(Debug, Clone)]
pub struct ResetManager {
    ctx: ManagerContext,
    stash: StashManager,
}

impl ResetManager {
    pub fn new(ctx: ManagerContext, stash: StashManager) -> Self {
        Self { ctx, stash }
    }

    /// Hard-resets the current branch to the base branch tip.
    ///
    /// Destructive: the caller must pass `confirmed = true`. The base is
    /// fetched first and the reset goes to `origin/<base>`; only a repository
    /// without `origin` resets to the local base. A dirty tree is stashed
    /// first and the entry is left in the stash.
    pub async fn reset_to_base(
        &self,
        target: &RepositoryTarget,
        create_backup: bool,
        confirmed: bool,
    ) -> RepoflowResult<OperationResult> {
        let result = self.reset_inner(target, create_backup, confirmed).await;
        self.ctx.finish(target, OperationKind::Reset, None, result)
    }

    async fn reset_inner(
        &self,
        target: &RepositoryTarget,
        create_backup: bool,
        confirmed: bool,
    ) -> RepoflowResult<OperationResult> {
        if !confirmed {
            return Err(RepoflowError::confirmation_required("reset"));
        }

        let repo = self.ctx.repo(target);
        let current = repo.current_branch().await?.ok_or_else(|| {
            RepoflowError::repository_state(
                "HEAD is detached; check out a branch before resetting",
                Some(target.path().to_path_buf()),
            )
        })?;

        let base = target.base_branch().as_str();
        if current == base {
            return Err(RepoflowError::repository_state(
                format!("already on base branch {}; nothing to reset", base),
                Some(target.path().to_path_buf()),
            ));
        }

        let base_ref = if repo.has_remote().await? {
            let fetch = repo.run(&["fetch", REMOTE, base]).await?;
            let fetched = classify_plain(&fetch, Outcome::Completed);
            if fetched != Outcome::Completed {
                return Ok(OperationResult::new(
                    OperationKind::Reset,
                    fetched,
                    format!("could not fetch {}/{}; nothing was reset", REMOTE, base),
                )
                .with_branch(current)
                .with_output(fetch.combined_output()));
            }
            if !repo.remote_tracking_exists(base).await? {
                return Err(RepoflowError::repository_state(
                    format!("base branch {} not found on {}", base, REMOTE),
                    Some(target.path().to_path_buf()),
                ));
            }
            format!("{}/{}", REMOTE, base)
        } else if repo.local_branch_exists(base).await? {
            base.to_string()
        } else {
            return Err(RepoflowError::repository_state(
                format!("base branch {} not found", base),
                Some(target.path().to_path_buf()),
            ));
        };

        let mut steps = Vec::new();
        if repo.is_dirty().await? {
            let save = self
                .stash
                .save(target, Some(&format!("repoflow: before reset of {}", current)))
                .await?;
            let saved_ok = save.is_success();
            steps.push(save);
            if !saved_ok {
                return Ok(OperationResult::failed(
                    OperationKind::Reset,
                    FailureKind::ExternalCommand,
                    "could not stash changes before reset",
                )
                .with_branch(current)
                .with_steps(steps));
            }
        }

        let mut backup_name = None;
        if create_backup {
            let current_name = BranchName::new(&current).map_err(|e| {
                RepoflowError::invalid_request("branch", e.to_string(), Some(current.clone()))
            })?;
            let stamped = current_name.backup_name(Local::now().naive_local());
            let mut backup = stamped.clone();
            let mut n = 1;
            while repo.local_branch_exists(backup.as_str()).await? {
                n += 1;
                backup = stamped.with_suffix(n);
            }

            let branch = repo.run(&["branch", backup.as_str(), "HEAD"]).await?;
            let outcome = classify_plain(&branch, Outcome::Created);
            steps.push(
                OperationResult::new(OperationKind::Reset, outcome, format!("backup {}", backup))
                    .with_branch(backup.as_str())
                    .with_output(branch.combined_output()),
            );
            if outcome != Outcome::Created {
                return Ok(OperationResult::new(
                    OperationKind::Reset,
                    outcome,
                    format!("could not create backup branch {}; nothing was reset", backup),
                )
                .with_branch(current)
                .with_output(branch.combined_output())
                .with_steps(steps));
            }
            backup_name = Some(backup);
        }

        let reset = repo.run(&["reset", "--hard", &base_ref]).await?;
        let outcome = classify_plain(&reset, Outcome::ResetToBase);
        let message = match (&backup_name, outcome) {
            (Some(backup), Outcome::ResetToBase) => {
                format!("reset {} to {} (backup: {})", current, base_ref, backup)
            }
            (None, Outcome::ResetToBase) => format!("reset {} to {}", current, base_ref),
            _ => format!("failed to reset {} to {}", current, base_ref),
        };

        let mut result = OperationResult::new(OperationKind::Reset, outcome, message)
            .with_branch(current)
            .with_output(reset.combined_output())
            .with_steps(steps);
        if let Some(backup) = backup_name {
            result = result.with_metadata("backup_branch", backup.as_str());
        }
        if result.stashed() {
            result = result.with_metadata("stash", "kept");
        }
        Ok(result)
    }
}

#[async_trait]
impl Operation for ResetManager {
    type Params = ResetRequest;

    async fn execute(
        &mut self,
        target: &RepositoryTarget,
        params: ResetRequest,
    ) -> RepoflowResult<OperationResult> {
        self.reset_to_base(target, params.create_backup, params.confirmed)
            .await
    }
}
