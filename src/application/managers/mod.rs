//! 操作ファミリーごとのマネージャー
//!
//! Each manager wraps the process runner with the validation and policy of
//! one operation family and writes one log record per public call.

pub mod branch_manager;
pub mod pull_manager;
pub mod push_manager;
pub mod rebase_manager;
pub mod reset_manager;
pub mod stash_manager;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::common::result::RepoflowResult;
use crate::domain::entities::operation::{OperationKind, OperationResult};
use crate::domain::entities::operation_record::OperationRecord;
use crate::domain::entities::repository_target::RepositoryTarget;
use crate::infrastructure::git::GitRepository;
use crate::infrastructure::logging::OperationLog;
use crate::infrastructure::process::ProcessRunner;

pub use branch_manager::{BranchManager, BranchRequest};
pub use pull_manager::{PullManager, PullRequest};
pub use push_manager::{PushManager, PushRequest};
pub use rebase_manager::{RebaseManager, RebaseRequest, RebaseSession, RebaseState};
pub use reset_manager::{ResetManager, ResetRequest};
pub use stash_manager::{StashManager, StashRequest};

/// Common entry point of every manager.
#[async_trait]
pub trait Operation: Send {
    type Params: Send;

    async fn execute(
        &mut self,
        target: &RepositoryTarget,
        params: Self::Params,
    ) -> RepoflowResult<OperationResult>;
}

/// マネージャー間で共有する依存関係
#[derive(Clone)]
pub struct ManagerContext {
    runner: Arc<dyn ProcessRunner>,
    log: Arc<OperationLog>,
}

impl std::fmt::Debug for ManagerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerContext")
            .field("log", &self.log.dir())
            .finish()
    }
}

impl ManagerContext {
    pub fn new(runner: Arc<dyn ProcessRunner>, log: Arc<OperationLog>) -> Self {
        Self { runner, log }
    }

    pub fn repo(&self, target: &RepositoryTarget) -> GitRepository {
        GitRepository::new(self.runner.clone(), target.path())
    }

    pub fn log(&self) -> &Arc<OperationLog> {
        &self.log
    }

    /// Logs the outcome of a public call and hands it back unchanged.
    pub fn finish(
        &self,
        target: &RepositoryTarget,
        kind: OperationKind,
        branch: Option<&str>,
        result: RepoflowResult<OperationResult>,
    ) -> RepoflowResult<OperationResult> {
        match &result {
            Ok(result) => {
                info!(
                    "{} on {}: {} ({})",
                    kind,
                    target.label(),
                    result.outcome,
                    result.message
                );
                self.log.record(&OperationRecord::from_result(target, result));
            }
            Err(e) => {
                warn!("{} on {} failed: {}", kind, target.label(), e);
                self.log.record(&OperationRecord::failure(
                    target,
                    kind,
                    branch.map(str::to_string),
                    e,
                ));
            }
        }
        result
    }
}
