use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::common::error::RepoflowError;
use crate::domain::entities::operation::{OperationKind, OperationResult, OperationStatus};
use crate::domain::entities::repository_target::RepositoryTarget;

/// Maximum number of characters kept from command output.
pub const EXCERPT_LIMIT: usize = 400;

/// 操作ログの1レコード（1行のJSON）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub timestamp: DateTime<Local>,
    pub operation: OperationKind,
    pub repository_path: PathBuf,
    pub branch: Option<String>,
    pub status: OperationStatus,
    pub outcome: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
}

impl OperationRecord {
    pub fn from_result(target: &RepositoryTarget, result: &OperationResult) -> Self {
        Self {
            timestamp: Local::now(),
            operation: result.kind,
            repository_path: target.path().to_path_buf(),
            branch: result.branch.clone(),
            status: result.status(),
            outcome: result.outcome.label().to_string(),
            message: result.message.clone(),
            excerpt: excerpt(&result.output),
            section: target.metadata().section.clone(),
            ticket: target.metadata().ticket.clone(),
        }
    }

    /// Record for an operation that ended with an error instead of a result.
    pub fn failure(
        target: &RepositoryTarget,
        operation: OperationKind,
        branch: Option<String>,
        error: &RepoflowError,
    ) -> Self {
        let result = OperationResult::from_error(operation, error);
        let mut record = Self::from_result(target, &result);
        record.branch = branch;
        record
    }
}

/// 出力の先頭部分を文字境界で切り詰める
pub fn excerpt(output: &str) -> String {
    let trimmed = output.trim();
    match trimmed.char_indices().nth(EXCERPT_LIMIT) {
        Some((index, _)) => format!("{}...", &trimmed[..index]),
        None => trimmed.to_string(),
    }
}
