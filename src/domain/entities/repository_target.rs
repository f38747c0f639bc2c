use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::common::error::RepoflowError;
use crate::common::result::{OptionExt, RepoflowResult};
use crate::domain::value_objects::branch_name::BranchName;

/// 操作対象リポジトリの識別情報
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMetadata {
    /// 設定上のID
    pub id: Option<String>,
    /// 表示名
    pub name: Option<String>,
    /// チケット/タスクID
    pub ticket: Option<String>,
    /// プロジェクト名
    pub project: Option<String>,
    /// 所属セクション
    pub section: Option<String>,
}

/// A resolved repository an operation runs against.
///
/// Built once per selection and then only borrowed by the managers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryTarget {
    path: PathBuf,
    base_branch: BranchName,
    feature_branch: Option<BranchName>,
    metadata: TargetMetadata,
}

impl RepositoryTarget {
    /// 新しいRepositoryTargetを作成
    ///
    /// The path must be absolute; existence is checked when a command runs.
    pub fn new(path: impl Into<PathBuf>, base_branch: &str) -> RepoflowResult<Self> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(RepoflowError::invalid_target(
                format!("repository path must be absolute: {}", path.display()),
                Some(path),
            ));
        }

        let base_branch = BranchName::new(base_branch).map_err(|e| {
            RepoflowError::invalid_request("base_branch", e.to_string(), Some(base_branch.to_string()))
        })?;

        Ok(Self {
            path,
            base_branch,
            feature_branch: None,
            metadata: TargetMetadata::default(),
        })
    }

    /// フィーチャーブランチを設定
    pub fn with_feature_branch(mut self, feature_branch: &str) -> RepoflowResult<Self> {
        let feature = BranchName::new(feature_branch).map_err(|e| {
            RepoflowError::invalid_request(
                "feature_branch",
                e.to_string(),
                Some(feature_branch.to_string()),
            )
        })?;

        if feature == self.base_branch {
            return Err(RepoflowError::invalid_request(
                "feature_branch",
                "feature branch and base branch must differ",
                Some(feature.to_string()),
            ));
        }

        if matches!(feature.as_str().to_ascii_lowercase().as_str(), "main" | "master") {
            return Err(RepoflowError::invalid_request(
                "feature_branch",
                "feature branch cannot be main or master",
                Some(feature.to_string()),
            ));
        }

        self.feature_branch = Some(feature);
        Ok(self)
    }

    /// 識別情報を設定
    pub fn with_metadata(mut self, metadata: TargetMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn base_branch(&self) -> &BranchName {
        &self.base_branch
    }

    pub fn feature_branch(&self) -> Option<&BranchName> {
        self.feature_branch.as_ref()
    }

    /// Feature branch, or a validation error when none is configured.
    pub fn require_feature_branch(&self) -> RepoflowResult<&BranchName> {
        self.feature_branch
            .as_ref()
            .ok_or_invalid_request("feature_branch", "feature branch not configured")
    }

    pub fn metadata(&self) -> &TargetMetadata {
        &self.metadata
    }

    /// 表示用のラベル
    pub fn label(&self) -> String {
        self.metadata
            .name
            .clone()
            .or_else(|| self.metadata.id.clone())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}
