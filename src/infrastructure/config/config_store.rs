use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use validator::Validate;

use crate::common::error::RepoflowError;
use crate::common::result::RepoflowResult;
use crate::domain::entities::repository_target::{RepositoryTarget, TargetMetadata};
use crate::infrastructure::process::DEFAULT_TIMEOUT;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "repoflow.json";

/// Configuration store related errors
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("Configuration file not found at path: {0}")]
    ConfigFileNotFound(String),

    #[error("Configuration file read failed: {0}")]
    ReadFailed(String),

    #[error("Configuration parsing failed: {0}")]
    ParsingFailed(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Section not found: {0}")]
    SectionNotFound(String),

    #[error("No repository numbered {number} in section '{section}'")]
    EntryNotFound { section: String, number: u32 },
}

impl From<ConfigStoreError> for RepoflowError {
    fn from(error: ConfigStoreError) -> Self {
        RepoflowError::config(error.to_string())
    }
}

/// 設定ファイルのルート
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct RepoflowConfig {
    /// Directory that relative `repo` paths are joined to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1))]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub sections: BTreeMap<String, ConfigSection>,
}

/// セクション（リポジトリのグループ）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSection {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub configs: Vec<RepositoryEntry>,
}

/// 1つのリポジトリ設定
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RepositoryEntry {
    #[validate(range(min = 1))]
    pub number: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(alias = "repo_path")]
    #[validate(length(min = 1))]
    pub repo: String,

    #[validate(length(min = 1, max = 255))]
    pub base_branch: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

/// Values taken from the command line or environment that win over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

/// 読み込み済みの設定とその解決ロジック
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: RepoflowConfig,
}

impl ConfigStore {
    /// Reads a JSON or YAML file, chosen by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigStoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigStoreError::ConfigFileNotFound(
                path.display().to_string(),
            ));
        }

        let contents =
            fs::read_to_string(path).map_err(|e| ConfigStoreError::ReadFailed(e.to_string()))?;

        let config: RepoflowConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yml") | Some("yaml") => serde_yaml::from_str(&contents)
                .map_err(|e| ConfigStoreError::ParsingFailed(e.to_string()))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| ConfigStoreError::ParsingFailed(e.to_string()))?,
        };

        let path = std::path::absolute(path).map_err(|e| ConfigStoreError::ReadFailed(e.to_string()))?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_config(path, config)
    }

    /// Wraps an in-memory config; `path` anchors relative paths.
    pub fn from_config(path: impl Into<PathBuf>, config: RepoflowConfig) -> Result<Self, ConfigStoreError> {
        config
            .validate()
            .map_err(|e| ConfigStoreError::ValidationFailed(e.to_string()))?;

        for (key, section) in &config.sections {
            let mut seen = std::collections::HashSet::new();
            for entry in &section.configs {
                entry.validate().map_err(|e| {
                    ConfigStoreError::ValidationFailed(format!("section '{}': {}", key, e))
                })?;
                if !seen.insert(entry.number) {
                    return Err(ConfigStoreError::ValidationFailed(format!(
                        "duplicate number {} in section '{}'",
                        entry.number, key
                    )));
                }
            }
        }

        Ok(Self {
            path: path.into(),
            config,
        })
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(base_path) = overrides.base_path {
            self.config.base_path = Some(base_path);
        }
        if let Some(log_dir) = overrides.log_dir {
            self.config.log_dir = Some(log_dir);
        }
        if let Some(timeout_secs) = overrides.timeout_secs {
            self.config.timeout_secs = Some(timeout_secs);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &RepoflowConfig {
        &self.config
    }

    fn config_dir(&self) -> PathBuf {
        self.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    fn anchored(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir().join(path)
        }
    }

    /// `base_path`, defaulting to the config file's directory.
    pub fn base_path(&self) -> PathBuf {
        match &self.config.base_path {
            Some(base_path) => self.anchored(base_path),
            None => self.config_dir(),
        }
    }

    /// `log_dir`, defaulting to `.repoflow/logs` next to the config file.
    pub fn log_dir(&self) -> PathBuf {
        match &self.config.log_dir {
            Some(log_dir) => self.anchored(log_dir),
            None => self.config_dir().join(".repoflow").join("logs"),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.config
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    pub fn sections(&self) -> &BTreeMap<String, ConfigSection> {
        &self.config.sections
    }

    pub fn section(&self, key: &str) -> Result<&ConfigSection, ConfigStoreError> {
        self.config
            .sections
            .get(key)
            .ok_or_else(|| ConfigStoreError::SectionNotFound(key.to_string()))
    }

    pub fn entry(&self, section: &str, number: u32) -> Result<&RepositoryEntry, ConfigStoreError> {
        self.section(section)?
            .configs
            .iter()
            .find(|entry| entry.number == number)
            .ok_or_else(|| ConfigStoreError::EntryNotFound {
                section: section.to_string(),
                number,
            })
    }

    /// セクションと番号から操作対象を解決する
    pub fn resolve(&self, section: &str, number: u32) -> RepoflowResult<RepositoryTarget> {
        let entry = self.entry(section, number)?;
        let path = self.base_path().join(&entry.repo);

        if !path.is_dir() {
            return Err(RepoflowError::invalid_target(
                format!("repository directory does not exist: {}", path.display()),
                Some(path),
            ));
        }

        let mut target = RepositoryTarget::new(path, &entry.base_branch)?;
        if let Some(feature) = entry.feature_branch.as_deref().filter(|f| !f.trim().is_empty()) {
            target = target.with_feature_branch(feature)?;
        }

        Ok(target.with_metadata(TargetMetadata {
            id: entry.id.clone(),
            name: entry.name.clone(),
            ticket: entry.task.clone(),
            project: entry.project.clone(),
            section: Some(section.to_string()),
        }))
    }
}
