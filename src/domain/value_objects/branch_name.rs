use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const MAX_LEN: usize = 255;

/// git check-ref-format の規則のうち、ブランチ名で破られやすいもの
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameRule {
    NotEmpty,
    MaxLength,
    NoLeadingDash,
    NoBadEnding,
    NoSpecialRef,
    NoForbiddenChar(char),
    NoForbiddenSequence,
}

impl fmt::Display for NameRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEmpty => f.write_str("name is empty"),
            Self::MaxLength => write!(f, "longer than {} bytes", MAX_LEN),
            Self::NoLeadingDash => f.write_str("starts with '-'"),
            Self::NoBadEnding => f.write_str("ends with '.lock', '/' or '.'"),
            Self::NoSpecialRef => f.write_str("is a special git ref"),
            Self::NoForbiddenChar(ch) => write!(f, "contains {:?}", ch),
            Self::NoForbiddenSequence => f.write_str("contains '..', '//' or '@{'"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid branch name {name:?}: {rule}")]
pub struct BranchNameError {
    pub name: String,
    pub rule: NameRule,
}

/// Gitブランチ名
///
/// Validated up front so a name can be handed to git as an argument
/// without being mistaken for an option or a revision expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    pub fn new(name: &str) -> Result<Self, BranchNameError> {
        let name = name.trim();
        match broken_rule(name) {
            Some(rule) => Err(BranchNameError {
                name: name.to_string(),
                rule,
            }),
            None => Ok(Self(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// リセット前に作るバックアップブランチ名（`<branch>_backup_YYYYmmdd_HHMMSS`）
    pub fn backup_name(&self, at: NaiveDateTime) -> BranchName {
        Self(format!("{}_backup_{}", self.0, at.format("%Y%m%d_%H%M%S")))
    }

    /// `_2`, `_3` ... for names already taken.
    pub fn with_suffix(&self, n: usize) -> BranchName {
        Self(format!("{}_{}", self.0, n))
    }
}

fn broken_rule(name: &str) -> Option<NameRule> {
    if name.is_empty() {
        return Some(NameRule::NotEmpty);
    }
    if name.len() > MAX_LEN {
        return Some(NameRule::MaxLength);
    }
    if name.starts_with('-') {
        return Some(NameRule::NoLeadingDash);
    }
    if [".lock", "/", "."].iter().any(|end| name.ends_with(end)) {
        return Some(NameRule::NoBadEnding);
    }
    if matches!(name, "@" | "HEAD" | "ORIG_HEAD" | "FETCH_HEAD" | "MERGE_HEAD") {
        return Some(NameRule::NoSpecialRef);
    }
    if let Some(ch) = name
        .chars()
        .find(|ch| ch.is_ascii_control() || " ~^:?*[\\".contains(*ch))
    {
        return Some(NameRule::NoForbiddenChar(ch));
    }
    if ["..", "//", "@{"].iter().any(|seq| name.contains(seq)) {
        return Some(NameRule::NoForbiddenSequence);
    }
    None
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for BranchName {
    type Error = BranchNameError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        BranchName::new(&name)
    }
}

impl From<BranchName> for String {
    fn from(branch: BranchName) -> Self {
        branch.0
    }
}
