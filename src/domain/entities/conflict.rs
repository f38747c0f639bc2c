use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// コンフリクトが発生した操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictOrigin {
    Rebase,
    Merge,
    StashPop,
}

/// ユーザーが選択できる解決方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictChoice {
    /// Resume after the conflicts were fixed and staged by hand.
    Continue,
    /// Give up and restore the state before the operation.
    Abort,
    /// Drop the commit that conflicts and carry on.
    Skip,
}

impl ConflictChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Abort => "abort",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for ConflictChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" | "c" => Ok(Self::Continue),
            "abort" | "a" => Ok(Self::Abort),
            "skip" | "s" => Ok(Self::Skip),
            other => Err(format!("unknown conflict choice: {}", other)),
        }
    }
}

/// A suspended operation waiting for a resolution decision.
///
/// Never persisted; it lives only inside an `OperationResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictState {
    pub origin: ConflictOrigin,
    pub repository_path: PathBuf,
    pub conflicted_paths: Vec<String>,
    pub choices: Vec<ConflictChoice>,
}

impl ConflictState {
    pub fn new(origin: ConflictOrigin, repository_path: PathBuf, conflicted_paths: Vec<String>) -> Self {
        let choices = match origin {
            ConflictOrigin::Rebase => {
                vec![ConflictChoice::Continue, ConflictChoice::Abort, ConflictChoice::Skip]
            }
            ConflictOrigin::Merge => vec![ConflictChoice::Continue, ConflictChoice::Abort],
            // 手動で解決後に stash drop する
            ConflictOrigin::StashPop => Vec::new(),
        };

        Self {
            origin,
            repository_path,
            conflicted_paths,
            choices,
        }
    }

    pub fn allows(&self, choice: ConflictChoice) -> bool {
        self.choices.contains(&choice)
    }
}
