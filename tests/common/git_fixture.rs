//! 実際のgitリポジトリを使うテスト環境

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;

use repoflow::application::managers::ManagerContext;
use repoflow::application::workflow::WorkflowOrchestrator;
use repoflow::domain::entities::operation_record::OperationRecord;
use repoflow::domain::entities::repository_target::RepositoryTarget;
use repoflow::infrastructure::logging::OperationLog;
use repoflow::infrastructure::process::{CancellationSource, GitProcessRunner};

/// Bare remote on `main` with one pushed commit, plus a working clone.
pub struct GitFixture {
    pub root: TempDir,
    pub remote: PathBuf,
    pub work: PathBuf,
    pub log_dir: PathBuf,
}

impl GitFixture {
    pub fn new() -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        let remote = root.path().join("remote.git");
        let work = root.path().join("work");
        let log_dir = root.path().join("logs");

        git(root.path(), &["init", "--bare", "-q", "remote.git"]);
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        let fixture = Self {
            root,
            remote,
            work,
            log_dir,
        };
        fixture.clone_remote("work");
        fixture.write("README.md", "# fixture\n");
        fixture.git(&["add", "-A"]);
        fixture.git(&["commit", "-q", "-m", "initial commit"]);
        fixture.git(&["push", "-q", "-u", "origin", "main"]);
        fixture
    }

    /// Clones the remote next to the working clone and configures an author.
    pub fn clone_remote(&self, name: &str) -> PathBuf {
        let path = self.root.path().join(name);
        git(self.root.path(), &["clone", "-q", "remote.git", name]);
        configure(&path);
        // 空のリモートをクローンした直後でも main を指す
        git(&path, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        path
    }

    /// Repository with commits but no remote at all.
    pub fn lonely_repo(&self) -> PathBuf {
        let path = self.root.path().join("lonely");
        fs::create_dir_all(&path).expect("Failed to create lonely repo");
        git(&path, &["init", "-q"]);
        configure(&path);
        git(&path, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        fs::write(path.join("file.txt"), "content\n").expect("Failed to write file");
        git(&path, &["add", "-A"]);
        git(&path, &["commit", "-q", "-m", "lonely"]);
        path
    }

    /// Runs git in the working clone and returns trimmed stdout.
    pub fn git(&self, args: &[&str]) -> String {
        git(&self.work, args)
    }

    pub fn git_in(&self, dir: &Path, args: &[&str]) -> String {
        git(dir, args)
    }

    pub fn write(&self, relative: &str, content: &str) {
        write_file(&self.work, relative, content);
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.work.join(relative)).expect("Failed to read file")
    }

    pub fn commit_file(&self, relative: &str, content: &str, message: &str) -> String {
        commit_in(&self.work, relative, content, message)
    }

    /// Commits on `main` in a peer clone and pushes it.
    pub fn push_from_peer(&self, relative: &str, content: &str, message: &str) -> String {
        let peer = self.root.path().join("peer");
        if !peer.exists() {
            self.clone_remote("peer");
        }
        git(&peer, &["checkout", "-q", "main"]);
        git(&peer, &["pull", "-q", "--no-rebase", "origin", "main"]);
        let head = commit_in(&peer, relative, content, message);
        git(&peer, &["push", "-q", "origin", "main"]);
        head
    }

    pub fn rev(&self, rev: &str) -> String {
        self.git(&["rev-parse", rev])
    }

    pub fn current_branch(&self) -> String {
        self.git(&["symbolic-ref", "--short", "HEAD"])
    }

    pub fn stash_count(&self) -> usize {
        self.git(&["stash", "list"]).lines().count()
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        Command::new("git")
            .args(["show-ref", "--verify", "--quiet", &format!("refs/heads/{}", name)])
            .current_dir(&self.work)
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    pub fn target(&self) -> RepositoryTarget {
        RepositoryTarget::new(&self.work, "main").expect("Failed to build target")
    }

    pub fn feature_target(&self, feature: &str) -> RepositoryTarget {
        self.target()
            .with_feature_branch(feature)
            .expect("Failed to set feature branch")
    }

    pub fn log(&self) -> Arc<OperationLog> {
        Arc::new(OperationLog::open(&self.log_dir).expect("Failed to open log"))
    }

    pub fn context(&self) -> (ManagerContext, Arc<OperationLog>) {
        let log = self.log();
        (ManagerContext::new(Arc::new(GitProcessRunner::new()), log.clone()), log)
    }

    pub fn orchestrator(&self) -> (WorkflowOrchestrator, Arc<OperationLog>) {
        let log = self.log();
        let cancellation = CancellationSource::new();
        let runner = GitProcessRunner::new().with_cancellation(cancellation.clone());
        (
            WorkflowOrchestrator::new(Arc::new(runner), log.clone(), cancellation),
            log,
        )
    }

    pub fn records(&self) -> Vec<OperationRecord> {
        self.log().read_today().expect("Failed to read log")
    }

    /// JSON configuration with one section `work` whose entry 1 is the working clone.
    pub fn write_config(&self, feature: Option<&str>) -> PathBuf {
        let mut entry = serde_json::json!({
            "number": 1,
            "id": "work",
            "name": "Work clone",
            "repo": "work",
            "base_branch": "main",
            "task": "TCK-1"
        });
        if let Some(feature) = feature {
            entry["feature_branch"] = serde_json::Value::from(feature);
        }
        let config = serde_json::json!({
            "base_path": self.root.path(),
            "log_dir": self.log_dir,
            "sections": {
                "work": { "description": "fixture", "configs": [entry] }
            }
        });

        let path = self.root.path().join("repoflow.json");
        fs::write(&path, serde_json::to_string_pretty(&config).expect("Failed to encode config"))
            .expect("Failed to write config");
        path
    }
}

fn configure(dir: &Path) {
    git(dir, &["config", "user.email", "fixture@example.com"]);
    git(dir, &["config", "user.name", "Fixture"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
    git(dir, &["config", "pull.rebase", "false"]);
}

fn write_file(dir: &Path, relative: &str, content: &str) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write file");
}

fn commit_in(dir: &Path, relative: &str, content: &str, message: &str) -> String {
    write_file(dir, relative, content);
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("LC_ALL", "C")
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}
