//! オーケストレーター経由の統合テスト

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use common::GitFixture;
use repoflow::application::workflow::{OperationRequest, WorkflowOrchestrator};
use repoflow::domain::entities::conflict::ConflictChoice;
use repoflow::domain::entities::operation::{
    FailureKind, OperationKind, OperationStatus, Outcome,
};
use repoflow::infrastructure::process::{
    CancellationSource, CommandInvocation, CommandResult, GitProcessRunner, ProcessRunner,
};

/// Ctrl-C が `git pull` の開始直前に届いたのと同じ状況を作る
struct CancelOnPull {
    inner: GitProcessRunner,
    cancellation: CancellationSource,
}

#[async_trait]
impl ProcessRunner for CancelOnPull {
    async fn run(&self, invocation: CommandInvocation) -> repoflow::Result<CommandResult> {
        if invocation.args.first().map(String::as_str) == Some("pull") {
            self.cancellation.cancel();
        }
        self.inner.run(invocation).await
    }
}

#[tokio::test]
async fn test_full_flow_from_base_creates_and_rebases_feature() {
    let fixture = GitFixture::new();
    let target = fixture.feature_target("feature/x");
    let (mut orchestrator, log) = fixture.orchestrator();

    let result = orchestrator.dispatch(&target, OperationRequest::FullFlow).await;

    assert_eq!(result.kind, OperationKind::Workflow);
    assert_eq!(result.outcome, Outcome::Completed, "{:?}", result);
    assert_eq!(
        result.steps.iter().map(|s| s.kind).collect::<Vec<_>>(),
        vec![OperationKind::Pull, OperationKind::Branch, OperationKind::Rebase]
    );
    assert_eq!(fixture.current_branch(), "feature/x");
    assert_eq!(fixture.rev("feature/x"), fixture.rev("main"));

    let records = log.read_today().unwrap();
    let last = records.last().unwrap();
    assert_eq!(last.operation, OperationKind::Workflow);
    assert_eq!(last.status, OperationStatus::Success);
    assert_eq!(last.branch.as_deref(), Some("feature/x"));
}

#[tokio::test]
async fn test_full_flow_brings_feature_onto_new_upstream_work() {
    let fixture = GitFixture::new();
    fixture.git(&["checkout", "-q", "-b", "feature/x"]);
    fixture.commit_file("feature.txt", "feature\n", "feature work");
    fixture.git(&["checkout", "-q", "main"]);
    let upstream = fixture.push_from_peer("peer.txt", "peer\n", "peer work");

    let target = fixture.feature_target("feature/x");
    let (mut orchestrator, _log) = fixture.orchestrator();
    let result = orchestrator.dispatch(&target, OperationRequest::FullFlow).await;

    assert_eq!(result.outcome, Outcome::Completed, "{:?}", result);
    assert_eq!(result.steps[0].outcome, Outcome::FastForwarded);
    assert_eq!(result.steps[1].outcome, Outcome::Switched);
    assert_eq!(fixture.rev("HEAD~1"), upstream);
}

#[tokio::test]
async fn test_full_flow_stops_at_failed_pull() {
    let fixture = GitFixture::new();
    fixture.git(&["remote", "remove", "origin"]);
    let target = fixture.feature_target("feature/x");
    let (mut orchestrator, log) = fixture.orchestrator();

    let result = orchestrator.dispatch(&target, OperationRequest::FullFlow).await;

    assert_eq!(result.status(), OperationStatus::Failure);
    assert_eq!(result.failure_kind(), Some(FailureKind::NoUpstream));
    assert_eq!(result.steps.len(), 1);
    assert!(!fixture.branch_exists("feature/x"));

    let records = log.read_today().unwrap();
    assert_eq!(
        records.iter().map(|r| r.operation).collect::<Vec<_>>(),
        vec![OperationKind::Pull, OperationKind::Workflow]
    );
}

#[tokio::test]
async fn test_cancelled_pull_gives_stashed_work_back() {
    let fixture = GitFixture::new();
    fixture.write("draft.txt", "draft\n");
    let log = fixture.log();
    let cancellation = CancellationSource::new();
    let runner = CancelOnPull {
        inner: GitProcessRunner::new().with_cancellation(cancellation.clone()),
        cancellation: cancellation.clone(),
    };
    let mut orchestrator = WorkflowOrchestrator::new(Arc::new(runner), log.clone(), cancellation);

    let result = orchestrator
        .dispatch(&fixture.target(), OperationRequest::Pull { branch: None })
        .await;

    assert_eq!(result.status(), OperationStatus::Cancelled, "{:?}", result);
    assert_eq!(
        result.steps.iter().map(|s| s.outcome).collect::<Vec<_>>(),
        vec![Outcome::Stashed, Outcome::Popped]
    );
    assert_eq!(fixture.read("draft.txt"), "draft\n");
    assert_eq!(fixture.stash_count(), 0);

    let records = log.read_today().unwrap();
    let pull = records
        .iter()
        .find(|r| r.operation == OperationKind::Pull)
        .unwrap();
    assert_eq!(pull.status, OperationStatus::Cancelled);
    assert_eq!(
        records.iter().filter(|r| r.operation == OperationKind::Stash).count(),
        2
    );
}

#[tokio::test]
async fn test_resolve_conflict_routes_to_rebase_session() {
    let fixture = GitFixture::new();
    fixture.commit_file("shared.txt", "base\n", "add shared");
    fixture.git(&["push", "-q", "origin", "main"]);
    fixture.git(&["checkout", "-q", "-b", "feature/x"]);
    let head = fixture.commit_file("shared.txt", "feature\n", "feature edit");
    fixture.push_from_peer("shared.txt", "upstream\n", "upstream edit");

    let target = fixture.feature_target("feature/x");
    let (mut orchestrator, _log) = fixture.orchestrator();

    let flow = orchestrator.dispatch(&target, OperationRequest::FullFlow).await;
    assert_eq!(flow.status(), OperationStatus::Conflict);
    assert!(flow.conflict_state().is_some());

    let aborted = orchestrator
        .dispatch(&target, OperationRequest::ResolveConflict(ConflictChoice::Abort))
        .await;
    assert_eq!(aborted.outcome, Outcome::RebaseAborted);
    assert_eq!(fixture.rev("HEAD"), head);
}

#[tokio::test]
async fn test_resolve_without_pending_conflict_is_noop() {
    let fixture = GitFixture::new();
    let (mut orchestrator, _log) = fixture.orchestrator();

    let result = orchestrator
        .dispatch(
            &fixture.target(),
            OperationRequest::ResolveConflict(ConflictChoice::Abort),
        )
        .await;

    assert_eq!(result.outcome, Outcome::NothingToAbort);
    assert_eq!(result.status(), OperationStatus::Noop);
}

#[tokio::test]
async fn test_status_and_stash_requests_are_logged_to_daily_file() {
    let fixture = GitFixture::new();
    fixture.write("README.md", "changed\n");
    let (mut orchestrator, log) = fixture.orchestrator();

    let status = orchestrator.dispatch(&fixture.target(), OperationRequest::Status).await;
    assert_eq!(status.message, "1 changed paths");

    let saved = orchestrator
        .dispatch(&fixture.target(), OperationRequest::StashSave { label: None })
        .await;
    assert_eq!(saved.outcome, Outcome::Stashed);
    let dropped = orchestrator
        .dispatch(&fixture.target(), OperationRequest::StashDrop)
        .await;
    assert_eq!(dropped.outcome, Outcome::Dropped);
    assert_eq!(fixture.stash_count(), 0);

    assert!(log.today_path().exists());
    let content = std::fs::read_to_string(log.today_path()).unwrap();
    assert_eq!(content.lines().count(), 3);
    for line in content.lines() {
        serde_json::from_str::<serde_json::Value>(line).unwrap();
    }
}

#[tokio::test]
async fn test_missing_directory_is_invalid_target() {
    let fixture = GitFixture::new();
    let target = repoflow::domain::entities::repository_target::RepositoryTarget::new(
        fixture.root.path().join("does-not-exist"),
        "main",
    )
    .unwrap();
    let (mut orchestrator, _log) = fixture.orchestrator();

    let result = orchestrator.dispatch(&target, OperationRequest::Status).await;

    assert_eq!(result.failure_kind(), Some(FailureKind::InvalidTarget));
}
