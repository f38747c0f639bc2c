//! バイナリのCLIテスト

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

use common::GitFixture;

fn repoflow(fixture: &GitFixture) -> Command {
    let mut cmd = Command::cargo_bin("repoflow").unwrap();
    cmd.env_remove("REPOFLOW_CONFIG")
        .env_remove("REPOFLOW_LOG_DIR")
        .env_remove("REPOFLOW_BASE_PATH")
        .env_remove("REPOFLOW_TIMEOUT_SECS")
        .current_dir(fixture.root.path())
        .arg("--no-color");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let fixture = GitFixture::new();
    repoflow(&fixture)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("flow"))
        .stdout(predicate::str::contains("delete-branch"));
}

#[test]
fn test_long_version_names_build() {
    let fixture = GitFixture::new();
    repoflow(&fixture)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")))
        .stdout(predicate::str::contains(format!(" for {}", std::env::consts::ARCH)));
}

#[test]
fn test_sections_lists_configured_entries() {
    let fixture = GitFixture::new();
    fixture.write_config(Some("feature/x"));

    repoflow(&fixture)
        .arg("sections")
        .assert()
        .success()
        .stdout(predicate::str::contains("Work clone"))
        .stdout(predicate::str::contains("feature/x"));
}

#[test]
fn test_status_reports_and_logs() {
    let fixture = GitFixture::new();
    fixture.write_config(None);

    repoflow(&fixture)
        .args(["-s", "work", "-n", "1", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("working tree clean"));

    repoflow(&fixture)
        .args(["-o", "json", "logs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"operation\": \"status\""))
        .stdout(predicate::str::contains("\"ticket\": \"TCK-1\""));
}

#[test]
fn test_reset_without_yes_fails_and_keeps_head() {
    let fixture = GitFixture::new();
    fixture.git(&["checkout", "-q", "-b", "feature/x"]);
    let head = fixture.commit_file("feature.txt", "feature\n", "feature work");
    fixture.write_config(Some("feature/x"));

    repoflow(&fixture)
        .args(["-s", "work", "-n", "1", "reset"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("confirmation-required"));

    assert_eq!(fixture.rev("HEAD"), head);
}

#[test]
fn test_commit_and_push_json_output() {
    let fixture = GitFixture::new();
    fixture.write_config(None);
    fixture.write("change.txt", "change\n");

    repoflow(&fixture)
        .args(["-s", "work", "-n", "1", "-o", "json", "push", "-m", "add change"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\": \"push\""))
        .stdout(predicate::str::contains("\"committed\""));

    assert_eq!(
        fixture.git_in(&fixture.remote, &["log", "-1", "--format=%s", "main"]),
        "add change"
    );
}

#[test]
fn test_unknown_entry_fails() {
    let fixture = GitFixture::new();
    fixture.write_config(None);

    repoflow(&fixture)
        .args(["-s", "work", "-n", "9", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No repository numbered 9"));
}

#[test]
fn test_missing_config_fails() {
    let fixture = GitFixture::new();

    repoflow(&fixture)
        .args(["-c", "nowhere.json", "sections"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load"));
}

#[test]
fn test_operation_requires_section_and_number() {
    let fixture = GitFixture::new();
    fixture.write_config(None);

    repoflow(&fixture)
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--section and --number"));
}
