//! Black-box CLI surface tests, driven through the `ec` binary the way a
//! user or an agent host's hook mechanism would invoke it.

use std::fs;
use std::process::Command as StdCommand;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn ec() -> Command {
    Command::cargo_bin("ec").unwrap()
}

fn init_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join(".git")).unwrap();
    dir
}

fn git_repo() -> TempDir {
    let dir = TempDir::new().unwrap();
    StdCommand::new("git").arg("init").arg("-q").current_dir(dir.path()).status().unwrap();
    StdCommand::new("git")
        .args(["config", "user.email", "test@example.com"])
        .current_dir(dir.path())
        .status()
        .unwrap();
    StdCommand::new("git").args(["config", "user.name", "test"]).current_dir(dir.path()).status().unwrap();
    dir
}

fn hook(repo: &std::path::Path, payload: &str) {
    ec().arg("--repo")
        .arg(repo)
        .arg("hook")
        .arg("handle")
        .write_stdin(payload)
        .assert()
        .success();
}

#[test]
fn init_then_status_reports_empty_store() {
    let repo = init_repo();

    ec().arg("--repo").arg(repo.path()).arg("init").assert().success();

    ec().arg("--repo")
        .arg(repo.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("sessions: 0"))
        .stdout(predicate::str::contains("active session: none"));
}

#[test]
fn status_before_init_reports_not_initialized() {
    let repo = init_repo();

    ec().arg("--repo")
        .arg(repo.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("not initialized"));
}

#[test]
fn config_show_returns_defaults() {
    let repo = init_repo();
    ec().arg("--repo").arg(repo.path()).arg("init").assert().success();

    ec().arg("--repo")
        .arg(repo.path())
        .arg("config")
        .arg("sync.shadow_branch")
        .assert()
        .success()
        .stdout(predicate::str::contains("entirecontext-shadow"));
}

#[test]
fn commands_outside_git_repo_fail() {
    let repo = TempDir::new().unwrap();

    ec().arg("--repo")
        .arg(repo.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not inside a git repository"));
}

#[test]
fn hook_capture_pipeline_then_search_finds_the_turn() {
    let repo = init_repo();
    ec().arg("--repo").arg(repo.path()).arg("init").assert().success();

    hook(repo.path(), r#"{"hook_type":"SessionStart","session_id":"s1","cwd":"/x"}"#);
    hook(
        repo.path(),
        r#"{"hook_type":"UserPromptSubmit","session_id":"s1","cwd":"/x","prompt":"fix the login auth bug"}"#,
    );
    hook(
        repo.path(),
        r#"{"hook_type":"PostToolUse","session_id":"s1","cwd":"/x","tool_name":"Edit","tool_input":{"file_path":"src/auth.rs"}}"#,
    );

    let transcript_path = repo.path().join("transcript.jsonl");
    fs::write(
        &transcript_path,
        "{\"role\":\"user\",\"content\":\"fix the login auth bug\"}\n{\"role\":\"assistant\",\"content\":\"Patched the session check\"}\n",
    )
    .unwrap();
    hook(
        repo.path(),
        &serde_json::json!({
            "hook_type": "Stop",
            "session_id": "s1",
            "cwd": "/x",
            "transcript_path": transcript_path.to_string_lossy(),
        })
        .to_string(),
    );

    ec().arg("--repo")
        .arg(repo.path())
        .arg("search")
        .arg("auth")
        .assert()
        .success()
        .stdout(predicate::str::contains("auth"));

    ec().arg("--repo")
        .arg(repo.path())
        .arg("session")
        .arg("show")
        .arg("s1")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 turns"));
}

#[test]
fn malformed_hook_payload_exits_with_code_two() {
    let repo = init_repo();
    ec().arg("--repo").arg(repo.path()).arg("init").assert().success();

    ec().arg("--repo")
        .arg(repo.path())
        .arg("hook")
        .arg("handle")
        .write_stdin("{not json")
        .assert()
        .code(2);
}

#[test]
fn purge_defaults_to_dry_run() {
    let repo = init_repo();
    ec().arg("--repo").arg(repo.path()).arg("init").assert().success();

    hook(repo.path(), r#"{"hook_type":"SessionStart","session_id":"s1","cwd":"/x"}"#);
    hook(
        repo.path(),
        r#"{"hook_type":"UserPromptSubmit","session_id":"s1","cwd":"/x","prompt":"password=hunter2"}"#,
    );
    hook(
        repo.path(),
        &serde_json::json!({"hook_type": "Stop", "session_id": "s1", "cwd": "/x", "transcript_path": repo.path().join("t.jsonl").to_string_lossy()}).to_string(),
    );

    ec().arg("--repo")
        .arg(repo.path())
        .arg("purge")
        .arg("match")
        .arg("password")
        .assert()
        .success()
        .stdout(predicate::str::contains("dry_run=true"));

    ec().arg("--repo")
        .arg(repo.path())
        .arg("purge")
        .arg("match")
        .arg("password")
        .arg("--execute")
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted=1"));
}

#[test]
fn post_commit_hook_creates_a_checkpoint() {
    let repo = git_repo();
    ec().arg("--repo").arg(repo.path()).arg("init").assert().success();

    fs::write(repo.path().join("a.txt"), "hello").unwrap();
    StdCommand::new("git").args(["add", "."]).current_dir(repo.path()).status().unwrap();
    StdCommand::new("git").args(["commit", "-q", "-m", "init"]).current_dir(repo.path()).status().unwrap();

    hook(repo.path(), r#"{"hook_type":"SessionStart","session_id":"s1","cwd":"/x"}"#);
    hook(repo.path(), &serde_json::json!({"hook_type": "PostCommit", "cwd": "/x"}).to_string());

    ec().arg("--repo")
        .arg(repo.path())
        .arg("checkpoint")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("main").or(predicate::str::contains("master")));
}

#[test]
fn pull_imports_sessions_and_checkpoints_from_the_shadow_branch() {
    let remote = TempDir::new().unwrap();
    StdCommand::new("git").args(["init", "-q", "--bare"]).current_dir(remote.path()).status().unwrap();

    let producer = git_repo();
    StdCommand::new("git")
        .args(["remote", "add", "origin"])
        .arg(remote.path())
        .current_dir(producer.path())
        .status()
        .unwrap();
    fs::write(producer.path().join("a.txt"), "hello").unwrap();
    StdCommand::new("git").args(["add", "."]).current_dir(producer.path()).status().unwrap();
    StdCommand::new("git").args(["commit", "-q", "-m", "init"]).current_dir(producer.path()).status().unwrap();

    let export_dir = producer.path().join(".entirecontext").join("shadow-export");
    fs::create_dir_all(export_dir.join("transcripts")).unwrap();
    fs::create_dir_all(export_dir.join("checkpoints")).unwrap();
    fs::write(
        export_dir.join("manifest.json"),
        serde_json::json!({
            "version": 1,
            "sessions": {"s1": {"total_turns": 1, "title": "remote session", "summary": "did stuff"}},
            "checkpoints": {},
        })
        .to_string(),
    )
    .unwrap();
    fs::write(
        export_dir.join("transcripts").join("s1.jsonl"),
        "{\"id\":\"t1\",\"turn_number\":1,\"user_message\":\"hi\",\"assistant_summary\":\"hello\",\"status\":\"completed\"}\n",
    )
    .unwrap();

    StdCommand::new("git").args(["checkout", "-q", "-b", "entirecontext-shadow"]).current_dir(producer.path()).status().unwrap();
    StdCommand::new("git").args(["add", ".entirecontext"]).current_dir(producer.path()).status().unwrap();
    StdCommand::new("git").args(["commit", "-q", "-m", "shadow export"]).current_dir(producer.path()).status().unwrap();
    StdCommand::new("git").args(["push", "origin", "entirecontext-shadow"]).current_dir(producer.path()).status().unwrap();

    let consumer = git_repo();
    StdCommand::new("git")
        .args(["remote", "add", "origin"])
        .arg(remote.path())
        .current_dir(consumer.path())
        .status()
        .unwrap();
    fs::write(consumer.path().join("b.txt"), "hi").unwrap();
    StdCommand::new("git").args(["add", "."]).current_dir(consumer.path()).status().unwrap();
    StdCommand::new("git").args(["commit", "-q", "-m", "init"]).current_dir(consumer.path()).status().unwrap();

    ec().arg("--repo").arg(consumer.path()).arg("init").assert().success();

    ec().arg("--repo")
        .arg(consumer.path())
        .arg("pull")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 sessions"))
        .stdout(predicate::str::contains("0 checkpoints"));

    ec().arg("--repo")
        .arg(consumer.path())
        .arg("session")
        .arg("show")
        .arg("s1")
        .assert()
        .success()
        .stdout(predicate::str::contains("kind=imported"));

    // A repeated pull with nothing new on the remote is a no-op.
    ec().arg("--repo")
        .arg(consumer.path())
        .arg("pull")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 sessions"));
}

#[test]
fn repo_list_reflects_registered_repos() {
    let registry_dir = TempDir::new().unwrap();
    let repo = init_repo();

    ec().env("EC_HOME", registry_dir.path())
        .arg("--repo")
        .arg(repo.path())
        .arg("init")
        .assert()
        .success();

    ec().env("EC_HOME", registry_dir.path())
        .arg("--repo")
        .arg(repo.path())
        .arg("repo")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}
