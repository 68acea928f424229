//! Pure read-only git queries over a working tree (§4.3).
//!
//! Every operation degrades to an absent result rather than an error: a
//! missing `git` binary, a non-zero exit, or a timeout are all
//! indistinguishable to the caller. This mirrors `git_utils.py`'s
//! `except (TimeoutExpired, FileNotFoundError): pass` and keeps capture
//! pipeline handlers from ever failing on a git hiccup.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

const REV_PARSE_TIMEOUT: Duration = Duration::from_secs(5);
const DIFF_TIMEOUT: Duration = Duration::from_secs(10);
const LS_FILES_TIMEOUT: Duration = Duration::from_secs(30);

async fn run(repo_path: &Path, args: &[&str], budget: Duration) -> Option<String> {
    let fut = Command::new("git").args(args).current_dir(repo_path).output();

    let output = match timeout(budget, fut).await {
        Ok(Ok(output)) => output,
        Ok(Err(_)) | Err(_) => return None,
    };

    if !output.status.success() {
        return None;
    }

    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub async fn current_commit(repo_path: &Path) -> Option<String> {
    run(repo_path, &["rev-parse", "HEAD"], REV_PARSE_TIMEOUT).await
}

/// Returns `None` for a detached HEAD (where `rev-parse --abbrev-ref HEAD`
/// prints the literal string "HEAD").
pub async fn current_branch(repo_path: &Path) -> Option<String> {
    let branch = run(repo_path, &["rev-parse", "--abbrev-ref", "HEAD"], REV_PARSE_TIMEOUT).await?;
    if branch == "HEAD" {
        None
    } else {
        Some(branch)
    }
}

pub async fn diff_stat(repo_path: &Path, from_commit: Option<&str>) -> Option<String> {
    let stat = match from_commit {
        Some(commit) => run(repo_path, &["diff", "--stat", commit, "HEAD"], DIFF_TIMEOUT).await,
        None => run(repo_path, &["diff", "--stat"], DIFF_TIMEOUT).await,
    }?;
    if stat.is_empty() {
        None
    } else {
        Some(stat)
    }
}

/// Parses `git ls-files -s` into `{path -> object_hash}`, ignoring
/// malformed lines rather than failing the whole snapshot.
pub async fn tracked_files_snapshot(repo_path: &Path) -> HashMap<String, String> {
    let Some(stdout) = run(repo_path, &["ls-files", "-s"], LS_FILES_TIMEOUT).await else {
        return HashMap::new();
    };

    let mut snapshot = HashMap::new();
    for line in stdout.lines() {
        let Some((meta, path)) = line.split_once('\t') else { continue };
        let mut fields = meta.split_whitespace();
        let Some(_mode) = fields.next() else { continue };
        let Some(hash) = fields.next() else { continue };
        snapshot.insert(path.to_string(), hash.to_string());
    }
    snapshot
}

/// Is `path` (or any ancestor) a git working tree? Used by commands that
/// must refuse to run outside one (`NotInGitRepo`).
pub async fn is_git_repo(path: &Path) -> bool {
    run(path, &["rev-parse", "--git-dir"], REV_PARSE_TIMEOUT).await.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn init_repo(dir: &Path) {
        StdCommand::new("git").arg("init").arg("-q").current_dir(dir).status().unwrap();
        StdCommand::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(dir)
            .status()
            .unwrap();
        StdCommand::new("git")
            .args(["config", "user.name", "test"])
            .current_dir(dir)
            .status()
            .unwrap();
    }

    #[tokio::test]
    async fn non_repo_yields_absent_everything() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(current_commit(dir.path()).await, None);
        assert_eq!(current_branch(dir.path()).await, None);
        assert!(tracked_files_snapshot(dir.path()).await.is_empty());
        assert!(!is_git_repo(dir.path()).await);
    }

    #[tokio::test]
    async fn repo_with_commit_reports_state() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        StdCommand::new("git").args(["add", "."]).current_dir(dir.path()).status().unwrap();
        StdCommand::new("git")
            .args(["commit", "-q", "-m", "init"])
            .current_dir(dir.path())
            .status()
            .unwrap();

        assert!(is_git_repo(dir.path()).await);
        assert!(current_commit(dir.path()).await.is_some());
        let snapshot = tracked_files_snapshot(dir.path()).await;
        assert!(snapshot.contains_key("a.txt"));
    }
}
