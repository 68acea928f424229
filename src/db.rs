//! SQLite connection management.
//!
//! Two kinds of handles: a per-repo pool rooted at `<repo>/.entirecontext/db/local.db`,
//! and a global registry pool rooted at a per-user path (see `registry.rs`).
//! Both get the same pragmas: WAL journalling and a busy timeout, so
//! concurrent short-lived hook processes block on a writer rather than
//! erroring out.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Busy timeout applied to every connection, per the concurrency model's
/// requirement that writers block rather than error under contention.
const BUSY_TIMEOUT_MS: u32 = 5_000;

pub fn local_db_path(repo_root: &Path) -> PathBuf {
    repo_root.join(".entirecontext").join("db").join("local.db")
}

pub fn content_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(".entirecontext").join("content")
}

/// Open (creating if missing) the per-repo store.
pub async fn connect(repo_root: &Path) -> Result<SqlitePool> {
    let db_path = local_db_path(repo_root);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    open(&db_path, true).await
}

/// Open an existing per-repo store read-only. Used by the cross-repo
/// orchestrator, which must never create a store it doesn't already know
/// about and must tolerate a missing/corrupt file without failing the
/// whole fan-out.
pub async fn connect_read_only(db_path: &Path) -> Result<SqlitePool> {
    open(db_path, false).await
}

async fn open(db_path: &Path, create_if_missing: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(create_if_missing)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS as u64))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
