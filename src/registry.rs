//! Cross-repo orchestrator (§4.7): a global registry of known repos, and
//! fan-out search/session queries over them that tolerate missing or
//! corrupt per-repo stores.
//!
//! The registry itself lives in a separate SQLite database at a per-user
//! path (`$EC_HOME/.entirecontext/registry.db`, default `~/.entirecontext/registry.db`),
//! independent of any single repo's store.

use std::path::{Path, PathBuf};

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::search::{self, SearchMode, SearchResultItem, SearchTarget};

#[derive(Debug, Clone)]
pub struct RepoEntry {
    pub repo_name: String,
    pub repo_path: String,
    pub db_path: String,
}

pub fn global_db_path() -> PathBuf {
    let home = std::env::var("EC_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")));
    home.join(".entirecontext").join("registry.db")
}

pub async fn connect_global() -> Result<SqlitePool> {
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use std::str::FromStr;

    let path = global_db_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));
    let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS repos (repo_path TEXT PRIMARY KEY, repo_name TEXT NOT NULL, db_path TEXT NOT NULL)",
    )
    .execute(&pool)
    .await?;

    Ok(pool)
}

pub async fn register_repo(pool: &SqlitePool, repo_path: &str, repo_name: &str, db_path: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO repos (repo_path, repo_name, db_path) VALUES (?, ?, ?) \
         ON CONFLICT(repo_path) DO UPDATE SET repo_name = excluded.repo_name, db_path = excluded.db_path",
    )
    .bind(repo_path)
    .bind(repo_name)
    .bind(db_path)
    .execute(pool)
    .await?;
    Ok(())
}

/// List registered repos, optionally filtered to `names`. Entries whose
/// backing db file is missing or unreadable are skipped, never surfaced as
/// an error — the registry only promises what it can currently serve.
pub async fn list_repos(pool: &SqlitePool, names: Option<&[String]>) -> Result<Vec<RepoEntry>> {
    let rows = sqlx::query("SELECT repo_path, repo_name, db_path FROM repos").fetch_all(pool).await?;

    let mut repos = Vec::new();
    for row in rows {
        let repo_name: String = row.get("repo_name");
        if let Some(names) = names {
            if !names.iter().any(|n| n == &repo_name) {
                continue;
            }
        }
        let db_path: String = row.get("db_path");
        if !Path::new(&db_path).exists() {
            continue;
        }
        repos.push(RepoEntry { repo_name, repo_path: row.get("repo_path"), db_path });
    }
    Ok(repos)
}

/// Fan out a search across every registered repo, skipping any repo whose
/// store can't be opened or queried. An empty registry yields an empty
/// list, not an error.
pub async fn cross_repo_search(
    pool: &SqlitePool,
    target: SearchTarget,
    mode: SearchMode,
    query: &str,
    repos: Option<&[String]>,
    limit: i64,
) -> Result<Vec<SearchResultItem>> {
    let entries = list_repos(pool, repos).await?;

    let mut all_results = Vec::new();
    for entry in entries {
        let Ok(repo_pool) = crate::db::connect_read_only(Path::new(&entry.db_path)).await else {
            continue;
        };
        let Ok(mut results) = search::search(&repo_pool, target, mode, query, limit).await else {
            continue;
        };
        for r in &mut results {
            r.repo_name = Some(entry.repo_name.clone());
            r.repo_path = Some(entry.repo_path.clone());
        }
        all_results.extend(results);
    }

    all_results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    all_results.truncate(limit as usize);
    Ok(all_results)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RepoSession {
    pub repo_name: String,
    pub repo_path: String,
    pub session: crate::model::Session,
}

pub async fn cross_repo_sessions(pool: &SqlitePool, repos: Option<&[String]>) -> Result<Vec<RepoSession>> {
    let entries = list_repos(pool, repos).await?;
    let mut all = Vec::new();
    for entry in entries {
        let Ok(repo_pool) = crate::db::connect_read_only(Path::new(&entry.db_path)).await else {
            continue;
        };
        let Ok(project) = crate::model::get_project_by_path(&repo_pool, &entry.repo_path).await else {
            continue;
        };
        let Some(project) = project else { continue };
        let Ok(sessions) = crate::model::list_sessions(&repo_pool, &project.id).await else {
            continue;
        };
        for session in sessions {
            all.push(RepoSession {
                repo_name: entry.repo_name.clone(),
                repo_path: entry.repo_path.clone(),
                session,
            });
        }
    }
    all.sort_by(|a, b| b.session.started_at.cmp(&a.session.started_at));
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate, model};

    async fn make_repo_store(dir: &Path, text: &str) -> String {
        let pool = db::connect(dir).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let project = model::create_project(&pool, &dir.to_string_lossy(), None).await.unwrap();
        let session = model::create_session(&pool, &project.id, Some("s1"), None, None).await.unwrap();
        let turn = model::create_turn(&pool, &session.id, text).await.unwrap();
        model::finalize_turn(&pool, &turn.id, "", None).await.unwrap();
        pool.close().await;
        db::local_db_path(dir).to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn cross_repo_search_merges_and_tags_results() {
        let frontend = tempfile::tempdir().unwrap();
        let backend = tempfile::tempdir().unwrap();
        let frontend_db = make_repo_store(frontend.path(), "auth flow on the frontend").await;
        let backend_db = make_repo_store(backend.path(), "auth middleware on the backend").await;

        let registry_dir = tempfile::tempdir().unwrap();
        std::env::set_var("EC_HOME", registry_dir.path());
        let registry = connect_global().await.unwrap();
        register_repo(&registry, &frontend.path().to_string_lossy(), "frontend", &frontend_db).await.unwrap();
        register_repo(&registry, &backend.path().to_string_lossy(), "backend", &backend_db).await.unwrap();

        let results =
            cross_repo_search(&registry, SearchTarget::Turn, SearchMode::Regex, "auth", None, 10).await.unwrap();
        assert_eq!(results.len(), 2);
        let mut names: Vec<_> = results.iter().filter_map(|r| r.repo_name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["backend", "frontend"]);
    }

    #[tokio::test]
    async fn missing_store_is_skipped_not_fatal() {
        let registry_dir = tempfile::tempdir().unwrap();
        std::env::set_var("EC_HOME", registry_dir.path());
        let registry = connect_global().await.unwrap();
        register_repo(&registry, "/nowhere", "ghost", "/nowhere/.entirecontext/db/local.db").await.unwrap();

        let results =
            cross_repo_search(&registry, SearchTarget::Turn, SearchMode::Regex, "auth", None, 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn empty_registry_yields_empty_list() {
        let registry_dir = tempfile::tempdir().unwrap();
        std::env::set_var("EC_HOME", registry_dir.path());
        let registry = connect_global().await.unwrap();
        let results =
            cross_repo_search(&registry, SearchTarget::Turn, SearchMode::Regex, "auth", None, 10).await.unwrap();
        assert!(results.is_empty());
    }
}
