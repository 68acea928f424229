//! Search (§4.6): regex, full-text, and optional vector retrieval over
//! `{turn, session, event, content}` targets.
//!
//! FTS mode is only meaningful for `turn` and `session` — those are the two
//! targets with a trigger-maintained FTS index (§4.1). `event` (checkpoints)
//! and `content` (raw transcript blobs) have no FTS index of their own, so
//! they support regex only; requesting FTS against them is a clear error
//! rather than a silent fallback. Semantic mode always fails with
//! `MissingEmbeddingBackend` since no embedding provider is wired up — the
//! embedding model itself is an out-of-scope external collaborator.

use std::str::FromStr;

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::error::EcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchTarget {
    Turn,
    Session,
    Event,
    Content,
}

impl FromStr for SearchTarget {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "turn" => Ok(SearchTarget::Turn),
            "session" => Ok(SearchTarget::Session),
            "event" => Ok(SearchTarget::Event),
            "content" => Ok(SearchTarget::Content),
            other => anyhow::bail!("unknown search target: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Regex,
    Fts,
    Semantic,
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "regex" => Ok(SearchMode::Regex),
            "fts" => Ok(SearchMode::Fts),
            "semantic" => Ok(SearchMode::Semantic),
            other => anyhow::bail!("unknown search mode: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub target: String,
    pub id: String,
    pub snippet: String,
    pub score: f64,
    pub created_at: i64,
    /// Populated by the cross-repo orchestrator; absent for single-repo search.
    pub repo_name: Option<String>,
    pub repo_path: Option<String>,
}

pub async fn search(
    pool: &SqlitePool,
    target: SearchTarget,
    mode: SearchMode,
    query: &str,
    limit: i64,
) -> Result<Vec<SearchResultItem>> {
    if mode == SearchMode::Semantic {
        return Err(EcError::MissingEmbeddingBackend.into());
    }

    match (target, mode) {
        (SearchTarget::Turn, SearchMode::Regex) => search_turns_regex(pool, query, limit).await,
        (SearchTarget::Turn, SearchMode::Fts) => search_turns_fts(pool, query, limit).await,
        (SearchTarget::Session, SearchMode::Regex) => search_sessions_regex(pool, query, limit).await,
        (SearchTarget::Session, SearchMode::Fts) => search_sessions_fts(pool, query, limit).await,
        (SearchTarget::Event, SearchMode::Regex) => search_events_regex(pool, query, limit).await,
        (SearchTarget::Content, SearchMode::Regex) => search_content_regex(pool, query, limit).await,
        (SearchTarget::Event, SearchMode::Fts) | (SearchTarget::Content, SearchMode::Fts) => {
            anyhow::bail!("fts mode is not supported for this target, use regex")
        }
        (_, SearchMode::Semantic) => unreachable!("handled above"),
    }
}

async fn search_turns_regex(pool: &SqlitePool, query: &str, limit: i64) -> Result<Vec<SearchResultItem>> {
    let re = Regex::new(query)?;
    let rows = sqlx::query(
        "SELECT id, user_message, assistant_summary, created_at FROM turns ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    let mut results = Vec::new();
    for row in rows {
        let user_message: String = row.get("user_message");
        let assistant_summary: String = row.get("assistant_summary");
        if re.is_match(&user_message) || re.is_match(&assistant_summary) {
            results.push(SearchResultItem {
                target: "turn".to_string(),
                id: row.get("id"),
                snippet: snippet_of(&user_message, &assistant_summary),
                score: 0.0,
                created_at: row.get("created_at"),
                repo_name: None,
                repo_path: None,
            });
            if results.len() as i64 >= limit {
                break;
            }
        }
    }
    Ok(results)
}

async fn search_turns_fts(pool: &SqlitePool, query: &str, limit: i64) -> Result<Vec<SearchResultItem>> {
    let rows = sqlx::query(
        "SELECT t.id, t.created_at, bm25(fts_turns) AS rank, \
         snippet(fts_turns, 1, '[', ']', '...', 10) AS snip \
         FROM fts_turns JOIN turns t ON t.id = fts_turns.turn_id \
         WHERE fts_turns MATCH ? ORDER BY rank LIMIT ?",
    )
    .bind(query)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| SearchResultItem {
            target: "turn".to_string(),
            id: row.get("id"),
            snippet: row.get("snip"),
            score: row.get::<f64, _>("rank"),
            created_at: row.get("created_at"),
            repo_name: None,
            repo_path: None,
        })
        .collect())
}

async fn search_sessions_regex(pool: &SqlitePool, query: &str, limit: i64) -> Result<Vec<SearchResultItem>> {
    let re = Regex::new(query)?;
    let rows = sqlx::query(
        "SELECT id, title, summary, started_at FROM sessions ORDER BY started_at DESC",
    )
    .fetch_all(pool)
    .await?;

    let mut results = Vec::new();
    for row in rows {
        let title: Option<String> = row.get("title");
        let summary: Option<String> = row.get("summary");
        let haystack = format!("{} {}", title.clone().unwrap_or_default(), summary.clone().unwrap_or_default());
        if re.is_match(&haystack) {
            results.push(SearchResultItem {
                target: "session".to_string(),
                id: row.get("id"),
                snippet: haystack.trim().to_string(),
                score: 0.0,
                created_at: row.get("started_at"),
                repo_name: None,
                repo_path: None,
            });
            if results.len() as i64 >= limit {
                break;
            }
        }
    }
    Ok(results)
}

async fn search_sessions_fts(pool: &SqlitePool, query: &str, limit: i64) -> Result<Vec<SearchResultItem>> {
    let rows = sqlx::query(
        "SELECT s.id, s.started_at, bm25(fts_sessions) AS rank, \
         snippet(fts_sessions, 1, '[', ']', '...', 10) AS snip \
         FROM fts_sessions JOIN sessions s ON s.id = fts_sessions.session_id \
         WHERE fts_sessions MATCH ? ORDER BY rank LIMIT ?",
    )
    .bind(query)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| SearchResultItem {
            target: "session".to_string(),
            id: row.get("id"),
            snippet: row.get("snip"),
            score: row.get::<f64, _>("rank"),
            created_at: row.get("started_at"),
            repo_name: None,
            repo_path: None,
        })
        .collect())
}

async fn search_events_regex(pool: &SqlitePool, query: &str, limit: i64) -> Result<Vec<SearchResultItem>> {
    let re = Regex::new(query)?;
    let rows = sqlx::query(
        "SELECT id, commit_hash, diff_summary, created_at FROM checkpoints ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    let mut results = Vec::new();
    for row in rows {
        let diff_summary: Option<String> = row.get("diff_summary");
        let commit_hash: String = row.get("commit_hash");
        let haystack = format!("{} {}", commit_hash, diff_summary.clone().unwrap_or_default());
        if re.is_match(&haystack) {
            results.push(SearchResultItem {
                target: "event".to_string(),
                id: row.get("id"),
                snippet: diff_summary.unwrap_or(commit_hash),
                score: 0.0,
                created_at: row.get("created_at"),
                repo_name: None,
                repo_path: None,
            });
            if results.len() as i64 >= limit {
                break;
            }
        }
    }
    Ok(results)
}

async fn search_content_regex(pool: &SqlitePool, query: &str, limit: i64) -> Result<Vec<SearchResultItem>> {
    let re = Regex::new(query)?;
    let rows = sqlx::query(
        "SELECT tc.turn_id, tc.content_path, t.created_at FROM turn_content tc \
         JOIN turns t ON t.id = tc.turn_id ORDER BY t.created_at DESC",
    )
    .fetch_all(pool)
    .await?;

    let mut results = Vec::new();
    for row in rows {
        let path: String = row.get("content_path");
        let Ok(blob) = std::fs::read_to_string(&path) else { continue };
        if let Some(line) = blob.lines().find(|l| re.is_match(l)) {
            results.push(SearchResultItem {
                target: "content".to_string(),
                id: row.get("turn_id"),
                snippet: line.chars().take(200).collect(),
                score: 0.0,
                created_at: row.get("created_at"),
                repo_name: None,
                repo_path: None,
            });
            if results.len() as i64 >= limit {
                break;
            }
        }
    }
    Ok(results)
}

fn snippet_of(user_message: &str, assistant_summary: &str) -> String {
    let combined = format!("{user_message} {assistant_summary}");
    combined.chars().take(200).collect()
}
