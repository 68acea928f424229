//! Purge (§4.8): safe deletion of turns/sessions, cascading to blobs and
//! FTS rows. Dry-run is the default everywhere a caller forgets to ask for
//! execution — this module only ever mutates when explicitly told to.

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::error::EcError;

#[derive(Debug, Clone, Serialize)]
pub struct PurgeResult {
    pub matched_turns: i64,
    pub deleted: i64,
    pub dry_run: bool,
}

pub async fn purge_turns(pool: &SqlitePool, ids: &[String], dry_run: bool) -> Result<PurgeResult> {
    let mut matched = 0i64;
    let mut blob_paths = Vec::new();

    for id in ids {
        let row = sqlx::query("SELECT content_path FROM turn_content WHERE turn_id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM turns WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await?;
        if !exists {
            continue;
        }
        matched += 1;
        if let Some(row) = row {
            blob_paths.push(row.get::<String, _>("content_path"));
        }
    }

    if dry_run {
        return Ok(PurgeResult { matched_turns: matched, deleted: 0, dry_run: true });
    }

    let mut deleted = 0i64;
    for id in ids {
        let result = sqlx::query("DELETE FROM turns WHERE id = ?").bind(id).execute(pool).await?;
        deleted += result.rows_affected() as i64;
    }
    for path in blob_paths {
        let _ = std::fs::remove_file(&path);
    }

    Ok(PurgeResult { matched_turns: matched, deleted, dry_run: false })
}

pub async fn purge_session(pool: &SqlitePool, session_id: &str, dry_run: bool) -> Result<PurgeResult> {
    let ended_at: Option<Option<i64>> =
        sqlx::query_scalar("SELECT ended_at FROM sessions WHERE id = ?").bind(session_id).fetch_optional(pool).await?;

    let Some(ended_at) = ended_at else {
        return Ok(PurgeResult { matched_turns: 0, deleted: 0, dry_run });
    };
    if ended_at.is_none() {
        return Err(EcError::ActiveSessionError(session_id.to_string()).into());
    }

    let turn_ids: Vec<String> =
        sqlx::query_scalar("SELECT id FROM turns WHERE session_id = ?").bind(session_id).fetch_all(pool).await?;

    if dry_run {
        return Ok(PurgeResult { matched_turns: turn_ids.len() as i64, deleted: 0, dry_run: true });
    }

    let blob_paths: Vec<String> = sqlx::query_scalar(
        "SELECT content_path FROM turn_content WHERE turn_id IN (SELECT id FROM turns WHERE session_id = ?)",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    sqlx::query("DELETE FROM sessions WHERE id = ?").bind(session_id).execute(pool).await?;
    for path in blob_paths {
        let _ = std::fs::remove_file(&path);
    }

    Ok(PurgeResult { matched_turns: turn_ids.len() as i64, deleted: turn_ids.len() as i64, dry_run: false })
}

pub async fn purge_by_pattern(pool: &SqlitePool, pattern: &str, dry_run: bool) -> Result<PurgeResult> {
    let re = Regex::new(pattern)?;
    let rows = sqlx::query("SELECT id, user_message FROM turns").fetch_all(pool).await?;

    let matching: Vec<String> = rows
        .into_iter()
        .filter(|row| re.is_match(row.get::<&str, _>("user_message")))
        .map(|row| row.get::<String, _>("id"))
        .collect();

    purge_turns(pool, &matching, dry_run).await
}
