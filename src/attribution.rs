//! Attribution / checkpoint tracking (§4.10): anchors session activity to
//! git commits, and maps line ranges within a file to human or agent
//! authorship at a given checkpoint.

use std::collections::HashMap;

use anyhow::Result;
use serde_json::json;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::model::Checkpoint;

fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Checkpoint {
    Checkpoint {
        id: row.get("id"),
        session_id: row.get("session_id"),
        commit_hash: row.get("commit_hash"),
        branch: row.get("branch"),
        created_at: row.get("created_at"),
        diff_summary: row.get("diff_summary"),
        files_snapshot_json: row.get("files_snapshot_json"),
        metadata_json: row.get("metadata_json"),
    }
}

pub async fn create_checkpoint(
    pool: &SqlitePool,
    session_id: &str,
    commit_hash: &str,
    branch: Option<&str>,
    diff_summary: Option<&str>,
    source: &str,
) -> Result<Checkpoint> {
    let id = Uuid::new_v4().to_string();
    let created_at = chrono::Utc::now().timestamp();
    let metadata_json = json!({ "source": source }).to_string();

    sqlx::query(
        "INSERT INTO checkpoints (id, session_id, commit_hash, branch, created_at, diff_summary, metadata_json) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(session_id)
    .bind(commit_hash)
    .bind(branch)
    .bind(created_at)
    .bind(diff_summary)
    .bind(&metadata_json)
    .execute(pool)
    .await?;

    Ok(Checkpoint {
        id,
        session_id: session_id.to_string(),
        commit_hash: commit_hash.to_string(),
        branch: branch.map(str::to_string),
        created_at,
        diff_summary: diff_summary.map(str::to_string),
        files_snapshot_json: None,
        metadata_json,
    })
}

pub async fn latest_checkpoint(pool: &SqlitePool, session_id: &str) -> Result<Option<Checkpoint>> {
    let row = sqlx::query(
        "SELECT id, session_id, commit_hash, branch, created_at, diff_summary, files_snapshot_json, metadata_json \
         FROM checkpoints WHERE session_id = ? ORDER BY created_at DESC LIMIT 1",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_checkpoint))
}

pub async fn get_checkpoint(pool: &SqlitePool, id: &str) -> Result<Option<Checkpoint>> {
    let row = sqlx::query(
        "SELECT id, session_id, commit_hash, branch, created_at, diff_summary, files_snapshot_json, metadata_json \
         FROM checkpoints WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_checkpoint))
}

pub async fn list_checkpoints(pool: &SqlitePool) -> Result<Vec<Checkpoint>> {
    let rows = sqlx::query(
        "SELECT id, session_id, commit_hash, branch, created_at, diff_summary, files_snapshot_json, metadata_json \
         FROM checkpoints ORDER BY created_at DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_checkpoint).collect())
}

pub async fn record_attribution(
    pool: &SqlitePool,
    file_path: &str,
    start_line: i64,
    end_line: i64,
    checkpoint_id: &str,
    kind: &str,
    agent_id: Option<&str>,
    confidence: Option<f64>,
) -> Result<()> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO attributions (id, file_path, start_line, end_line, checkpoint_id, kind, agent_id, confidence) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(file_path)
    .bind(start_line)
    .bind(end_line)
    .bind(checkpoint_id)
    .bind(kind)
    .bind(agent_id)
    .bind(confidence)
    .execute(pool)
    .await?;
    Ok(())
}

pub struct BlameRange {
    pub start_line: i64,
    pub end_line: i64,
    pub checkpoint_id: String,
    pub kind: String,
    pub agent_id: Option<String>,
}

pub struct BlameSummary {
    pub total_lines: i64,
    pub human_lines: i64,
    pub human_pct: f64,
    pub agent_lines: i64,
    pub agent_pct: f64,
    pub agents: HashMap<String, i64>,
}

/// Attribution ranges covering `[start, end]` for `path`, most-recently
/// created first so overlap resolution is last-writer-wins, plus a summary
/// over the spanned lines. Single-line queries are `start == end`.
pub async fn blame(
    pool: &SqlitePool,
    file_path: &str,
    start: i64,
    end: i64,
) -> Result<(Vec<BlameRange>, BlameSummary)> {
    let rows = sqlx::query(
        "SELECT a.start_line, a.end_line, a.checkpoint_id, a.kind, a.agent_id, c.created_at \
         FROM attributions a JOIN checkpoints c ON a.checkpoint_id = c.id \
         WHERE a.file_path = ? AND a.start_line <= ? AND a.end_line >= ? \
         ORDER BY c.created_at DESC",
    )
    .bind(file_path)
    .bind(end)
    .bind(start)
    .fetch_all(pool)
    .await?;

    let ranges: Vec<BlameRange> = rows
        .iter()
        .map(|r| BlameRange {
            start_line: r.get("start_line"),
            end_line: r.get("end_line"),
            checkpoint_id: r.get("checkpoint_id"),
            kind: r.get("kind"),
            agent_id: r.get("agent_id"),
        })
        .collect();

    // Last-writer-wins per line: walk ranges in creation order (already
    // newest-first) and claim each line for the first range that covers it.
    let mut owner: HashMap<i64, (&str, Option<&str>)> = HashMap::new();
    for range in &ranges {
        let lo = range.start_line.max(start);
        let hi = range.end_line.min(end);
        for line in lo..=hi {
            owner.entry(line).or_insert((range.kind.as_str(), range.agent_id.as_deref()));
        }
    }

    let total_lines = (end - start + 1).max(0);
    let human_lines = owner.values().filter(|(kind, _)| *kind == "human").count() as i64;
    let agent_lines = owner.values().filter(|(kind, _)| *kind == "agent").count() as i64;
    let mut agents: HashMap<String, i64> = HashMap::new();
    for (kind, agent_id) in owner.values() {
        if *kind == "agent" {
            let name = agent_id.unwrap_or("unknown").to_string();
            *agents.entry(name).or_insert(0) += 1;
        }
    }

    let summary = BlameSummary {
        total_lines,
        human_lines,
        human_pct: pct(human_lines, total_lines),
        agent_lines,
        agent_pct: pct(agent_lines, total_lines),
        agents,
    };

    Ok((ranges, summary))
}

fn pct(part: i64, total: i64) -> f64 {
    if total <= 0 {
        0.0
    } else {
        (part as f64 / total as f64) * 100.0
    }
}
