//! Session/turn data model (§3, §4.4): CRUD and invariants for projects,
//! sessions, and their ordered turns, plus the supporting checkpoint,
//! attribution, and futures-assessment record shapes.
//!
//! Turn-number allocation is the one place genuine write contention can
//! happen (two hook processes racing to open the next turn in a session);
//! `create_turn` reads `MAX(turn_number)` and inserts inside the same
//! transaction, retrying on the unique-constraint violation a few times
//! per §5's allocation-and-retry rule.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::EcError;

const MAX_TURN_ALLOC_RETRIES: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub repo_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_id: String,
    pub kind: String,
    pub started_at: i64,
    pub last_activity_at: i64,
    pub ended_at: Option<i64>,
    pub total_turns: i64,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub metadata_json: String,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub session_id: String,
    pub turn_number: i64,
    pub user_message: String,
    pub assistant_summary: String,
    pub tools_used_json: String,
    pub files_touched_json: String,
    pub status: String,
    pub content_hash: Option<String>,
    pub created_at: i64,
}

impl Turn {
    pub fn tools_used(&self) -> Vec<String> {
        serde_json::from_str(&self.tools_used_json).unwrap_or_default()
    }

    pub fn files_touched(&self) -> Vec<String> {
        serde_json::from_str(&self.files_touched_json).unwrap_or_default()
    }

    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnContent {
    pub turn_id: String,
    pub content_path: String,
    pub size_bytes: i64,
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub session_id: String,
    pub commit_hash: String,
    pub branch: Option<String>,
    pub created_at: i64,
    pub diff_summary: Option<String>,
    pub files_snapshot_json: Option<String>,
    pub metadata_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribution {
    pub id: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub checkpoint_id: String,
    pub kind: String,
    pub agent_id: Option<String>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuturesAssessment {
    pub id: String,
    pub verdict: String,
    pub impact_summary: String,
    pub roadmap_alignment: String,
    pub suggestion: String,
    pub feedback: Option<String>,
    pub feedback_reason: Option<String>,
    pub created_at: i64,
}

fn now() -> i64 {
    Utc::now().timestamp()
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Session {
    Session {
        id: row.get("id"),
        project_id: row.get("project_id"),
        kind: row.get("kind"),
        started_at: row.get("started_at"),
        last_activity_at: row.get("last_activity_at"),
        ended_at: row.get("ended_at"),
        total_turns: row.get("total_turns"),
        title: row.get("title"),
        summary: row.get("summary"),
        metadata_json: row.get("metadata_json"),
    }
}

fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Turn {
    Turn {
        id: row.get("id"),
        session_id: row.get("session_id"),
        turn_number: row.get("turn_number"),
        user_message: row.get("user_message"),
        assistant_summary: row.get("assistant_summary"),
        tools_used_json: row.get("tools_used_json"),
        files_touched_json: row.get("files_touched_json"),
        status: row.get("status"),
        content_hash: row.get("content_hash"),
        created_at: row.get("created_at"),
    }
}

/// Register a project for a canonical repo path. Idempotent: a second call
/// for the same path returns the existing row rather than erroring or
/// duplicating it.
pub async fn create_project(pool: &SqlitePool, repo_path: &str, name: Option<&str>) -> Result<Project> {
    if let Some(existing) = get_project_by_path(pool, repo_path).await? {
        return Ok(existing);
    }

    let id = Uuid::new_v4().to_string();
    let default_name = std::path::Path::new(repo_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| repo_path.to_string());
    let name = name.unwrap_or(&default_name);

    sqlx::query("INSERT INTO projects (id, name, repo_path) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(repo_path)
        .execute(pool)
        .await?;

    Ok(Project {
        id,
        name: name.to_string(),
        repo_path: repo_path.to_string(),
    })
}

pub async fn get_project_by_path(pool: &SqlitePool, repo_path: &str) -> Result<Option<Project>> {
    let row = sqlx::query("SELECT id, name, repo_path FROM projects WHERE repo_path = ?")
        .bind(repo_path)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| Project {
        id: r.get("id"),
        name: r.get("name"),
        repo_path: r.get("repo_path"),
    }))
}

/// Create-or-return a session by id. Idempotent re-invocation of
/// SessionStart must be a no-op against an already-existing session.
pub async fn create_session(
    pool: &SqlitePool,
    project_id: &str,
    session_id: Option<&str>,
    kind: Option<&str>,
    metadata_json: Option<&str>,
) -> Result<Session> {
    let id = session_id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Some(existing) = get_session(pool, &id).await? {
        return Ok(existing);
    }

    let t = now();
    let kind = kind.unwrap_or("manual");
    let metadata = metadata_json.unwrap_or("{}");

    sqlx::query(
        "INSERT INTO sessions (id, project_id, kind, started_at, last_activity_at, total_turns, metadata_json) \
         VALUES (?, ?, ?, ?, ?, 0, ?)",
    )
    .bind(&id)
    .bind(project_id)
    .bind(kind)
    .bind(t)
    .bind(t)
    .bind(metadata)
    .execute(pool)
    .await?;

    get_session(pool, &id)
        .await?
        .context("session vanished immediately after insert")
}

pub async fn get_session(pool: &SqlitePool, id: &str) -> Result<Option<Session>> {
    let row = sqlx::query(
        "SELECT id, project_id, kind, started_at, last_activity_at, ended_at, total_turns, title, summary, metadata_json \
         FROM sessions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_session))
}

pub async fn list_sessions(pool: &SqlitePool, project_id: &str) -> Result<Vec<Session>> {
    let rows = sqlx::query(
        "SELECT id, project_id, kind, started_at, last_activity_at, ended_at, total_turns, title, summary, metadata_json \
         FROM sessions WHERE project_id = ? ORDER BY started_at DESC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_session).collect())
}

/// The session with `ended_at IS NULL` that started most recently, per §3's
/// definition of "active".
pub async fn get_current_session(pool: &SqlitePool, project_id: &str) -> Result<Option<Session>> {
    let row = sqlx::query(
        "SELECT id, project_id, kind, started_at, last_activity_at, ended_at, total_turns, title, summary, metadata_json \
         FROM sessions WHERE project_id = ? AND ended_at IS NULL ORDER BY started_at DESC LIMIT 1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_session))
}

pub async fn touch_session(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("UPDATE sessions SET last_activity_at = ? WHERE id = ?")
        .bind(now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn end_session(pool: &SqlitePool, id: &str) -> Result<()> {
    sqlx::query("UPDATE sessions SET ended_at = ? WHERE id = ? AND ended_at IS NULL")
        .bind(now())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_session_summary(
    pool: &SqlitePool,
    id: &str,
    title: Option<&str>,
    summary: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE sessions SET title = COALESCE(?, title), summary = COALESCE(?, summary) WHERE id = ?")
        .bind(title)
        .bind(summary)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Open a new in-progress turn. If `turn_number` isn't supplied, it is
/// allocated as `MAX(turn_number) + 1` within the same transaction that
/// inserts the row, retrying on the unique-constraint race per §5.
pub async fn create_turn(pool: &SqlitePool, session_id: &str, user_message: &str) -> Result<Turn> {
    let mut attempts = 0;
    loop {
        let mut tx = pool.begin().await?;
        let next_number: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(turn_number), 0) + 1 FROM turns WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&mut *tx)
                .await?;

        let id = Uuid::new_v4().to_string();
        let result = sqlx::query(
            "INSERT INTO turns (id, session_id, turn_number, user_message, status, created_at) \
             VALUES (?, ?, ?, ?, 'in_progress', ?)",
        )
        .bind(&id)
        .bind(session_id)
        .bind(next_number)
        .bind(user_message)
        .bind(now())
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {
                sqlx::query("UPDATE sessions SET total_turns = total_turns + 1, last_activity_at = ? WHERE id = ?")
                    .bind(now())
                    .bind(session_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                return get_turn(pool, &id)
                    .await?
                    .context("turn vanished immediately after insert");
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await.ok();
                attempts += 1;
                if attempts >= MAX_TURN_ALLOC_RETRIES {
                    anyhow::bail!("turn_number allocation raced {attempts} times for session {session_id}");
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// The turn currently `in_progress` for a session, if any. A session has at
/// most one at a time by construction (Stop finalises before the next
/// UserPromptSubmit opens a new one).
pub async fn get_active_turn(pool: &SqlitePool, session_id: &str) -> Result<Option<Turn>> {
    let row = sqlx::query(
        "SELECT id, session_id, turn_number, user_message, assistant_summary, tools_used_json, \
         files_touched_json, status, content_hash, created_at FROM turns \
         WHERE session_id = ? AND status = 'in_progress' ORDER BY turn_number DESC LIMIT 1",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_turn))
}

pub async fn get_turn(pool: &SqlitePool, id: &str) -> Result<Option<Turn>> {
    let row = sqlx::query(
        "SELECT id, session_id, turn_number, user_message, assistant_summary, tools_used_json, \
         files_touched_json, status, content_hash, created_at FROM turns WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_turn))
}

pub async fn list_turns(pool: &SqlitePool, session_id: &str) -> Result<Vec<Turn>> {
    let rows = sqlx::query(
        "SELECT id, session_id, turn_number, user_message, assistant_summary, tools_used_json, \
         files_touched_json, status, content_hash, created_at FROM turns \
         WHERE session_id = ? ORDER BY turn_number ASC",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_turn).collect())
}

/// Overwrite the pending prompt of an in-progress turn — repeated
/// UserPromptSubmit within the same active turn replaces rather than
/// appends, per §4.5's idempotence rule.
pub async fn overwrite_user_message(pool: &SqlitePool, turn_id: &str, user_message: &str) -> Result<()> {
    sqlx::query("UPDATE turns SET user_message = ? WHERE id = ? AND status = 'in_progress'")
        .bind(user_message)
        .bind(turn_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Append a tool name / file path to the current turn's JSON list columns,
/// deduplicating. No-op if the turn is already completed (PostToolUse
/// arriving after Stop has nothing to attach to).
pub async fn append_tool_used(pool: &SqlitePool, turn_id: &str, tool_name: &str) -> Result<()> {
    append_unique(pool, turn_id, "tools_used_json", tool_name).await
}

pub async fn append_file_touched(pool: &SqlitePool, turn_id: &str, file_path: &str) -> Result<()> {
    append_unique(pool, turn_id, "files_touched_json", file_path).await
}

async fn append_unique(pool: &SqlitePool, turn_id: &str, column: &str, value: &str) -> Result<()> {
    let query = format!("SELECT {column} FROM turns WHERE id = ? AND status = 'in_progress'");
    let current: Option<String> = sqlx::query_scalar(&query).bind(turn_id).fetch_optional(pool).await?;
    let Some(current) = current else { return Ok(()) };

    let mut list: Vec<String> = serde_json::from_str(&current).unwrap_or_default();
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
        let encoded = serde_json::to_string(&list)?;
        let update = format!("UPDATE turns SET {column} = ? WHERE id = ?");
        sqlx::query(&update).bind(encoded).bind(turn_id).execute(pool).await?;
    }
    Ok(())
}

/// Finalise an in-progress turn. Re-finalising an already-completed turn is
/// a no-op (terminal state, per the §4.10 state machine).
pub async fn finalize_turn(
    pool: &SqlitePool,
    turn_id: &str,
    assistant_summary: &str,
    content_hash: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE turns SET assistant_summary = ?, status = 'completed', content_hash = ? \
         WHERE id = ? AND status = 'in_progress'",
    )
    .bind(assistant_summary)
    .bind(content_hash)
    .bind(turn_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_turn_content(pool: &SqlitePool, content: &TurnContent) -> Result<()> {
    sqlx::query(
        "INSERT INTO turn_content (turn_id, content_path, size_bytes, content_hash) VALUES (?, ?, ?, ?) \
         ON CONFLICT(turn_id) DO UPDATE SET content_path = excluded.content_path, \
         size_bytes = excluded.size_bytes, content_hash = excluded.content_hash",
    )
    .bind(&content.turn_id)
    .bind(&content.content_path)
    .bind(content.size_bytes)
    .bind(&content.content_hash)
    .execute(pool)
    .await?;
    Ok(())
}

const VALID_VERDICTS: &[&str] = &["expand", "narrow", "neutral"];
const VALID_FEEDBACK: &[&str] = &["agree", "disagree"];

fn row_to_assessment(row: &sqlx::sqlite::SqliteRow) -> FuturesAssessment {
    FuturesAssessment {
        id: row.get("id"),
        verdict: row.get("verdict"),
        impact_summary: row.get("impact_summary"),
        roadmap_alignment: row.get("roadmap_alignment"),
        suggestion: row.get("suggestion"),
        feedback: row.get("feedback"),
        feedback_reason: row.get("feedback_reason"),
        created_at: row.get("created_at"),
    }
}

/// Store a `FuturesAssessment`. The verdict that produces one is an external
/// (LLM) collaborator out of scope here — this just persists whatever verdict
/// the caller already decided on.
pub async fn record_assessment(
    pool: &SqlitePool,
    verdict: &str,
    impact_summary: &str,
    roadmap_alignment: &str,
    suggestion: &str,
) -> Result<FuturesAssessment> {
    if !VALID_VERDICTS.contains(&verdict) {
        return Err(EcError::InvalidVerdict(verdict.to_string()).into());
    }

    let id = Uuid::new_v4().to_string();
    let created_at = now();
    sqlx::query(
        "INSERT INTO futures_assessments (id, verdict, impact_summary, roadmap_alignment, suggestion, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(verdict)
    .bind(impact_summary)
    .bind(roadmap_alignment)
    .bind(suggestion)
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok(FuturesAssessment {
        id,
        verdict: verdict.to_string(),
        impact_summary: impact_summary.to_string(),
        roadmap_alignment: roadmap_alignment.to_string(),
        suggestion: suggestion.to_string(),
        feedback: None,
        feedback_reason: None,
        created_at,
    })
}

pub async fn get_assessment(pool: &SqlitePool, id: &str) -> Result<Option<FuturesAssessment>> {
    let row = sqlx::query(
        "SELECT id, verdict, impact_summary, roadmap_alignment, suggestion, feedback, feedback_reason, created_at \
         FROM futures_assessments WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(row_to_assessment))
}

/// Record agree/disagree feedback against an existing assessment.
pub async fn set_feedback(
    pool: &SqlitePool,
    id: &str,
    feedback: &str,
    reason: Option<&str>,
) -> Result<()> {
    if !VALID_FEEDBACK.contains(&feedback) {
        return Err(EcError::InvalidFeedback(feedback.to_string()).into());
    }
    sqlx::query("UPDATE futures_assessments SET feedback = ?, feedback_reason = ? WHERE id = ?")
        .bind(feedback)
        .bind(reason)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Resolve a turn/session/checkpoint id prefix to exactly one row, ordering
/// candidates by id length so the shortest unambiguous match wins ties with
/// longer ids that merely start the same way. Fails deterministically when
/// more than one row matches, per §9's open question.
pub async fn resolve_prefix(pool: &SqlitePool, table: &str, prefix: &str) -> Result<String> {
    let query = format!("SELECT id FROM {table} WHERE id LIKE ?||'%' ORDER BY length(id) ASC");
    let rows: Vec<String> = sqlx::query_scalar(&query).bind(prefix).fetch_all(pool).await?;

    match rows.len() {
        0 => Err(EcError::CheckpointNotFound(prefix.to_string()).into()),
        1 => Ok(rows.into_iter().next().unwrap()),
        _ => Err(EcError::AmbiguousPrefix(prefix.to_string()).into()),
    }
}
