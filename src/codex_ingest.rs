//! Codex-style ingest (§4.4): when a notify event references a rollout file
//! under a `codex_home` directory, locate it by session-id substring match,
//! read its `session_meta`/`response_item` records, and materialise a
//! session + one completed turn from the parsed user/assistant text.
//!
//! Re-ingesting the same event must not duplicate turns — dedup is by
//! `(session_id, derived content hash)`, checked before any turn is
//! created.

use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use walkdir::WalkDir;

use crate::model;
use crate::transcript::ParsedTranscript;

#[derive(Debug, Deserialize)]
pub struct CodexNotifyPayload {
    pub thread_id: String,
    pub cwd: String,
    pub codex_home: String,
}

#[derive(Debug, Deserialize)]
struct RolloutRecord {
    #[serde(rename = "type")]
    record_type: String,
    payload: Value,
}

/// Find the rollout file for `session_id` under `codex_home/sessions/**`.
fn find_rollout_file(codex_home: &Path, session_id: &str) -> Option<std::path::PathBuf> {
    let sessions_dir = codex_home.join("sessions");
    WalkDir::new(sessions_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .find(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.contains(session_id))
                .unwrap_or(false)
        })
        .map(|e| e.path().to_path_buf())
}

fn parse_rollout(contents: &str) -> ParsedTranscript {
    let mut result = ParsedTranscript::default();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<RolloutRecord>(line) else { continue };
        if record.record_type != "response_item" {
            continue;
        }
        if record.payload.get("type").and_then(Value::as_str) != Some("message") {
            continue;
        }
        let Some(role) = record.payload.get("role").and_then(Value::as_str) else { continue };
        let Some(blocks) = record.payload.get("content").and_then(Value::as_array) else { continue };

        let text: String = blocks
            .iter()
            .filter(|b| matches!(b.get("type").and_then(Value::as_str), Some("input_text") | Some("output_text") | Some("text")))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        if text.is_empty() {
            continue;
        }

        match role {
            "user" => result.last_user = Some(text),
            "assistant" => result.last_assistant = Some(text),
            _ => {}
        }
    }
    result
}

pub async fn ingest_codex_notify(pool: &SqlitePool, repo_path: &str, payload: &CodexNotifyPayload) -> Result<()> {
    let Some(rollout_path) = find_rollout_file(Path::new(&payload.codex_home), &payload.thread_id) else {
        anyhow::bail!("no rollout file found for session {}", payload.thread_id);
    };
    let contents = std::fs::read_to_string(&rollout_path)?;
    let parsed = parse_rollout(&contents);

    let project = model::create_project(pool, repo_path, None).await?;
    let session = model::create_session(pool, &project.id, Some(&payload.thread_id), Some("codex"), None).await?;

    let user_message = parsed.last_user.unwrap_or_default();
    let assistant_summary = parsed.last_assistant.unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(user_message.as_bytes());
    hasher.update(assistant_summary.as_bytes());
    let content_hash = hex_digest(&hasher.finalize());

    let existing_turns = model::list_turns(pool, &session.id).await?;
    if existing_turns.iter().any(|t| t.content_hash.as_deref() == Some(content_hash.as_str())) {
        return Ok(());
    }

    let turn = model::create_turn(pool, &session.id, &user_message).await?;
    model::finalize_turn(pool, &turn.id, &assistant_summary, Some(&content_hash)).await?;

    let content_dir = crate::db::content_dir(Path::new(repo_path)).join(&session.id);
    std::fs::create_dir_all(&content_dir)?;
    let blob_path = content_dir.join(format!("{}.jsonl", turn.id));
    let blob_line = serde_json::json!({"role": "user", "content": user_message}).to_string()
        + "\n"
        + &serde_json::json!({"role": "assistant", "content": assistant_summary}).to_string()
        + "\n";
    std::fs::write(&blob_path, &blob_line)?;

    model::insert_turn_content(
        pool,
        &model::TurnContent {
            turn_id: turn.id.clone(),
            content_path: blob_path.to_string_lossy().to_string(),
            size_bytes: blob_line.len() as i64,
            content_hash,
        },
    )
    .await?;

    Ok(())
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
