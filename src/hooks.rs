//! Capture pipeline (§4.5): dispatches hook events from the agent host into
//! model mutations, applying the content filter and enforcing idempotence.
//!
//! Every handler is defensive by construction: [`dispatch`] never returns an
//! `Err` for a recognized hook type, no matter what goes wrong internally —
//! failures are logged via `tracing::error!` and swallowed, so the host
//! process always sees exit 0 for a well-formed (if unlucky) invocation. An
//! envelope with a `hook_type` the dispatcher doesn't recognize is also a
//! no-op, exit 0 — the host's hook set is expected to grow over time and an
//! unfamiliar event is not this process's problem. Only a payload that
//! isn't even a structurally valid envelope (unparseable JSON, or missing/
//! non-string `hook_type`) surfaces as
//! [`crate::error::EcError::HookMalformedPayload`], which `main.rs` maps to
//! exit code 2, as does a recognized `hook_type` whose fields don't match
//! its expected shape.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::error::EcError;
use crate::{codex_ingest, db, filter, git_probe, model, transcript};

#[derive(Debug, Deserialize)]
#[serde(tag = "hook_type")]
pub enum HookPayload {
    #[serde(rename = "SessionStart")]
    SessionStart { session_id: String, cwd: String, #[serde(default)] source: Option<String> },
    #[serde(rename = "UserPromptSubmit")]
    UserPromptSubmit { session_id: String, cwd: String, prompt: String },
    #[serde(rename = "PostToolUse")]
    PostToolUse {
        session_id: String,
        cwd: String,
        tool_name: String,
        #[serde(default)]
        tool_input: Value,
    },
    #[serde(rename = "Stop")]
    Stop { session_id: String, cwd: String, transcript_path: String },
    #[serde(rename = "SessionEnd")]
    SessionEnd { session_id: String, cwd: String },
    #[serde(rename = "PostCommit")]
    PostCommit { cwd: String },
    #[serde(rename = "CodexNotify")]
    CodexNotify(codex_ingest::CodexNotifyPayload),
}

const KNOWN_HOOK_TYPES: &[&str] = &[
    "SessionStart",
    "UserPromptSubmit",
    "PostToolUse",
    "Stop",
    "SessionEnd",
    "PostCommit",
    "CodexNotify",
];

/// Parse raw hook JSON. `Ok(None)` means the envelope was structurally
/// valid but carried a `hook_type` this build doesn't recognize — a no-op,
/// not an error (spec §6: "unknown hook types return exit 0 and no-op").
/// `Err` is reserved for invocations that are actually malformed: unparseable
/// JSON, a missing/non-string `hook_type`, or a recognized `hook_type` whose
/// remaining fields don't match its expected shape.
pub fn parse_payload(raw: &str) -> Result<Option<HookPayload>> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| EcError::HookMalformedPayload(e.to_string()))?;

    let hook_type = value
        .get("hook_type")
        .and_then(Value::as_str)
        .ok_or_else(|| EcError::HookMalformedPayload("missing or non-string hook_type".to_string()))?;

    if !KNOWN_HOOK_TYPES.contains(&hook_type) {
        return Ok(None);
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| EcError::HookMalformedPayload(e.to_string()).into())
}

/// Run a parsed hook event to completion, never propagating an internal
/// error — only logging it. Returns `Ok(())` unconditionally for a
/// recognized event, and also for `None` (an unrecognized `hook_type`).
pub async fn dispatch(repo_root: &Path, config: &Config, payload: Option<HookPayload>) -> Result<()> {
    let Some(payload) = payload else {
        return Ok(());
    };
    if let Err(err) = dispatch_inner(repo_root, config, payload).await {
        tracing::error!(error = %err, "hook handler failed internally");
    }
    Ok(())
}

async fn dispatch_inner(repo_root: &Path, config: &Config, payload: HookPayload) -> Result<()> {
    let pool = db::connect(repo_root).await?;
    let repo_path = repo_root.to_string_lossy().to_string();

    match payload {
        HookPayload::SessionStart { session_id, cwd: _, source } => {
            let project = model::create_project(&pool, &repo_path, None).await?;
            model::create_session(&pool, &project.id, Some(&session_id), source.as_deref(), None).await?;
        }

        HookPayload::UserPromptSubmit { session_id, cwd: _, prompt } => {
            if !auto_capture_allowed(&pool, &session_id, config).await? {
                return Ok(());
            }
            if filter::should_skip_turn(&prompt, config) {
                return Ok(());
            }
            let redacted = filter::redact_content(&prompt, config);

            let Some(session) = model::get_session(&pool, &session_id).await? else {
                return Ok(());
            };
            match model::get_active_turn(&pool, &session.id).await? {
                Some(active) => model::overwrite_user_message(&pool, &active.id, &redacted).await?,
                None => {
                    model::create_turn(&pool, &session.id, &redacted).await?;
                }
            }
        }

        HookPayload::PostToolUse { session_id, cwd: _, tool_name, tool_input } => {
            if !auto_capture_allowed(&pool, &session_id, config).await? {
                return Ok(());
            }
            if filter::should_skip_tool(&tool_name, config) {
                return Ok(());
            }
            let Some(active) = model::get_active_turn(&pool, &session_id).await? else {
                return Ok(());
            };
            model::append_tool_used(&pool, &active.id, &tool_name).await?;

            if let Some(file_path) = tool_input.get("file_path").and_then(Value::as_str) {
                if !filter::should_skip_file(file_path, config) {
                    model::append_file_touched(&pool, &active.id, file_path).await?;
                }
            }
        }

        HookPayload::Stop { session_id, cwd: _, transcript_path } => {
            if !auto_capture_allowed(&pool, &session_id, config).await? {
                return Ok(());
            }
            let Some(active) = model::get_active_turn(&pool, &session_id).await? else {
                return Ok(());
            };

            let raw = std::fs::read_to_string(&transcript_path).unwrap_or_default();
            let parsed = transcript::parse(&raw);
            let assistant_summary = parsed.last_assistant.unwrap_or_default();

            let content_dir = db::content_dir(repo_root).join(&session_id);
            std::fs::create_dir_all(&content_dir)?;
            let blob_path = content_dir.join(format!("{}.jsonl", active.id));
            std::fs::write(&blob_path, &raw)?;

            let mut hasher = Sha256::new();
            hasher.update(raw.as_bytes());
            let content_hash: String = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();

            model::finalize_turn(&pool, &active.id, &assistant_summary, Some(&content_hash)).await?;
            model::insert_turn_content(
                &pool,
                &model::TurnContent {
                    turn_id: active.id.clone(),
                    content_path: blob_path.to_string_lossy().to_string(),
                    size_bytes: raw.len() as i64,
                    content_hash,
                },
            )
            .await?;
        }

        HookPayload::SessionEnd { session_id, cwd: _ } => {
            model::end_session(&pool, &session_id).await?;
        }

        HookPayload::PostCommit { cwd: _ } => {
            let project = model::create_project(&pool, &repo_path, None).await?;
            let Some(session) = model::get_current_session(&pool, &project.id).await? else {
                return Ok(());
            };
            let Some(commit) = git_probe::current_commit(repo_root).await else {
                return Ok(());
            };
            let branch = git_probe::current_branch(repo_root).await;

            let prior = crate::attribution::latest_checkpoint(&pool, &session.id).await?;
            let diff_summary = git_probe::diff_stat(repo_root, prior.as_ref().map(|c| c.commit_hash.as_str())).await;

            crate::attribution::create_checkpoint(
                &pool,
                &session.id,
                &commit,
                branch.as_deref(),
                diff_summary.as_deref(),
                "post_commit",
            )
            .await?;
        }

        HookPayload::CodexNotify(notify) => {
            codex_ingest::ingest_codex_notify(&pool, &repo_path, &notify).await?;
        }
    }

    Ok(())
}

/// `capture.auto_capture = false` (config-level) or `capture_disabled =
/// true` in a session's metadata bag suppresses all mutations except
/// SessionEnd, per §4.5's global rules.
async fn auto_capture_allowed(pool: &SqlitePool, session_id: &str, config: &Config) -> Result<bool> {
    if !config.capture.auto_capture {
        return Ok(false);
    }
    let Some(session) = model::get_session(pool, session_id).await? else {
        return Ok(true);
    };
    let metadata: Value = serde_json::from_str(&session.metadata_json).unwrap_or_default();
    Ok(!metadata.get("capture_disabled").and_then(Value::as_bool).unwrap_or(false))
}

/// Resolve the repo root from a hook's `cwd`, walking up to find `.git`.
/// Falls back to `cwd` itself if no `.git` is found (callers that already
/// know the root skip this).
pub fn resolve_repo_root(cwd: &str) -> PathBuf {
    let mut dir = PathBuf::from(cwd);
    loop {
        if dir.join(".git").exists() {
            return dir;
        }
        if !dir.pop() {
            return PathBuf::from(cwd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;

    async fn setup_repo() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let pool = db::connect(dir.path()).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn full_turn_lifecycle_matches_single_turn_scenario() {
        let (dir, _pool) = setup_repo().await;
        let config = Config::default();

        dispatch(
            dir.path(),
            &config,
            Some(HookPayload::SessionStart { session_id: "s1".into(), cwd: dir.path().display().to_string(), source: None }),
        )
        .await
        .unwrap();

        dispatch(
            dir.path(),
            &config,
            Some(HookPayload::UserPromptSubmit {
                session_id: "s1".into(),
                cwd: dir.path().display().to_string(),
                prompt: "Fix auth bug".into(),
            }),
        )
        .await
        .unwrap();

        dispatch(
            dir.path(),
            &config,
            Some(HookPayload::PostToolUse {
                session_id: "s1".into(),
                cwd: dir.path().display().to_string(),
                tool_name: "Edit".into(),
                tool_input: serde_json::json!({"file_path": "src/auth.py"}),
            }),
        )
        .await
        .unwrap();

        let transcript_path = dir.path().join("transcript.jsonl");
        std::fs::write(
            &transcript_path,
            "{\"role\":\"user\",\"content\":\"Fix auth bug\"}\n{\"role\":\"assistant\",\"content\":\"Fixed it\"}\n",
        )
        .unwrap();

        dispatch(
            dir.path(),
            &config,
            Some(HookPayload::Stop {
                session_id: "s1".into(),
                cwd: dir.path().display().to_string(),
                transcript_path: transcript_path.display().to_string(),
            }),
        )
        .await
        .unwrap();

        let pool = db::connect(dir.path()).await.unwrap();
        let session = model::get_session(&pool, "s1").await.unwrap().unwrap();
        let turns = model::list_turns(&pool, &session.id).await.unwrap();
        assert_eq!(turns.len(), 1);
        let turn = &turns[0];
        assert_eq!(turn.turn_number, 1);
        assert!(turn.is_completed());
        assert_eq!(turn.tools_used(), vec!["Edit"]);
        assert_eq!(turn.files_touched(), vec!["src/auth.py"]);
        assert!(turn.assistant_summary.contains("Fixed it"));
        assert!(turn.content_hash.is_some());
        let blob_path = db::content_dir(dir.path()).join("s1").join(format!("{}.jsonl", turn.id));
        assert!(blob_path.exists());
    }

    #[tokio::test]
    async fn repeated_prompt_submit_overwrites_not_duplicates() {
        let (dir, _pool) = setup_repo().await;
        let config = Config::default();

        dispatch(
            dir.path(),
            &config,
            Some(HookPayload::SessionStart { session_id: "s1".into(), cwd: dir.path().display().to_string(), source: None }),
        )
        .await
        .unwrap();

        for prompt in ["first draft", "final draft"] {
            dispatch(
                dir.path(),
                &config,
                Some(HookPayload::UserPromptSubmit {
                    session_id: "s1".into(),
                    cwd: dir.path().display().to_string(),
                    prompt: prompt.into(),
                }),
            )
            .await
            .unwrap();
        }

        let pool = db::connect(dir.path()).await.unwrap();
        let turns = model::list_turns(&pool, "s1").await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].user_message, "final draft");
    }

    #[tokio::test]
    async fn skip_turn_suppresses_prompt_capture() {
        let (dir, _pool) = setup_repo().await;
        let mut config = Config::default();
        config.capture.exclusions.enabled = true;
        config.capture.exclusions.content_patterns = vec![r"password\s*=".to_string()];

        dispatch(
            dir.path(),
            &config,
            Some(HookPayload::SessionStart { session_id: "s1".into(), cwd: dir.path().display().to_string(), source: None }),
        )
        .await
        .unwrap();
        dispatch(
            dir.path(),
            &config,
            Some(HookPayload::UserPromptSubmit {
                session_id: "s1".into(),
                cwd: dir.path().display().to_string(),
                prompt: "password=secret".into(),
            }),
        )
        .await
        .unwrap();

        let pool = db::connect(dir.path()).await.unwrap();
        let turns = model::list_turns(&pool, "s1").await.unwrap();
        assert!(turns.is_empty());
    }

    #[test]
    fn malformed_payload_is_rejected_before_dispatch() {
        let err = parse_payload("{not json").unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn missing_hook_type_is_rejected() {
        let err = parse_payload(r#"{"session_id":"s1"}"#).unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn unknown_hook_type_is_a_noop() {
        let parsed = parse_payload(r#"{"hook_type":"DoesNotExist"}"#).unwrap();
        assert!(parsed.is_none());
    }

    #[tokio::test]
    async fn unknown_hook_type_dispatches_as_a_noop() {
        let (dir, _pool) = setup_repo().await;
        let config = Config::default();
        let parsed = parse_payload(r#"{"hook_type":"DoesNotExist"}"#).unwrap();
        dispatch(dir.path(), &config, parsed).await.unwrap();
    }

    #[test]
    fn recognized_hook_type_with_wrong_shape_is_rejected() {
        let err = parse_payload(r#"{"hook_type":"SessionStart"}"#).unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }
}
