//! Database schema migrations.
//!
//! Forward-only, version-gated: `schema_version` holds a single integer and
//! each migration only runs if the stored version is below its own. Run via
//! `ec init` and also transparently by `connect`-adjacent callers that need
//! a guaranteed-fresh schema in tests.

use anyhow::Result;
use sqlx::SqlitePool;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: &[
            r#"
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                repo_path TEXT NOT NULL UNIQUE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'manual',
                started_at INTEGER NOT NULL,
                last_activity_at INTEGER NOT NULL,
                ended_at INTEGER,
                total_turns INTEGER NOT NULL DEFAULT 0,
                title TEXT,
                summary TEXT,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                FOREIGN KEY (project_id) REFERENCES projects(id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                turn_number INTEGER NOT NULL,
                user_message TEXT NOT NULL DEFAULT '',
                assistant_summary TEXT NOT NULL DEFAULT '',
                tools_used_json TEXT NOT NULL DEFAULT '[]',
                files_touched_json TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL DEFAULT 'in_progress',
                content_hash TEXT,
                created_at INTEGER NOT NULL,
                UNIQUE(session_id, turn_number),
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS turn_content (
                turn_id TEXT PRIMARY KEY,
                content_path TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                FOREIGN KEY (turn_id) REFERENCES turns(id) ON DELETE CASCADE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                commit_hash TEXT NOT NULL,
                branch TEXT,
                created_at INTEGER NOT NULL,
                diff_summary TEXT,
                files_snapshot_json TEXT,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                agent_type TEXT NOT NULL,
                display_name TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS attributions (
                id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                checkpoint_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                agent_id TEXT,
                confidence REAL,
                FOREIGN KEY (checkpoint_id) REFERENCES checkpoints(id) ON DELETE CASCADE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS futures_assessments (
                id TEXT PRIMARY KEY,
                verdict TEXT NOT NULL,
                impact_summary TEXT NOT NULL,
                roadmap_alignment TEXT NOT NULL,
                suggestion TEXT NOT NULL,
                feedback TEXT,
                feedback_reason TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_sessions_project_id ON sessions(project_id)",
            "CREATE INDEX IF NOT EXISTS idx_turns_session_id ON turns(session_id)",
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_session_id ON checkpoints(session_id)",
            "CREATE INDEX IF NOT EXISTS idx_attributions_file_path ON attributions(file_path)",
        ],
    },
    Migration {
        version: 2,
        name: "fts_indexes",
        sql: &[
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS fts_turns USING fts5(
                turn_id UNINDEXED,
                user_message,
                assistant_summary
            )
            "#,
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS fts_sessions USING fts5(
                session_id UNINDEXED,
                title,
                summary
            )
            "#,
            r#"
            CREATE TRIGGER IF NOT EXISTS turns_ai AFTER INSERT ON turns BEGIN
                INSERT INTO fts_turns(turn_id, user_message, assistant_summary)
                VALUES (new.id, new.user_message, new.assistant_summary);
            END
            "#,
            r#"
            CREATE TRIGGER IF NOT EXISTS turns_au AFTER UPDATE ON turns BEGIN
                UPDATE fts_turns SET user_message = new.user_message,
                                     assistant_summary = new.assistant_summary
                WHERE turn_id = new.id;
            END
            "#,
            r#"
            CREATE TRIGGER IF NOT EXISTS turns_ad AFTER DELETE ON turns BEGIN
                DELETE FROM fts_turns WHERE turn_id = old.id;
            END
            "#,
            r#"
            CREATE TRIGGER IF NOT EXISTS sessions_ai AFTER INSERT ON sessions BEGIN
                INSERT INTO fts_sessions(session_id, title, summary)
                VALUES (new.id, new.title, new.summary);
            END
            "#,
            r#"
            CREATE TRIGGER IF NOT EXISTS sessions_au AFTER UPDATE ON sessions BEGIN
                UPDATE fts_sessions SET title = new.title, summary = new.summary
                WHERE session_id = new.id;
            END
            "#,
            r#"
            CREATE TRIGGER IF NOT EXISTS sessions_ad AFTER DELETE ON sessions BEGIN
                DELETE FROM fts_sessions WHERE session_id = old.id;
            END
            "#,
        ],
    },
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .execute(pool)
        .await?;

    let current: Option<i64> = sqlx::query_scalar("SELECT version FROM schema_version LIMIT 1")
        .fetch_optional(pool)
        .await?;
    let mut current = current.unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        let mut tx = pool.begin().await?;
        for statement in migration.sql {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        current = migration.version;
        tracing::info!(version = migration.version, name = migration.name, "applied migration");
    }

    sqlx::query("DELETE FROM schema_version").execute(pool).await?;
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(current)
        .execute(pool)
        .await?;

    Ok(())
}
