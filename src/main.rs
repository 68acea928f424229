//! # EntireContext CLI
//!
//! Command-line surface for the capture-and-retrieval engine (§6). Commands
//! exit 0 on success, 1 on user error, 2 reserved for a hook invocation that
//! is actually malformed — not merely an unrecognized `hook_type`, which is
//! a no-op at exit 0 (see `hooks::parse_payload`).

mod attribution;
mod codex_ingest;
mod config;
mod db;
mod error;
mod filter;
mod git_probe;
mod hooks;
mod logging;
mod migrate;
mod model;
mod purge;
mod registry;
mod search;
mod sync;
mod transcript;

use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Parser, Subcommand};
use error::EcError;

#[derive(Parser)]
#[command(name = "ec", about = "EntireContext — capture and retrieval for AI-assisted coding sessions", version)]
struct Cli {
    /// Repo root to operate on. Defaults to the current directory.
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .entirecontext/, the per-repo DB, and a global registry entry.
    Init,
    /// Report init state, counts, active session.
    Status,
    /// Show or set a dotted config key.
    Config { key: Option<String>, value: Option<String> },
    /// Install hook entries in the host's settings file.
    Enable,
    /// Remove hook entries from the host's settings file.
    Disable,
    /// Self-check of hook installation.
    Doctor,
    /// Query sessions.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Retrieval.
    Search {
        query: String,
        #[arg(long, default_value = "regex")]
        mode: String,
        #[arg(short, long, default_value = "turn")]
        target: String,
        #[arg(long)]
        global: bool,
        #[arg(short, long)]
        repo_name: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Attribution.
    Blame {
        path: String,
        #[arg(short = 'L', long)]
        lines: Option<String>,
        #[arg(long)]
        summary: bool,
    },
    /// Inspect a checkpoint.
    Rewind {
        checkpoint: String,
        #[arg(long)]
        restore: bool,
    },
    /// List checkpoints.
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },
    /// Shadow-branch push with merge.
    Sync,
    /// Shadow-branch pull with merge.
    Pull,
    /// Deletion; default is dry-run.
    Purge {
        #[command(subcommand)]
        action: PurgeAction,
    },
    /// Show the global registry.
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },
    /// Rebuild FTS indexes.
    Index,
    /// Roadmap-impact assessments (verdicts are supplied, not generated).
    Futures {
        #[command(subcommand)]
        action: FuturesAction,
    },
    /// Entry points invoked by the agent host's hook mechanism.
    Hook {
        #[command(subcommand)]
        action: HookAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    List {
        #[arg(long)]
        global: bool,
    },
    Show {
        id: String,
    },
    Current {
        #[arg(long)]
        global: bool,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    List,
}

#[derive(Subcommand)]
enum PurgeAction {
    Turn { ids: Vec<String>, #[arg(long)] execute: bool, #[arg(long)] force: bool },
    Session { id: String, #[arg(long)] execute: bool, #[arg(long)] force: bool },
    Match { pattern: String, #[arg(long)] execute: bool, #[arg(long)] force: bool },
}

#[derive(Subcommand)]
enum RepoAction {
    List,
}

#[derive(Subcommand)]
enum FuturesAction {
    Record {
        verdict: String,
        impact_summary: String,
        roadmap_alignment: String,
        suggestion: String,
    },
    Show {
        id: String,
    },
    Feedback {
        id: String,
        feedback: String,
        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
enum HookAction {
    Handle {
        #[arg(long = "type")]
        hook_type: Option<String>,
    },
    CodexNotify {
        payload: Option<String>,
    },
}

fn repo_root(cli_repo: Option<&Path>) -> anyhow::Result<PathBuf> {
    let cwd = cli_repo.map(Path::to_path_buf).unwrap_or(std::env::current_dir()?);
    let mut dir = cwd.clone();
    loop {
        if dir.join(".git").exists() {
            return Ok(dir);
        }
        if !dir.pop() {
            anyhow::bail!(EcError::NotInGitRepo);
        }
    }
}

fn require_initialized(repo_root: &Path) -> anyhow::Result<()> {
    if !db::local_db_path(repo_root).exists() {
        anyhow::bail!(EcError::NotInitialized);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            eprintln!("error: {err}");
            let code = err.downcast_ref::<EcError>().map(EcError::exit_code).unwrap_or(1);
            std::process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Hook { action } => return run_hook(cli.repo.as_deref(), action).await,
        _ => {}
    }

    let root = repo_root(cli.repo.as_deref())?;
    let _log_guard = logging::init(&root);
    let config = config::load_config(&root)?;

    match cli.command {
        Commands::Init => cmd_init(&root).await,
        Commands::Status => cmd_status(&root).await,
        Commands::Config { key, value } => cmd_config(&root, key, value).await,
        Commands::Enable => cmd_enable(&root),
        Commands::Disable => cmd_disable(&root),
        Commands::Doctor => cmd_doctor(&root).await,
        Commands::Session { action } => cmd_session(&root, action).await,
        Commands::Search { query, mode, target, global, repo_name, limit } => {
            cmd_search(&root, &query, &mode, &target, global, repo_name, limit).await
        }
        Commands::Blame { path, lines, summary } => cmd_blame(&root, &path, lines, summary).await,
        Commands::Rewind { checkpoint, restore } => cmd_rewind(&root, &checkpoint, restore).await,
        Commands::Checkpoint { action: CheckpointAction::List } => cmd_checkpoint_list(&root).await,
        Commands::Sync => cmd_sync(&root, &config).await,
        Commands::Pull => cmd_pull(&root, &config).await,
        Commands::Purge { action } => cmd_purge(&root, action).await,
        Commands::Repo { action: RepoAction::List } => cmd_repo_list().await,
        Commands::Index => cmd_index(&root).await,
        Commands::Futures { action } => cmd_futures(&root, action).await,
        Commands::Hook { .. } => unreachable!("handled above"),
    }
}

async fn cmd_init(root: &Path) -> anyhow::Result<()> {
    let pool = db::connect(root).await?;
    migrate::run_migrations(&pool).await?;
    let project = model::create_project(&pool, &root.to_string_lossy(), None).await?;

    let registry = registry::connect_global().await?;
    registry::register_repo(
        &registry,
        &root.to_string_lossy(),
        &project.name,
        &db::local_db_path(root).to_string_lossy(),
    )
    .await?;

    println!("Initialized EntireContext in {}", root.display());
    Ok(())
}

async fn cmd_status(root: &Path) -> anyhow::Result<()> {
    if !db::local_db_path(root).exists() {
        println!("not initialized");
        return Ok(());
    }
    let pool = db::connect(root).await?;
    let project = model::create_project(&pool, &root.to_string_lossy(), None).await?;
    let sessions = model::list_sessions(&pool, &project.id).await?;
    let active = model::get_current_session(&pool, &project.id).await?;

    println!("project: {}", project.name);
    println!("sessions: {}", sessions.len());
    match active {
        Some(s) => println!("active session: {} ({} turns)", s.id, s.total_turns),
        None => println!("active session: none"),
    }
    Ok(())
}

async fn cmd_config(root: &Path, key: Option<String>, value: Option<String>) -> anyhow::Result<()> {
    let mut cfg = config::load_config(root)?;
    match (key, value) {
        (None, _) => {
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
        (Some(key), None) => match config::get_key(&cfg, &key) {
            Some(v) => println!("{v}"),
            None => println!("(unset)"),
        },
        (Some(key), Some(value)) => {
            config::set_key(&mut cfg, &key, &value)?;
            config::save_config(root, &cfg)?;
            println!("{key} = {value}");
        }
    }
    Ok(())
}

const HOOK_EVENTS: &[&str] = &["SessionStart", "UserPromptSubmit", "PostToolUse", "Stop", "SessionEnd"];

fn settings_path(root: &Path) -> PathBuf {
    root.join(".claude").join("settings.json")
}

fn cmd_enable(root: &Path) -> anyhow::Result<()> {
    let path = settings_path(root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut settings: serde_json::Value = if path.exists() {
        serde_json::from_str(&std::fs::read_to_string(&path)?)?
    } else {
        serde_json::json!({})
    };

    let hooks = settings.as_object_mut().unwrap().entry("hooks").or_insert_with(|| serde_json::json!({}));
    for event in HOOK_EVENTS {
        hooks
            .as_object_mut()
            .unwrap()
            .insert(event.to_string(), serde_json::json!([{"hooks": [{"type": "command", "command": "ec hook handle"}]}]));
    }

    std::fs::write(&path, serde_json::to_string_pretty(&settings)?)?;
    println!("Installed hooks in {}", path.display());
    Ok(())
}

fn cmd_disable(root: &Path) -> anyhow::Result<()> {
    let path = settings_path(root);
    if !path.exists() {
        println!("no hooks installed");
        return Ok(());
    }
    let mut settings: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    if let Some(hooks) = settings.get_mut("hooks").and_then(|h| h.as_object_mut()) {
        for event in HOOK_EVENTS {
            hooks.remove(*event);
        }
    }
    std::fs::write(&path, serde_json::to_string_pretty(&settings)?)?;
    println!("Removed hooks from {}", path.display());
    Ok(())
}

async fn cmd_doctor(root: &Path) -> anyhow::Result<()> {
    let initialized = db::local_db_path(root).exists();
    let in_git_repo = git_probe::is_git_repo(root).await;
    let hooks_installed = settings_path(root).exists()
        && settings_path(root)
            .to_str()
            .map(|_| std::fs::read_to_string(settings_path(root)).map(|s| s.contains("ec hook handle")).unwrap_or(false))
            .unwrap_or(false);

    println!("git repo: {}", if in_git_repo { "ok" } else { "MISSING" });
    println!("initialized: {}", if initialized { "ok" } else { "MISSING (run `ec init`)" });
    println!("hooks installed: {}", if hooks_installed { "ok" } else { "MISSING (run `ec enable`)" });
    Ok(())
}

async fn cmd_session(root: &Path, action: SessionAction) -> anyhow::Result<()> {
    require_initialized(root)?;
    let pool = db::connect(root).await?;
    let project = model::create_project(&pool, &root.to_string_lossy(), None).await?;

    match action {
        SessionAction::List { global } => {
            if global {
                let registry = registry::connect_global().await?;
                let sessions = registry::cross_repo_sessions(&registry, None).await?;
                for s in sessions {
                    println!("{} [{}] {} turns ({})", s.session.id, s.repo_name, s.session.total_turns, s.session.kind);
                }
            } else {
                for s in model::list_sessions(&pool, &project.id).await? {
                    println!("{} {} turns ({})", s.id, s.total_turns, s.kind);
                }
            }
        }
        SessionAction::Show { id } => {
            let resolved = model::resolve_prefix(&pool, "sessions", &id).await?;
            let session = model::get_session(&pool, &resolved).await?.context_not_found(&id)?;
            let turns = model::list_turns(&pool, &session.id).await?;
            println!("{} ({} turns, kind={})", session.id, session.total_turns, session.kind);
            for t in turns {
                println!("  #{} {} -> {}", t.turn_number, truncate(&t.user_message), truncate(&t.assistant_summary));
            }
        }
        SessionAction::Current { global } => {
            if global {
                let registry = registry::connect_global().await?;
                let sessions = registry::cross_repo_sessions(&registry, None).await?;
                for s in sessions.into_iter().filter(|s| s.session.is_active()) {
                    println!("{} [{}]", s.session.id, s.repo_name);
                }
            } else {
                match model::get_current_session(&pool, &project.id).await? {
                    Some(s) => println!("{} ({} turns)", s.id, s.total_turns),
                    None => println!("no active session"),
                }
            }
        }
    }
    Ok(())
}

trait OrNotFound<T> {
    fn context_not_found(self, id: &str) -> anyhow::Result<T>;
}

impl<T> OrNotFound<T> for Option<T> {
    fn context_not_found(self, id: &str) -> anyhow::Result<T> {
        self.ok_or_else(|| EcError::CheckpointNotFound(id.to_string()).into())
    }
}

fn truncate(s: &str) -> String {
    s.chars().take(60).collect()
}

async fn cmd_search(
    root: &Path,
    query: &str,
    mode: &str,
    target: &str,
    global: bool,
    repo_name: Option<String>,
    limit: i64,
) -> anyhow::Result<()> {
    require_initialized(root)?;
    let search_mode = search::SearchMode::from_str(mode)?;
    let search_target = search::SearchTarget::from_str(target)?;

    let results = if global {
        let registry = registry::connect_global().await?;
        let names = repo_name.map(|n| vec![n]);
        registry::cross_repo_search(&registry, search_target, search_mode, query, names.as_deref(), limit).await?
    } else {
        let pool = db::connect(root).await?;
        search::search(&pool, search_target, search_mode, query, limit).await?
    };

    for r in results {
        match r.repo_name {
            Some(name) => println!("[{name}] {} {}", r.id, r.snippet),
            None => println!("{} {}", r.id, r.snippet),
        }
    }
    Ok(())
}

fn parse_line_range(lines: Option<String>) -> (i64, i64) {
    match lines {
        None => (1, i64::MAX),
        Some(spec) => match spec.split_once(',') {
            Some((start, end)) => (start.parse().unwrap_or(1), end.parse().unwrap_or(i64::MAX)),
            None => {
                let n = spec.parse().unwrap_or(1);
                (n, n)
            }
        },
    }
}

async fn cmd_blame(root: &Path, path: &str, lines: Option<String>, summary: bool) -> anyhow::Result<()> {
    require_initialized(root)?;
    let pool = db::connect(root).await?;
    let (start, end) = parse_line_range(lines);
    let (ranges, blame_summary) = attribution::blame(&pool, path, start, end).await?;

    if summary {
        println!(
            "total={} human={} ({:.1}%) agent={} ({:.1}%)",
            blame_summary.total_lines,
            blame_summary.human_lines,
            blame_summary.human_pct,
            blame_summary.agent_lines,
            blame_summary.agent_pct
        );
        for (agent, count) in blame_summary.agents {
            println!("  {agent}: {count} lines");
        }
    } else {
        for r in ranges {
            println!("{}:{} {} {}", r.start_line, r.end_line, r.kind, r.agent_id.unwrap_or_default());
        }
    }
    Ok(())
}

async fn cmd_rewind(root: &Path, checkpoint: &str, restore: bool) -> anyhow::Result<()> {
    require_initialized(root)?;
    let pool = db::connect(root).await?;
    let resolved = model::resolve_prefix(&pool, "checkpoints", checkpoint).await?;
    let cp = attribution::get_checkpoint(&pool, &resolved).await?.context_not_found(checkpoint)?;

    println!("checkpoint {} at commit {}", cp.id, cp.commit_hash);
    if let Some(diff) = &cp.diff_summary {
        println!("{diff}");
    }

    if restore {
        let dirty = git_probe::diff_stat(root, None).await.is_some();
        if dirty {
            anyhow::bail!("working tree is dirty; refusing to restore over uncommitted changes");
        }
        println!("(restore would check out {} — not performed automatically)", cp.commit_hash);
    }
    Ok(())
}

async fn cmd_checkpoint_list(root: &Path) -> anyhow::Result<()> {
    require_initialized(root)?;
    let pool = db::connect(root).await?;
    for cp in attribution::list_checkpoints(&pool).await? {
        println!("{} {} ({})", cp.id, cp.commit_hash, cp.branch.unwrap_or_default());
    }
    Ok(())
}

async fn cmd_sync(root: &Path, config: &config::Config) -> anyhow::Result<()> {
    require_initialized(root)?;
    let pool = db::connect(root).await?;
    let export_dir = sync::export_shadow(&pool, root, config).await?;
    sync::push(root, config, &export_dir).await?;
    println!("Synced to shadow branch '{}'", config.sync.shadow_branch);
    Ok(())
}

async fn cmd_pull(root: &Path, config: &config::Config) -> anyhow::Result<()> {
    require_initialized(root)?;
    let pool = db::connect(root).await?;
    sync::pull(root, config).await?;
    let summary = sync::import_shadow(&pool, root, config).await?;
    println!(
        "Pulled shadow branch '{}': {} sessions, {} checkpoints imported",
        config.sync.shadow_branch, summary.imported_sessions, summary.imported_checkpoints
    );
    Ok(())
}

async fn cmd_purge(root: &Path, action: PurgeAction) -> anyhow::Result<()> {
    require_initialized(root)?;
    let pool = db::connect(root).await?;

    let result = match action {
        PurgeAction::Turn { ids, execute, force: _ } => purge::purge_turns(&pool, &ids, !execute).await?,
        PurgeAction::Session { id, execute, force: _ } => {
            let resolved = model::resolve_prefix(&pool, "sessions", &id).await?;
            purge::purge_session(&pool, &resolved, !execute).await?
        }
        PurgeAction::Match { pattern, execute, force: _ } => purge::purge_by_pattern(&pool, &pattern, !execute).await?,
    };

    println!("matched={} deleted={} dry_run={}", result.matched_turns, result.deleted, result.dry_run);
    Ok(())
}

async fn cmd_repo_list() -> anyhow::Result<()> {
    let registry = registry::connect_global().await?;
    for repo in registry::list_repos(&registry, None).await? {
        println!("{} {}", repo.repo_name, repo.repo_path);
    }
    Ok(())
}

async fn cmd_index(root: &Path) -> anyhow::Result<()> {
    require_initialized(root)?;
    let pool = db::connect(root).await?;
    migrate::run_migrations(&pool).await?;
    println!("FTS indexes verified (trigger-maintained; nothing to rebuild)");
    Ok(())
}

async fn cmd_futures(root: &Path, action: FuturesAction) -> anyhow::Result<()> {
    require_initialized(root)?;
    let pool = db::connect(root).await?;

    match action {
        FuturesAction::Record { verdict, impact_summary, roadmap_alignment, suggestion } => {
            let assessment =
                model::record_assessment(&pool, &verdict, &impact_summary, &roadmap_alignment, &suggestion).await?;
            println!("{}", assessment.id);
        }
        FuturesAction::Show { id } => {
            let resolved = model::resolve_prefix(&pool, "futures_assessments", &id).await?;
            let assessment = model::get_assessment(&pool, &resolved).await?.context_not_found(&id)?;
            println!(
                "{} verdict={} feedback={}",
                assessment.id,
                assessment.verdict,
                assessment.feedback.as_deref().unwrap_or("none")
            );
            println!("impact: {}", assessment.impact_summary);
            println!("roadmap: {}", assessment.roadmap_alignment);
            println!("suggestion: {}", assessment.suggestion);
        }
        FuturesAction::Feedback { id, feedback, reason } => {
            let resolved = model::resolve_prefix(&pool, "futures_assessments", &id).await?;
            model::set_feedback(&pool, &resolved, &feedback, reason.as_deref()).await?;
        }
    }
    Ok(())
}

async fn run_hook(cli_repo: Option<&Path>, action: HookAction) -> anyhow::Result<()> {
    match action {
        HookAction::Handle { hook_type } => {
            let mut body = String::new();
            std::io::stdin().read_to_string(&mut body)?;

            let payload = if let Some(hook_type) = hook_type {
                let mut value: serde_json::Value = serde_json::from_str(&body).unwrap_or_else(|_| serde_json::json!({}));
                value.as_object_mut().map(|o| o.insert("hook_type".to_string(), serde_json::json!(hook_type)));
                hooks::parse_payload(&value.to_string())?
            } else {
                hooks::parse_payload(&body)?
            };

            let root = match cli_repo {
                Some(r) => r.to_path_buf(),
                None => hooks::resolve_repo_root(&std::env::current_dir()?.to_string_lossy()),
            };
            let config = config::load_config(&root).unwrap_or_default();
            let _log_guard = logging::init(&root);
            hooks::dispatch(&root, &config, payload).await
        }
        HookAction::CodexNotify { payload } => {
            let body = match payload {
                Some(p) => p,
                None => {
                    let mut s = String::new();
                    std::io::stdin().read_to_string(&mut s)?;
                    s
                }
            };
            let mut value: serde_json::Value =
                serde_json::from_str(&body).map_err(|e| EcError::HookMalformedPayload(e.to_string()))?;
            value.as_object_mut().map(|o| o.insert("hook_type".to_string(), serde_json::json!("CodexNotify")));
            let parsed = hooks::parse_payload(&value.to_string())?;

            let root = match cli_repo {
                Some(r) => r.to_path_buf(),
                None => std::env::current_dir()?,
            };
            let config = config::load_config(&root).unwrap_or_default();
            hooks::dispatch(&root, &config, parsed).await
        }
    }
}
