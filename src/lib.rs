//! # EntireContext
//!
//! A local-first capture and retrieval system for AI-assisted coding
//! sessions. EntireContext observes an agent working inside a git
//! repository, records each turn of conversation together with the tools
//! it invoked and the files it touched, and persists this material in a
//! per-repository embedded store backed by a content-addressed file
//! layout. It provides retrieval (regex, full-text, optional vector) over
//! single repositories and across a registry of known repositories, plus
//! checkpoint records that anchor agent activity to git commits for
//! attribution and rewind inspection.
//!
//! ## Architecture
//!
//! ```text
//! agent host -> hook process -> hooks (capture) -> filter -> model -> db
//! query:       caller -> search (optionally via registry) -> db
//! sync:        db <-> sync (shadow branch) <-> remote
//! ```
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration parsing and validation
//! - [`error`] — the error taxonomy commands map to exit codes
//! - [`logging`] — diagnostic file logging independent of command output
//! - [`db`] — SQLite connection management (per-repo and global)
//! - [`migrate`] — forward-only schema migrations, FTS triggers
//! - [`model`] — Project/Session/Turn/TurnContent/Checkpoint/Attribution CRUD
//! - [`transcript`] — newline-delimited JSON transcript parsing
//! - [`codex_ingest`] — Codex rollout-file ingestion
//! - [`filter`] — content exclusion and redaction predicates
//! - [`git_probe`] — read-only, timeout-bounded git queries
//! - [`hooks`] — capture pipeline: hook event dispatch
//! - [`search`] — regex/FTS/semantic search over turn/session/event/content
//! - [`registry`] — global repo registry and cross-repo fan-out
//! - [`purge`] — safe deletion of turns/sessions
//! - [`sync`] — shadow-branch export/import/merge
//! - [`attribution`] — checkpoint and blame tracking

pub mod attribution;
pub mod codex_ingest;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod git_probe;
pub mod hooks;
pub mod logging;
pub mod migrate;
pub mod model;
pub mod purge;
pub mod registry;
pub mod search;
pub mod sync;
pub mod transcript;
