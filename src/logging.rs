//! Diagnostic logging, separate from the one line of human-facing output a
//! command prints on stdout/stderr.
//!
//! Hook processes are invoked by the agent host with stdout/stderr usually
//! discarded, so a caught-and-swallowed error needs somewhere else to go
//! (spec open question: hooks must exit 0 even on internal error, but
//! misbehaviour must still be observable). That somewhere is a rotating
//! file under `<repo>/.entirecontext/log/ec.log`.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Initialize file-based tracing for a repo. Returns a guard that must be
/// held for the lifetime of the process (dropping it stops the writer
/// thread before buffered lines flush).
///
/// Never fails the caller: if the log directory can't be created, logging
/// is silently disabled and the guard is `None`. Diagnostics are
/// best-effort, not load-bearing.
pub fn init(repo_root: &Path) -> Option<WorkerGuard> {
    let log_dir = repo_root.join(".entirecontext").join("log");
    if std::fs::create_dir_all(&log_dir).is_err() {
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, "ec.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_env("EC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .try_init();

    Some(guard)
}
