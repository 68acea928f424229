//! Error taxonomy for EntireContext.
//!
//! Command handlers match on these variants to pick an exit code (see
//! `main.rs`); most internal code just propagates `anyhow::Result` with
//! `.context(...)` the way the rest of the crate does, and only wraps a
//! concrete failure in one of these variants at the point it needs to be
//! distinguished from a generic I/O or parse error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EcError {
    #[error("not initialized: run `ec init` first")]
    NotInitialized,

    #[error("not inside a git repository")]
    NotInGitRepo,

    #[error("session {0} is active; finish or end it before purging")]
    ActiveSessionError(String),

    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("invalid verdict: {0}")]
    InvalidVerdict(String),

    #[error("invalid feedback: {0}")]
    InvalidFeedback(String),

    #[error("semantic search requires an embedding backend, none configured")]
    MissingEmbeddingBackend,

    #[error("external tool unavailable: {0}")]
    ExternalToolUnavailable(String),

    #[error("storage corrupt: {0}")]
    StorageCorrupt(String),

    #[error("malformed hook payload: {0}")]
    HookMalformedPayload(String),

    #[error("ambiguous id prefix '{0}' matches more than one row")]
    AmbiguousPrefix(String),
}

impl EcError {
    /// Exit code a user-facing command should return for this error.
    ///
    /// 2 is reserved for hook-dispatch soft failures (a malformed
    /// invocation that isn't even a recognized hook shape); everything
    /// else maps to 1. Hook handlers themselves never call this — they
    /// catch and log instead of propagating, per the capture pipeline's
    /// contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            EcError::HookMalformedPayload(_) => 2,
            _ => 1,
        }
    }
}
