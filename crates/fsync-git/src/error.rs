// error.rs — Error types for the git deployment helper.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while force-syncing a working tree.
#[derive(Debug, Error)]
pub enum GitSyncError {
    /// The path is not a git working tree root (no `.git`).
    #[error("{path} is not a git working tree root")]
    NotAWorkTree { path: PathBuf },

    /// A git invocation exited nonzero.
    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    /// The git binary could not be spawned at all.
    #[error("cannot run git: {0}")]
    Spawn(#[from] std::io::Error),

    /// The checkout still conflicted after the forced retry (or force was
    /// not set).
    #[error("checkout of {reference} conflicted: {detail}")]
    CheckoutConflict { reference: String, detail: String },
}
