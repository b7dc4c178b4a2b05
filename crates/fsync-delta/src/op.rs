// op.rs — The operation vocabulary applied at a target.

use serde::{Deserialize, Serialize};

/// One operation in an ordered sync plan.
///
/// Paths are always relative to the binding's target path; the apply
/// engine rejects anything absolute or traversing upward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncOp {
    /// Create a directory (parents included).
    Mkdir { path: String, mode: u32 },

    /// Write a file as an ordered list of chunk-hash references. Chunks
    /// the agent does not hold are fetched via NEED_CHUNKS.
    Put {
        path: String,
        size: u64,
        mode: u32,
        mtime_ms: i64,
        content_hash: String,
        chunk_hashes: Vec<String>,
    },

    /// Set permission bits on an existing entry.
    Chmod { path: String, mode: u32 },

    /// Set the modification time on an existing entry.
    Utime { path: String, mtime_ms: i64 },

    /// Create or replace a symbolic link.
    Symlink { path: String, target: String },

    /// Remove a file or symlink (mirror only).
    Rm { path: String },

    /// Remove a directory left empty by removals (mirror only).
    Rmdir { path: String },
}

impl SyncOp {
    /// The path this operation touches.
    pub fn path(&self) -> &str {
        match self {
            SyncOp::Mkdir { path, .. }
            | SyncOp::Put { path, .. }
            | SyncOp::Chmod { path, .. }
            | SyncOp::Utime { path, .. }
            | SyncOp::Symlink { path, .. }
            | SyncOp::Rm { path }
            | SyncOp::Rmdir { path } => path,
        }
    }

    /// Whether this operation deletes something.
    pub fn is_removal(&self) -> bool {
        matches!(self, SyncOp::Rm { .. } | SyncOp::Rmdir { .. })
    }

    /// Short tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncOp::Mkdir { .. } => "mkdir",
            SyncOp::Put { .. } => "put",
            SyncOp::Chmod { .. } => "chmod",
            SyncOp::Utime { .. } => "utime",
            SyncOp::Symlink { .. } => "symlink",
            SyncOp::Rm { .. } => "rm",
            SyncOp::Rmdir { .. } => "rmdir",
        }
    }
}
