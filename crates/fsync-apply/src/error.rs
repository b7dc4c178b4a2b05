// error.rs — Error types for the apply engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while applying operations at a target.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The stream named a path that would leave the target root.
    #[error("path escapes the target root: `{path}`")]
    PathEscapes { path: String },

    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A PUT referenced chunks the cache does not hold. The caller must
    /// fetch them (NEED_CHUNKS) and retry the operation.
    #[error("{} chunk(s) missing from the local cache", hashes.len())]
    MissingChunks { hashes: Vec<String> },

    /// Streamed chunk bytes did not match their announced hash.
    #[error("chunk {hash} failed verification")]
    ChunkHashMismatch { hash: String },

    /// The configured target path does not exist on this host.
    #[error("target path missing: {path}")]
    TargetMissing { path: PathBuf },

    /// Symlink operations are not supported on this platform.
    #[error("symlinks unsupported on this platform: {path}")]
    SymlinkUnsupported { path: String },
}

impl ApplyError {
    /// The errno-style number reported back in APPLY_ACK frames.
    pub fn errno(&self) -> u32 {
        match self {
            ApplyError::Io { source, .. } => source.raw_os_error().unwrap_or(5) as u32,
            ApplyError::PathEscapes { .. } => 13,        // EACCES
            ApplyError::TargetMissing { .. } => 2,       // ENOENT
            ApplyError::MissingChunks { .. } => 0,
            ApplyError::ChunkHashMismatch { .. } => 74,  // EBADMSG
            ApplyError::SymlinkUnsupported { .. } => 95, // EOPNOTSUPP
        }
    }
}
