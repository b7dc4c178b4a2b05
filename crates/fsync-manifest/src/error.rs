// error.rs — Error types for indexing and manifest persistence.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while indexing a tree or persisting manifests.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The project root itself could not be read. Fatal for the task;
    /// unreadable entries deeper in the tree are skipped instead.
    #[error("project root unreadable at {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize/deserialize manifest data.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Ignore rules failed to compile.
    #[error(transparent)]
    Ignore(#[from] fsync_ignore::IgnoreError),
}
