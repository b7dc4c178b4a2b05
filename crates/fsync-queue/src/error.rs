// error.rs — Error types for the change queue and watcher.

use thiserror::Error;

/// Errors that can occur while enqueuing or watching for changes.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Queue persistence failed. Fatal to the enqueue: the caller must
    /// not assume the change was recorded.
    #[error(transparent)]
    Store(#[from] fsync_store::StoreError),

    /// The OS watcher could not be created or attached.
    #[error("watcher error for {project}: {source}")]
    Watcher {
        project: String,
        #[source]
        source: notify::Error,
    },

    /// A queue row held a kind string the model cannot represent.
    #[error("corrupt change record {id}: bad kind `{kind}`")]
    CorruptRecord { id: i64, kind: String },
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(fsync_store::StoreError::Sqlite(e))
    }
}
