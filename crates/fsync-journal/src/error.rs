// error.rs — Error types for the task journal.

use thiserror::Error;

use crate::task::TaskStatus;

/// Errors that can occur in journal operations.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The requested task does not exist.
    #[error("task not found: {0}")]
    NotFound(i64),

    /// The status lifecycle forbids this transition.
    #[error("invalid transition from {from} to {to} for task {id}")]
    InvalidTransition {
        id: i64,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] fsync_store::StoreError),

    /// A row held a value the model cannot represent.
    #[error("corrupt task record {id}: bad {field} value `{value}`")]
    CorruptRecord {
        id: i64,
        field: &'static str,
        value: String,
    },
}

impl From<rusqlite::Error> for JournalError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(fsync_store::StoreError::Sqlite(e))
    }
}
