// error.rs — Error types for the scheduling core.

use thiserror::Error;

/// Errors that can occur inside the scheduler and its runners.
#[derive(Debug, Error)]
pub enum SchedError {
    #[error(transparent)]
    Queue(#[from] fsync_queue::QueueError),

    #[error(transparent)]
    Journal(#[from] fsync_journal::JournalError),

    #[error(transparent)]
    Index(#[from] fsync_manifest::IndexError),

    #[error(transparent)]
    Ignore(#[from] fsync_ignore::IgnoreError),

    /// The scheduler is shutting down.
    #[error("scheduler stopped")]
    Stopped,
}
