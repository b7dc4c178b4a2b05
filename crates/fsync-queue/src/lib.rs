//! # fsync-queue
//!
//! The change source and its durable queue. Changes come from two places:
//! a per-project filesystem watcher (debounced, so editor save storms
//! coalesce) and explicit enqueues from the webhook deployment path. Every
//! record is persisted before the producer gets its acknowledgement, and
//! the scheduler is notified after the persist — a crashed hub re-notifies
//! pending projects on restart by replaying the queue.
//!
//! ## Key components
//!
//! - [`SyncFileChange`] / [`ChangeKind`] — one unit of pending work
//! - [`ChangeQueue`] — SQLite-backed FIFO, persist-then-notify
//! - [`watch_project`] — notify-based watcher feeding the queue

pub mod change;
pub mod error;
pub mod queue;
pub mod watcher;

pub use change::{ChangeKind, SyncFileChange};
pub use error::QueueError;
pub use queue::ChangeQueue;
pub use watcher::{watch_project, WatchHandle};
