//! # fsync-sched
//!
//! The hub's scheduling core. A queue notification wakes the project's
//! runner; the runner drains the queue, runs one indexing pass, and
//! dispatches a work item to each bound node's worker. Workers are
//! single-concurrency per (project, node) — bursts coalesce into one
//! follow-up task — and tasks for disconnected nodes stay `pending` until
//! the transport reports the node back online.
//!
//! The scheduler and its runners never share mutable state: runners own
//! inbound signal channels, the scheduler owns the routing map, and
//! everything downstream (journal, manifest store, event bus) is handled
//! through its own handle.
//!
//! ## Key components
//!
//! - [`Scheduler`] — routing: queue notifications and node-online signals
//! - [`runner`] — one long-lived task per project (the project lock)
//! - [`worker`] — one long-lived task per (project, node) pair
//! - [`TaskExecutor`] — the seam to the transport (or the in-process
//!   loopback used for local targets and tests)
//! - [`ChunkResolver`] — serves chunk bytes out of the source tree

pub mod chunksrc;
pub mod config;
pub mod error;
pub mod executor;
pub mod runner;
pub mod scheduler;
pub mod worker;

pub use chunksrc::ChunkResolver;
pub use config::{ProjectConfigs, SchedulerConfig};
pub use error::SchedError;
pub use executor::{
    ExecuteOutcome, ExecuteRequest, ExecuteFailure, LoopbackExecutor, PathFailure, TaskExecutor,
};
pub use scheduler::{Scheduler, SchedulerDeps};
