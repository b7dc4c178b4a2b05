//! # fsync-delta
//!
//! Compares a source manifest against a node's target view and emits the
//! ordered operation list that converges the target. Mirror and overlay
//! strategies differ only in their removal behavior, captured as a tagged
//! variant rather than trait objects so the scheduler can reason about a
//! plan without dynamic dispatch.
//!
//! ## Key components
//!
//! - [`SyncOp`] — one operation in a plan
//! - [`DeltaOptions`] — strategy plus permission policy for one binding
//! - [`compute_delta`] — the diff itself, honoring the ordering contract
//!   (creates, writes, attribute updates, symlinks, removals, empty-dir
//!   removals; ascending paths for creates, descending for removes)

pub mod diff;
pub mod op;

pub use diff::{compute_delta, DeltaOptions, DeltaPlan};
pub use op::SyncOp;
