//! # fsync-manifest
//!
//! Tree indexing for Fleetsync: walk a project root under its ignore rules
//! and produce a [`Manifest`] — an ordered map of relative path to size,
//! mtime, mode, and content chunk hashes. The manifest is the unit of
//! comparison between the hub's source tree and each node's last applied
//! state.
//!
//! ## Key components
//!
//! - [`Manifest`] / [`ManifestEntry`] — the filtered tree snapshot
//! - [`chunks`] — fixed-size chunk hashing (SHA-256, 128 KiB)
//! - [`Indexer`] — full and overlay-incremental indexing passes
//! - [`BaselineLedger`] — decides when an incremental chain must be
//!   re-grounded by a baseline full scan
//! - [`ManifestStore`] — per-(project, node) applied-manifest cache,
//!   replaced atomically on task success
//! - [`ProjectSyncConfig`] — per-project sync configuration shared by the
//!   scheduler and delta engine

pub mod chunks;
pub mod config;
pub mod error;
pub mod indexer;
pub mod ledger;
pub mod manifest;
pub mod store;

pub use config::{ProjectNodeBinding, ProjectSyncConfig, SymlinkPolicy, SyncStrategy};
pub use error::IndexError;
pub use indexer::{IndexOutcome, Indexer};
pub use ledger::{BaselineLedger, BaselineRecord};
pub use manifest::{EntryKind, Manifest, ManifestEntry};
pub use store::ManifestStore;
