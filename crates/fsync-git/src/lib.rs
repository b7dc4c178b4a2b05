//! # fsync-git
//!
//! The deployment path's git helper: bring a project working tree to a
//! requested branch, tag, or commit, optionally forcing through local
//! drift first. With force set, the tree is hard-reset and cleaned before
//! the checkout, and a conflicting checkout gets exactly one more
//! reset-and-retry. Out-of-band edits and permission changes therefore
//! cannot wedge a deploy.
//!
//! The helper refuses to operate on anything that is not a working tree
//! root, and it never touches `.git` itself — `clean -fd` leaves ignored
//! files alone too, so build caches survive a forced deploy.

pub mod error;
pub mod sync;

pub use error::GitSyncError;
pub use sync::{DeployRef, ForceSyncOutcome, GitSync};
