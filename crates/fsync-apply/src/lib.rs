//! # fsync-apply
//!
//! The agent side of a sync task: take the ordered operation list and make
//! the target directory match. Writes are atomic per file (temp sibling,
//! fsync, rename), every path is confined to the target root, and file
//! content arrives as chunk-hash references resolved against a local
//! chunk cache — only unknown chunks cross the wire.
//!
//! ## Key components
//!
//! - [`safe_join`] — path confinement, rejects `..` and absolute paths
//! - [`ChunkCache`] — append-only content-addressed chunk bytes
//! - [`Applier`] — applies one op or a whole plan; mirror aborts on the
//!   first hard error, overlay records the error and keeps going
//! - [`enumerate_target`] — target-side walk answering the hub's forced
//!   enumeration (mirror fast-delete correction)

pub mod cache;
pub mod engine;
pub mod error;
pub mod listing;
pub mod paths;

pub use cache::ChunkCache;
pub use engine::{Applier, ApplyOptions, ApplyReport, OpOutcome};
pub use error::ApplyError;
pub use listing::enumerate_target;
pub use paths::safe_join;
