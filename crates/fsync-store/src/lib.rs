//! # fsync-store
//!
//! The hub's relational state: one SQLite database holding node records,
//! the change queue, and the task journal. Subsystem crates own their
//! queries; this crate owns the connection discipline (WAL, foreign keys,
//! busy timeout) and the schema migrations.
//!
//! Applied manifests and the baseline ledger are deliberately NOT here —
//! they are whole-document JSON files replaced atomically, see
//! `fsync-manifest`.

pub mod db;
pub mod error;
pub mod schema;

pub use db::Db;
pub use error::StoreError;
