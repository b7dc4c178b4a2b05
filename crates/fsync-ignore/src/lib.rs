//! # fsync-ignore
//!
//! Ignore rule parsing and matching for Fleetsync project trees.
//!
//! Rules follow the Syncthing pattern dialect: `#` comments, `!` negation
//! with last-match-wins, `**`/`*`/`?`/`[class]` globs, a leading `/` to
//! anchor at the project root and a trailing `/` to restrict a rule to
//! directories. Project-level rules come first and node-level rules are
//! appended after them, so a per-node negation can punch a hole in a
//! project-wide exclusion.
//!
//! ## Key components
//!
//! - [`Rule`] — one parsed pattern
//! - [`IgnoreSet`] — an ordered, merged rule list with the matcher
//! - [`default_rules`] — the curated VCS/temporary exclusions prepended
//!   when a project enables `ignore_defaults`

pub mod error;
pub mod matcher;
pub mod rule;

pub use error::IgnoreError;
pub use matcher::IgnoreSet;
pub use rule::{default_rules, Rule};
