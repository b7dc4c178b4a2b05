// error.rs — Error types for ignore rule parsing.

use thiserror::Error;

/// Errors that can occur while parsing ignore rules.
#[derive(Debug, Error)]
pub enum IgnoreError {
    /// A character class was opened with `[` but never closed.
    #[error("unterminated character class in pattern `{pattern}`")]
    UnterminatedClass { pattern: String },

    /// A pattern was empty after stripping its prefixes (`!`, `/`).
    #[error("empty pattern after prefixes: `{pattern}`")]
    EmptyPattern { pattern: String },

    /// An ignore file could not be read.
    #[error("cannot read ignore file {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
