// error.rs — Error types for the node registry.

use thiserror::Error;

/// Errors that can occur in registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested node does not exist.
    #[error("node not found: {0}")]
    NotFound(String),

    /// A node with this name already exists.
    #[error("node name already taken: {0}")]
    NameTaken(String),

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] fsync_store::StoreError),

    /// A row held a value the model cannot represent.
    #[error("corrupt node record for {id}: bad {field} value `{value}`")]
    CorruptRecord {
        id: String,
        field: &'static str,
        value: String,
    },
}

impl From<rusqlite::Error> for RegistryError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(fsync_store::StoreError::Sqlite(e))
    }
}
