// store.rs — Applied-manifest cache, one JSON file per (project, node).
//
// The hub remembers the last state each agent acknowledged. A successful
// task replaces the file atomically (sibling temp + rename), so a reader
// never observes a half-written manifest. The scheduler guarantees one
// writer per pair; readers are unrestricted.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::manifest::Manifest;

/// The persisted envelope: which task produced this manifest, and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredManifest {
    pub task_id: i64,
    pub saved_at: DateTime<Utc>,
    pub manifest: Manifest,
}

/// Per-(project, node) applied-manifest storage rooted at one directory.
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, IndexError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| IndexError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Load the applied manifest for a pair, `None` when no task has
    /// succeeded yet.
    pub fn load(&self, project: &str, node_id: &str) -> Result<Option<StoredManifest>, IndexError> {
        let path = self.file_for(project, node_id);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path).map_err(|source| IndexError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// Atomically replace the applied manifest for a pair.
    pub fn save(
        &self,
        project: &str,
        node_id: &str,
        task_id: i64,
        manifest: &Manifest,
    ) -> Result<(), IndexError> {
        let stored = StoredManifest {
            task_id,
            saved_at: Utc::now(),
            manifest: manifest.clone(),
        };
        let path = self.file_for(project, node_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string(&stored)?;
        std::fs::write(&tmp, json).map_err(|source| IndexError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| IndexError::Io {
            path,
            source,
        })?;
        Ok(())
    }

    /// Drop the cached manifest for a pair (node unbound or reset).
    pub fn delete(&self, project: &str, node_id: &str) -> Result<bool, IndexError> {
        let path = self.file_for(project, node_id);
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path).map_err(|source| IndexError::Io { path, source })?;
        Ok(true)
    }

    fn file_for(&self, project: &str, node_id: &str) -> PathBuf {
        // Project names come from config and may hold path-hostile
        // characters; flatten them.
        let safe: String = project
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}__{}.json", safe, node_id))
    }
}
