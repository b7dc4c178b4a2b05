// ledger.rs — Overlay baseline ledger.
//
// Overlay-incremental indexing mutates a prior manifest instead of
// re-walking the tree, so drift accumulates whenever the watcher misses an
// event. The ledger re-grounds each project: it counts tasks and remembers
// the last baseline full scan, and either condition (every N tasks, or T
// seconds elapsed) forces the next pass to be full.
//
// The ledger is constructor-injected wherever it is needed — there is no
// process-wide singleton. Internally it is a mutex-guarded map persisted
// as one JSON file, replaced atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Per-project baseline state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineRecord {
    pub last_full_scan: DateTime<Utc>,
    pub task_counter: u64,
}

/// Process-wide (but injected) baseline bookkeeping for all projects.
#[derive(Debug)]
pub struct BaselineLedger {
    path: PathBuf,
    inner: Mutex<HashMap<String, BaselineRecord>>,
}

impl BaselineLedger {
    /// Load the ledger from `path`, starting empty if the file is absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref().to_path_buf();
        let map = if path.exists() {
            let json = std::fs::read_to_string(&path).map_err(|source| IndexError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&json)?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            inner: Mutex::new(map),
        })
    }

    /// Count a task for `project` and decide whether this task must run a
    /// baseline full scan. The first observation of a project records a
    /// baseline timestamp and never forces a scan.
    pub fn observe_task(
        &self,
        project: &str,
        full_scan_every: u64,
        full_scan_interval_secs: u64,
    ) -> Result<bool, IndexError> {
        let mut map = self.inner.lock().expect("ledger mutex poisoned");
        let now = Utc::now();

        let force = match map.get_mut(project) {
            None => {
                map.insert(
                    project.to_string(),
                    BaselineRecord {
                        last_full_scan: now,
                        task_counter: 1,
                    },
                );
                false
            }
            Some(rec) => {
                rec.task_counter += 1;
                let by_count =
                    full_scan_every > 0 && rec.task_counter % full_scan_every == 0;
                let by_time = full_scan_interval_secs > 0
                    && (now - rec.last_full_scan).num_seconds()
                        >= full_scan_interval_secs as i64;
                by_count || by_time
            }
        };

        self.persist(&map)?;
        Ok(force)
    }

    /// Record that a baseline full scan just completed for `project`.
    pub fn record_full_scan(&self, project: &str) -> Result<(), IndexError> {
        let mut map = self.inner.lock().expect("ledger mutex poisoned");
        let now = Utc::now();
        map.entry(project.to_string())
            .and_modify(|rec| rec.last_full_scan = now)
            .or_insert(BaselineRecord {
                last_full_scan: now,
                task_counter: 0,
            });
        self.persist(&map)
    }

    pub fn record_for(&self, project: &str) -> Option<BaselineRecord> {
        self.inner
            .lock()
            .expect("ledger mutex poisoned")
            .get(project)
            .cloned()
    }

    /// Write the whole map out atomically: sibling temp file, then rename.
    fn persist(&self, map: &HashMap<String, BaselineRecord>) -> Result<(), IndexError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| IndexError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(map)?;
        std::fs::write(&tmp, json).map_err(|source| IndexError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|source| IndexError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}
