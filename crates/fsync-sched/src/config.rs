// config.rs — Scheduler tuning and the live project-config registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use fsync_manifest::ProjectSyncConfig;

/// Process-wide scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wall-clock ceiling per task.
    pub task_deadline_secs: u64,
    /// Max attempts for transient failures, first run included.
    pub retry_max_attempts: u32,
    /// Base backoff; doubles per attempt, with jitter.
    pub retry_base_ms: u64,
    /// Case-insensitive ignore matching (Windows-compatible runs).
    pub fold_case: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            task_deadline_secs: 30 * 60,
            retry_max_attempts: 5,
            retry_base_ms: 500,
            fold_case: false,
        }
    }
}

/// Shared, updatable view of every project's sync configuration. The REST
/// surface replaces entries; runners read the latest on each cycle.
#[derive(Clone, Default)]
pub struct ProjectConfigs {
    inner: Arc<RwLock<HashMap<String, Arc<ProjectSyncConfig>>>>,
}

impl ProjectConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, project: &str) -> Option<Arc<ProjectSyncConfig>> {
        self.inner
            .read()
            .expect("config registry poisoned")
            .get(project)
            .cloned()
    }

    pub fn upsert(&self, config: ProjectSyncConfig) {
        self.inner
            .write()
            .expect("config registry poisoned")
            .insert(config.name.clone(), Arc::new(config));
    }

    pub fn remove(&self, project: &str) -> bool {
        self.inner
            .write()
            .expect("config registry poisoned")
            .remove(project)
            .is_some()
    }

    pub fn all(&self) -> Vec<Arc<ProjectSyncConfig>> {
        let mut configs: Vec<_> = self
            .inner
            .read()
            .expect("config registry poisoned")
            .values()
            .cloned()
            .collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }
}
