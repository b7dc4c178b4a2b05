// state.rs — Shared application state and the watcher manager.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use fsync_events::EventBus;
use fsync_journal::TaskJournal;
use fsync_manifest::ProjectSyncConfig;
use fsync_queue::{watch_project, ChangeQueue, WatchHandle};
use fsync_registry::NodeStore;
use fsync_sched::ProjectConfigs;
use fsync_transport::HubTransport;

use crate::config::{HookDef, ProjectConfigStore};

/// Everything the REST and WebSocket handlers reach for.
#[derive(Clone)]
pub struct AppState {
    pub nodes: NodeStore,
    pub configs: ProjectConfigs,
    pub queue: ChangeQueue,
    pub journal: TaskJournal,
    pub events: EventBus,
    pub transport: Arc<HubTransport>,
    pub hooks: Arc<HashMap<String, HookDef>>,
    pub auth_key: Arc<String>,
    pub project_store: Arc<ProjectConfigStore>,
    pub watchers: Arc<WatcherManager>,
}

/// Keeps one filesystem watcher per watch-enabled project and reconciles
/// them when configs change.
pub struct WatcherManager {
    queue: ChangeQueue,
    token: CancellationToken,
    handles: Mutex<HashMap<String, WatchHandle>>,
}

impl WatcherManager {
    pub fn new(queue: ChangeQueue, token: CancellationToken) -> Self {
        Self {
            queue,
            token,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Bring the watcher for one project in line with its config.
    pub async fn reconcile(&self, config: &ProjectSyncConfig) {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.remove(&config.name) {
            handle.stop().await;
        }
        if !(config.enabled && config.watch_enabled) {
            return;
        }
        match watch_project(config, self.queue.clone(), &self.token) {
            Ok(handle) => {
                handles.insert(config.name.clone(), handle);
            }
            Err(e) => {
                tracing::error!(project = %config.name, error = %e, "cannot watch project");
            }
        }
    }

}
