// watcher.rs — Per-project filesystem watcher with debounce.
//
// notify's callback runs on its own thread; it forwards raw events into a
// bounded tokio channel via blocking_send. The async side coalesces
// events per relative path inside the debounce window and enqueues one
// SyncFileChange per settled path. A save storm from an editor therefore
// produces one batch, and downstream one task per node.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fsync_manifest::ProjectSyncConfig;

use crate::change::ChangeKind;
use crate::error::QueueError;
use crate::queue::ChangeQueue;

/// A running watcher. Dropping the handle (or cancelling the token) stops
/// both the OS watcher and the debounce task.
pub struct WatchHandle {
    project: String,
    token: CancellationToken,
    join: tokio::task::JoinHandle<()>,
    // Kept alive for the lifetime of the watch; dropping it detaches the
    // OS-level watches.
    _watcher: RecommendedWatcher,
}

impl WatchHandle {
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Stop watching and wait for the debounce task to drain.
    pub async fn stop(self) {
        self.token.cancel();
        let _ = self.join.await;
    }
}

/// Start watching one project root, feeding settled changes into the
/// queue. Honors the project's `debounce_ms`.
pub fn watch_project(
    config: &ProjectSyncConfig,
    queue: ChangeQueue,
    parent_token: &CancellationToken,
) -> Result<WatchHandle, QueueError> {
    let root = PathBuf::from(&config.path);
    let project = config.name.clone();
    let debounce = Duration::from_millis(config.debounce_ms.clamp(200, 500));

    let (tx, rx) = mpsc::channel::<Event>(1024);
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                // The debounce task applies backpressure; a full channel
                // drops the event, which the next baseline scan corrects.
                let _ = tx.blocking_send(event);
            }
            Err(e) => tracing::warn!(error = %e, "watcher event error"),
        },
        notify::Config::default(),
    )
    .map_err(|source| QueueError::Watcher {
        project: project.clone(),
        source,
    })?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|source| QueueError::Watcher {
            project: project.clone(),
            source,
        })?;

    let token = parent_token.child_token();
    let join = tokio::spawn(debounce_loop(
        project.clone(),
        root,
        rx,
        queue,
        debounce,
        token.clone(),
    ));

    tracing::info!(project = %project, "watching project for changes");
    Ok(WatchHandle {
        project,
        token,
        join,
        _watcher: watcher,
    })
}

async fn debounce_loop(
    project: String,
    root: PathBuf,
    mut rx: mpsc::Receiver<Event>,
    queue: ChangeQueue,
    debounce: Duration,
    token: CancellationToken,
) {
    let mut pending: BTreeMap<String, ChangeKind> = BTreeMap::new();

    loop {
        let deadline = if pending.is_empty() {
            None
        } else {
            Some(tokio::time::sleep(debounce))
        };

        tokio::select! {
            _ = token.cancelled() => {
                flush(&project, &queue, &mut pending);
                return;
            }
            event = rx.recv() => {
                match event {
                    Some(event) => collect(&root, &event, &mut pending),
                    None => {
                        flush(&project, &queue, &mut pending);
                        return;
                    }
                }
            }
            _ = async { deadline.expect("guarded by pending").await }, if deadline.is_some() => {
                flush(&project, &queue, &mut pending);
            }
        }
    }
}

/// Fold one OS event into the pending batch.
fn collect(root: &PathBuf, event: &Event, pending: &mut BTreeMap<String, ChangeKind>) {
    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Write,
        EventKind::Modify(notify::event::ModifyKind::Name(_)) => ChangeKind::Rename,
        EventKind::Modify(notify::event::ModifyKind::Metadata(_)) => ChangeKind::Chmod,
        EventKind::Modify(_) => ChangeKind::Write,
        EventKind::Remove(_) => ChangeKind::Remove,
        _ => return,
    };

    for path in &event.paths {
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if rel.is_empty() {
            continue;
        }
        // Later, stronger kinds win: a write after a remove is a write.
        pending.insert(rel, kind);
    }
}

fn flush(project: &str, queue: &ChangeQueue, pending: &mut BTreeMap<String, ChangeKind>) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    tracing::debug!(project = %project, changes = batch.len(), "flushing debounced changes");
    for (path, kind) in batch {
        if let Err(e) = queue.enqueue(project, Some(&path), kind) {
            tracing::error!(project = %project, path = %path, error = %e, "failed to enqueue change");
        }
    }
}
