// scheduler.rs — Routing between the queue, the transport, and runners.
//
// The scheduler owns the project → runner map and nothing else. Queue
// notifications ensure a runner exists and mark it dirty; node-online
// signals from the transport fan out to every runner (a node can be bound
// to any number of projects). Runners talk back only through the journal
// and the event bus — no shared mutable state, no reference cycles.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fsync_events::EventBus;
use fsync_journal::TaskJournal;
use fsync_manifest::{BaselineLedger, ManifestStore};
use fsync_queue::ChangeQueue;

use crate::config::{ProjectConfigs, SchedulerConfig};
use crate::executor::TaskExecutor;
use crate::runner::{spawn_runner, RunnerDeps, RunnerMsg};

/// Everything the scheduler wires into its runners.
pub struct SchedulerDeps {
    pub queue: ChangeQueue,
    pub configs: ProjectConfigs,
    pub journal: TaskJournal,
    pub store: Arc<ManifestStore>,
    pub ledger: Arc<BaselineLedger>,
    pub events: EventBus,
    pub executor: Arc<dyn TaskExecutor>,
    pub config: SchedulerConfig,
}

/// A running scheduler.
pub struct Scheduler {
    token: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl Scheduler {
    /// Spawn the scheduler. `notify_rx` is the receiving side of the
    /// channel the [`ChangeQueue`] notifies on; `node_rx` receives node
    /// ids from the transport as their sessions come up.
    pub fn spawn(
        deps: SchedulerDeps,
        notify_rx: mpsc::UnboundedReceiver<String>,
        node_rx: mpsc::UnboundedReceiver<String>,
        token: CancellationToken,
    ) -> Self {
        let loop_token = token.clone();
        let join = tokio::spawn(scheduler_loop(deps, notify_rx, node_rx, loop_token));
        Self { token, join }
    }

    /// Cancel all runners and workers, then wait for the loop to drain.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.join.await;
    }
}

async fn scheduler_loop(
    deps: SchedulerDeps,
    mut notify_rx: mpsc::UnboundedReceiver<String>,
    mut node_rx: mpsc::UnboundedReceiver<String>,
    token: CancellationToken,
) {
    let mut runners: HashMap<String, mpsc::UnboundedSender<RunnerMsg>> = HashMap::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            project = notify_rx.recv() => {
                let Some(project) = project else { return };
                let runner = runners.entry(project.clone()).or_insert_with(|| {
                    tracing::debug!(project = %project, "spawning project runner");
                    spawn_runner(RunnerDeps {
                        project: project.clone(),
                        queue: deps.queue.clone(),
                        configs: deps.configs.clone(),
                        journal: deps.journal.clone(),
                        store: deps.store.clone(),
                        ledger: deps.ledger.clone(),
                        events: deps.events.clone(),
                        executor: deps.executor.clone(),
                        sched: deps.config.clone(),
                        token: token.child_token(),
                    })
                });
                let _ = runner.send(RunnerMsg::Dirty);
            }
            node_id = node_rx.recv() => {
                let Some(node_id) = node_id else { return };
                tracing::debug!(node = %node_id, "node online, waking pending work");
                for runner in runners.values() {
                    let _ = runner.send(RunnerMsg::NodeOnline(node_id.clone()));
                }
            }
        }
    }
}
