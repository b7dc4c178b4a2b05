// runner.rs — One long-lived task per project.
//
// The runner IS the project lock: its loop body runs one cycle at a time,
// so there is never more than one indexing pass per project. A cycle
// drains the queue, indexes once (full or overlay-incremental, with the
// baseline ledger deciding forced full scans), and dispatches a work item
// to every bound node's worker. The lock is "released" the moment
// dispatch finishes — per-node transfer happens in the workers, in
// parallel across nodes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fsync_events::EventBus;
use fsync_journal::{ErrorCode, TaskJournal};
use fsync_manifest::{
    BaselineLedger, IndexError, Indexer, Manifest, ManifestStore, SyncStrategy,
};
use fsync_queue::ChangeQueue;

use crate::chunksrc::ChunkResolver;
use crate::config::{ProjectConfigs, SchedulerConfig};
use crate::executor::TaskExecutor;
use crate::worker::{publish_task, spawn_worker, WorkItem, WorkerCtx, WorkerMsg};

pub(crate) enum RunnerMsg {
    /// The queue has (or may have) new rows for this project.
    Dirty,
    /// A node's transport session came up.
    NodeOnline(String),
}

#[derive(Clone)]
pub(crate) struct RunnerDeps {
    pub project: String,
    pub queue: ChangeQueue,
    pub configs: ProjectConfigs,
    pub journal: TaskJournal,
    pub store: Arc<ManifestStore>,
    pub ledger: Arc<BaselineLedger>,
    pub events: EventBus,
    pub executor: Arc<dyn TaskExecutor>,
    pub sched: SchedulerConfig,
    pub token: CancellationToken,
}

pub(crate) fn spawn_runner(deps: RunnerDeps) -> mpsc::UnboundedSender<RunnerMsg> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(runner_loop(deps, rx));
    tx
}

async fn runner_loop(deps: RunnerDeps, mut rx: mpsc::UnboundedReceiver<RunnerMsg>) {
    let mut workers: HashMap<String, mpsc::UnboundedSender<WorkerMsg>> = HashMap::new();
    let mut fullscan_counters: HashMap<String, u64> = HashMap::new();
    let mut last_source: Option<Arc<Manifest>> = None;

    loop {
        let msg = tokio::select! {
            _ = deps.token.cancelled() => return,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => return,
            },
        };

        let mut dirty = false;
        route_msg(msg, &mut dirty, &workers);
        // Coalesce whatever else queued up while we were waiting.
        while let Ok(more) = rx.try_recv() {
            route_msg(more, &mut dirty, &workers);
        }
        if !dirty {
            continue;
        }

        if let Err(e) = run_cycle(
            &deps,
            &mut workers,
            &mut fullscan_counters,
            &mut last_source,
        )
        .await
        {
            tracing::error!(project = %deps.project, error = %e, "sync cycle failed");
        }
    }
}

fn route_msg(
    msg: RunnerMsg,
    dirty: &mut bool,
    workers: &HashMap<String, mpsc::UnboundedSender<WorkerMsg>>,
) {
    match msg {
        RunnerMsg::Dirty => *dirty = true,
        RunnerMsg::NodeOnline(node_id) => {
            if let Some(worker) = workers.get(&node_id) {
                let _ = worker.send(WorkerMsg::NodeOnline);
            }
        }
    }
}

async fn run_cycle(
    deps: &RunnerDeps,
    workers: &mut HashMap<String, mpsc::UnboundedSender<WorkerMsg>>,
    fullscan_counters: &mut HashMap<String, u64>,
    last_source: &mut Option<Arc<Manifest>>,
) -> Result<(), crate::error::SchedError> {
    let Some(config) = deps.configs.get(&deps.project) else {
        // Unknown project: drop whatever queued for it.
        let _ = deps.queue.drain(&deps.project);
        return Ok(());
    };
    if !config.enabled {
        let _ = deps.queue.drain(&deps.project)?;
        return Ok(());
    }

    let changes = deps.queue.drain(&deps.project)?;
    if changes.is_empty() {
        return Ok(());
    }
    tracing::debug!(project = %deps.project, changes = changes.len(), "starting sync cycle");

    let force_full = deps.ledger.observe_task(
        &deps.project,
        config.overlay_full_scan_every,
        config.overlay_full_scan_interval_secs,
    )?;
    let has_rescan = changes.iter().any(|c| c.is_full_rescan());
    let changed_paths: Vec<String> = changes.iter().filter_map(|c| c.path.clone()).collect();

    // Indexing is blocking file I/O; keep it off the runtime workers.
    let outcome = {
        let config = config.clone();
        let prev = if has_rescan { None } else { last_source.clone() };
        let fold_case = deps.sched.fold_case;
        tokio::task::spawn_blocking(move || {
            let ignore = config.ignore_set_for(None, fold_case)?;
            let indexer = Indexer::new(&config, &ignore);
            indexer.index(
                prev.as_deref(),
                if has_rescan {
                    None
                } else {
                    Some(changed_paths.as_slice())
                },
                force_full || has_rescan,
            )
        })
        .await
        .expect("indexing task panicked")
    };

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(IndexError::RootUnreadable { path, source }) => {
            // The whole project is unreadable: every binding's task fails.
            let message = format!("project root unreadable at {}: {}", path.display(), source);
            for binding in &config.nodes {
                fail_at_scheduling(deps, &binding.node_id, ErrorCode::Eacces, &message);
            }
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if outcome.full {
        deps.ledger.record_full_scan(&deps.project)?;
    }

    let source = Arc::new(outcome.manifest);
    *last_source = Some(source.clone());
    let all_ignored = source.is_empty() && root_has_entries(&config.path);
    let chunks = Arc::new(ChunkResolver::from_manifest(&config.path, &source));
    let skipped = Arc::new(outcome.skipped);

    for binding in &config.nodes {
        if !binding.target_path_valid() {
            fail_at_scheduling(
                deps,
                &binding.node_id,
                ErrorCode::InvalidTarget,
                &format!("invalid target path `{}`", binding.target_path),
            );
            continue;
        }

        let counter = fullscan_counters
            .entry(binding.node_id.clone())
            .and_modify(|c| *c += 1)
            .or_insert(1);
        let enumerate = binding.strategy == SyncStrategy::Mirror
            && (!binding.mirror_fast_delete
                || (binding.mirror_fast_fullscan_every > 0
                    && *counter % binding.mirror_fast_fullscan_every == 0));

        let worker = workers
            .entry(binding.node_id.clone())
            .or_insert_with(|| {
                spawn_worker(WorkerCtx {
                    project: deps.project.clone(),
                    node_id: binding.node_id.clone(),
                    journal: deps.journal.clone(),
                    store: deps.store.clone(),
                    events: deps.events.clone(),
                    executor: deps.executor.clone(),
                    sched: deps.sched.clone(),
                    token: deps.token.child_token(),
                })
            });

        let item = WorkItem {
            config: config.clone(),
            binding: binding.clone(),
            source: source.clone(),
            chunks: chunks.clone(),
            skipped: skipped.clone(),
            all_ignored,
            enumerate,
        };
        let _ = worker.send(WorkerMsg::Run(Box::new(item)));
    }

    Ok(())
}

/// Record a task that fails before it could ever run.
fn fail_at_scheduling(deps: &RunnerDeps, node_id: &str, code: ErrorCode, message: &str) {
    match deps.journal.create(&deps.project, node_id) {
        Ok(task) => {
            if let Err(e) = deps.journal.mark_failed(task.id, code, message) {
                tracing::error!(task = task.id, error = %e, "cannot record scheduling failure");
            }
            publish_task(&deps.events, &deps.journal, task.id);
        }
        Err(e) => {
            tracing::error!(project = %deps.project, node = %node_id, error = %e,
                "cannot create journal task for scheduling failure");
        }
    }
}

fn root_has_entries(path: &str) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
