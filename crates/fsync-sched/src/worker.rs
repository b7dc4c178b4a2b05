// worker.rs — One long-lived task per (project, node) pair.
//
// Single concurrency per pair: while a task runs, further work signals
// coalesce into one follow-up. While the node is offline, the pair holds
// exactly one pending journal task and the newest work item; the
// node-online signal releases it. Retries for transient failures are
// driven here by a backoff timer, not by re-enqueueing through the
// scheduler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fsync_delta::{compute_delta, DeltaOptions};
use fsync_events::{EventBus, EventKind};
use fsync_ignore::IgnoreSet;
use fsync_journal::{ErrorCode, TaskJournal};
use fsync_manifest::{
    Manifest, ManifestStore, ProjectNodeBinding, ProjectSyncConfig, SyncStrategy,
};

use crate::chunksrc::ChunkResolver;
use crate::config::SchedulerConfig;
use crate::executor::{ExecuteRequest, TaskExecutor};

/// Everything a worker needs to run one task for its pair.
pub(crate) struct WorkItem {
    pub config: Arc<ProjectSyncConfig>,
    pub binding: ProjectNodeBinding,
    /// Project-level filtered source manifest from the indexing pass.
    pub source: Arc<Manifest>,
    pub chunks: Arc<ChunkResolver>,
    /// Index-time skip log, appended to the task's logs.
    pub skipped: Arc<Vec<(String, String)>>,
    /// The source held entries but the ignore set filtered all of them.
    pub all_ignored: bool,
    /// Force an agent-side enumeration before RM decisions.
    pub enumerate: bool,
}

pub(crate) enum WorkerMsg {
    Run(Box<WorkItem>),
    NodeOnline,
}

pub(crate) struct WorkerCtx {
    pub project: String,
    pub node_id: String,
    pub journal: TaskJournal,
    pub store: Arc<ManifestStore>,
    pub events: EventBus,
    pub executor: Arc<dyn TaskExecutor>,
    pub sched: SchedulerConfig,
    pub token: CancellationToken,
}

pub(crate) fn spawn_worker(ctx: WorkerCtx) -> mpsc::UnboundedSender<WorkerMsg> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(worker_loop(ctx, rx));
    tx
}

async fn worker_loop(ctx: WorkerCtx, mut rx: mpsc::UnboundedReceiver<WorkerMsg>) {
    // A pending task held for an offline node: (task id, newest item).
    let mut held: Option<(i64, Box<WorkItem>)> = None;

    loop {
        let msg = tokio::select! {
            _ = ctx.token.cancelled() => return,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => return,
            },
        };

        match msg {
            WorkerMsg::Run(mut item) => {
                // Coalesce everything already queued: a burst becomes one
                // task with the newest item.
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WorkerMsg::Run(newer) => item = newer,
                        WorkerMsg::NodeOnline => {}
                    }
                }

                if let Some((_, held_item)) = held.as_mut() {
                    // Already holding a pending task: just refresh its work.
                    *held_item = item;
                    if ctx.executor.is_connected(&ctx.node_id) {
                        let (task_id, item) = held.take().expect("held checked above");
                        run_task(&ctx, task_id, &item).await;
                    }
                    continue;
                }

                let task = match ctx.journal.create(&ctx.project, &ctx.node_id) {
                    Ok(task) => task,
                    Err(e) => {
                        tracing::error!(project = %ctx.project, node = %ctx.node_id, error = %e,
                            "cannot create journal task");
                        continue;
                    }
                };
                publish_task(&ctx.events, &ctx.journal, task.id);

                if ctx.executor.is_connected(&ctx.node_id) {
                    run_task(&ctx, task.id, &item).await;
                } else {
                    tracing::info!(project = %ctx.project, node = %ctx.node_id, task = task.id,
                        "node offline, task held pending");
                    held = Some((task.id, item));
                }
            }
            WorkerMsg::NodeOnline => {
                if let Some((task_id, item)) = held.take() {
                    tracing::info!(project = %ctx.project, node = %ctx.node_id, task = task_id,
                        "node online, releasing pending task");
                    run_task(&ctx, task_id, &item).await;
                }
            }
        }
    }
}

/// One task's lifecycle: running → success, or failed with bounded
/// backoff retries for transient codes.
async fn run_task(ctx: &WorkerCtx, task_id: i64, item: &WorkItem) {
    for (path, err) in item.skipped.iter() {
        let _ = ctx
            .journal
            .append_log(task_id, &format!("index: skipped {}: {}", path, err));
    }

    let started = Instant::now();
    loop {
        let task = match ctx.journal.mark_running(task_id) {
            Ok(task) => task,
            Err(e) => {
                tracing::error!(task = task_id, error = %e, "cannot mark task running");
                return;
            }
        };
        publish_task(&ctx.events, &ctx.journal, task_id);

        match attempt(ctx, task_id, item).await {
            Ok(success) => {
                if let Some(applied) = &success.applied {
                    if let Err(e) =
                        ctx.store
                            .save(&ctx.project, &ctx.node_id, task_id, applied)
                    {
                        tracing::error!(task = task_id, error = %e, "applied manifest write failed");
                        let _ = ctx.journal.mark_failed(
                            task_id,
                            ErrorCode::Eacces,
                            &format!("applied manifest write failed: {e}"),
                        );
                        publish_task(&ctx.events, &ctx.journal, task_id);
                        return;
                    }
                }
                let duration_ms = started.elapsed().as_millis() as u64;
                if let Err(e) = ctx.journal.mark_success(
                    task_id,
                    success.bytes,
                    success.blocks,
                    duration_ms,
                    success.code,
                ) {
                    tracing::error!(task = task_id, error = %e, "cannot mark task success");
                }
                publish_task(&ctx.events, &ctx.journal, task_id);
                return;
            }
            Err(failure) => {
                let _ = ctx.journal.append_log(task_id, &failure.message);
                let failed = match ctx
                    .journal
                    .mark_failed(task_id, failure.code, &failure.message)
                {
                    Ok(task) => task,
                    Err(e) => {
                        tracing::error!(task = task_id, error = %e, "cannot mark task failed");
                        return;
                    }
                };
                publish_task(&ctx.events, &ctx.journal, task_id);

                let retriable = failure.code.is_transient()
                    && failed.attempts < ctx.sched.retry_max_attempts;
                if !retriable {
                    return;
                }

                if ctx.journal.mark_retrying(task_id).is_err() {
                    return;
                }
                publish_task(&ctx.events, &ctx.journal, task_id);

                let delay = backoff_delay(ctx.sched.retry_base_ms, failed.attempts);
                tracing::info!(task = task_id, attempt = failed.attempts, delay_ms = delay.as_millis() as u64,
                    "transient failure, backing off");
                tokio::select! {
                    _ = ctx.token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

struct AttemptSuccess {
    bytes: u64,
    blocks: u64,
    code: Option<ErrorCode>,
    applied: Option<Manifest>,
}

struct AttemptFailure {
    code: ErrorCode,
    message: String,
}

async fn attempt(
    ctx: &WorkerCtx,
    task_id: i64,
    item: &WorkItem,
) -> Result<AttemptSuccess, AttemptFailure> {
    // Entire source under ignore: success, zero ops, empty applied map.
    if item.all_ignored {
        return Ok(AttemptSuccess {
            bytes: 0,
            blocks: 0,
            code: Some(ErrorCode::IgnoredByRule),
            applied: Some(Manifest::new()),
        });
    }

    let merged = item
        .config
        .ignore_set_for(Some(&item.binding), ctx.sched.fold_case)
        .map_err(|e| AttemptFailure {
            code: ErrorCode::Eacces,
            message: format!("ignore rules: {e}"),
        })?;
    let filtered = filter_manifest(&item.source, &merged);

    let target_view = if item.enumerate && item.binding.strategy == SyncStrategy::Mirror {
        ctx.executor
            .enumerate(&ctx.node_id, &item.binding.target_path, &merged)
            .await
            .map_err(|f| AttemptFailure {
                code: f.code,
                message: format!("target enumeration: {}", f.message),
            })?
    } else {
        ctx.store
            .load(&ctx.project, &ctx.node_id)
            .ok()
            .flatten()
            .map(|stored| stored.manifest)
            .unwrap_or_default()
    };

    let opts = DeltaOptions::for_binding(&item.config, &item.binding);
    let plan = compute_delta(&filtered, &target_view, &opts);

    if plan.is_empty() {
        let code = if filtered.is_empty() && !item.source.is_empty() {
            Some(ErrorCode::IgnoredByRule)
        } else {
            None
        };
        return Ok(AttemptSuccess {
            bytes: 0,
            blocks: 0,
            code,
            applied: Some(filtered),
        });
    }

    let request = ExecuteRequest {
        task_id,
        project: ctx.project.clone(),
        node_id: ctx.node_id.clone(),
        target_path: item.binding.target_path.clone(),
        ops: plan.ops,
        abort_on_error: item.binding.strategy == SyncStrategy::Mirror,
        preserve_mode: item.config.preserve_mode && !item.config.ignore_permissions,
        preserve_mtime: item.config.preserve_mtime,
        chunks: item.chunks.clone(),
    };

    let deadline = Duration::from_secs(ctx.sched.task_deadline_secs.max(1));
    let outcome = tokio::select! {
        _ = ctx.token.cancelled() => {
            return Err(AttemptFailure {
                code: ErrorCode::Deadline,
                message: "scheduler shutting down".to_string(),
            });
        }
        outcome = tokio::time::timeout(deadline, ctx.executor.execute(request)) => outcome,
    };
    match outcome {
        Err(_) => Err(AttemptFailure {
            code: ErrorCode::Deadline,
            message: format!("task exceeded {}s deadline", deadline.as_secs()),
        }),
        Ok(Err(failure)) => Err(AttemptFailure {
            code: failure.code,
            message: failure.message,
        }),
        Ok(Ok(outcome)) if outcome.ok() => Ok(AttemptSuccess {
            bytes: plan.bytes,
            blocks: plan.blocks,
            code: None,
            applied: Some(filtered),
        }),
        Ok(Ok(outcome)) => Err(AttemptFailure {
            code: outcome.error_code(),
            message: outcome.error_message(),
        }),
    }
}

/// Exponential backoff with jitter, capped at one minute.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let base = base_ms.max(1);
    let exp = base.saturating_mul(1u64 << attempt.min(10));
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis((exp + jitter).min(60_000))
}

/// Restrict a source manifest to the merged (project + node) ignore set.
pub(crate) fn filter_manifest(source: &Manifest, ignore: &IgnoreSet) -> Manifest {
    let mut out = Manifest::new();
    for (path, entry) in source.iter() {
        if !ignore.is_ignored(path, entry.is_dir()) {
            out.insert(path.clone(), entry.clone());
        }
    }
    out
}

/// Journal first, then broadcast — a subscriber can always query the task
/// an event names.
pub(crate) fn publish_task(events: &EventBus, journal: &TaskJournal, task_id: i64) {
    match journal.get(task_id, false) {
        Ok(Some(task)) => events.publish(EventKind::SyncTaskEvent, &task),
        Ok(None) => {}
        Err(e) => tracing::warn!(task = task_id, error = %e, "cannot load task for event"),
    }
}
