// scenarios.rs — End-to-end scheduling scenarios over the loopback
// executor: real source and target directories, real SQLite queue and
// journal, in-process apply.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fsync_events::EventBus;
use fsync_journal::{ErrorCode, TaskFilter, TaskJournal, TaskStatus};
use fsync_manifest::{
    BaselineLedger, ManifestStore, ProjectNodeBinding, ProjectSyncConfig, SyncStrategy,
};
use fsync_queue::{ChangeKind, ChangeQueue};
use fsync_sched::{
    LoopbackExecutor, ProjectConfigs, Scheduler, SchedulerConfig, SchedulerDeps,
};
use fsync_store::Db;

struct TestEnv {
    _root: TempDir,
    source: PathBuf,
    target: PathBuf,
    queue: ChangeQueue,
    journal: TaskJournal,
    configs: ProjectConfigs,
    executor: Arc<LoopbackExecutor>,
    scheduler: Scheduler,
    events: EventBus,
    node_online_tx: mpsc::UnboundedSender<String>,
}

const NODE: &str = "node-1";

fn binding(target: &Path, strategy: SyncStrategy) -> ProjectNodeBinding {
    ProjectNodeBinding {
        node_id: NODE.to_string(),
        target_path: target.to_string_lossy().into_owned(),
        strategy,
        ignore_patterns: Vec::new(),
        ignore_file: None,
        mirror_fast_delete: true,
        mirror_fast_fullscan_every: 20,
        mirror_clean_empty_dirs: true,
        mirror_sync_empty_dirs: false,
    }
}

fn start(mut config: ProjectSyncConfig) -> TestEnv {
    let root = TempDir::new().unwrap();
    let source = root.path().join("source");
    let target = root.path().join("target");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&target).unwrap();

    config.path = source.to_string_lossy().into_owned();
    if config.nodes.is_empty() {
        config.nodes = vec![binding(&target, SyncStrategy::Mirror)];
    } else {
        for b in &mut config.nodes {
            if b.target_path.is_empty() && b.node_id == NODE {
                b.target_path = target.to_string_lossy().into_owned();
            }
        }
    }

    let db = Db::open_in_memory().unwrap();
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let queue = ChangeQueue::new(db.clone(), notify_tx, 100);
    let journal = TaskJournal::new(db);
    let store = Arc::new(ManifestStore::new(root.path().join("manifests")).unwrap());
    let ledger = Arc::new(BaselineLedger::load(root.path().join("ledger.json")).unwrap());
    let events = EventBus::new(64);
    let executor = Arc::new(LoopbackExecutor::new());
    let configs = ProjectConfigs::new();
    configs.upsert(config);

    let (node_online_tx, node_online_rx) = mpsc::unbounded_channel();
    let scheduler = Scheduler::spawn(
        SchedulerDeps {
            queue: queue.clone(),
            configs: configs.clone(),
            journal: journal.clone(),
            store,
            ledger,
            events: events.clone(),
            executor: executor.clone(),
            config: SchedulerConfig::default(),
        },
        notify_rx,
        node_online_rx,
        CancellationToken::new(),
    );

    TestEnv {
        _root: root,
        source,
        target,
        queue,
        journal,
        configs,
        executor,
        scheduler,
        events,
        node_online_tx,
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

async fn wait_for_tasks(
    journal: &TaskJournal,
    predicate: impl Fn(&[fsync_journal::SyncTask]) -> bool,
) -> Vec<fsync_journal::SyncTask> {
    for _ in 0..200 {
        let tasks = journal
            .list(&TaskFilter { limit: Some(100), ..Default::default() }, false)
            .unwrap();
        if predicate(&tasks) {
            return tasks;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within 10s");
}

async fn wait_for_success_count(journal: &TaskJournal, n: usize) -> Vec<fsync_journal::SyncTask> {
    wait_for_tasks(journal, |tasks| {
        tasks.iter().filter(|t| t.status == TaskStatus::Success).count() >= n
    })
    .await
}

#[tokio::test(flavor = "multi_thread")]
async fn mirror_happy_path() {
    let env = start(ProjectSyncConfig::new("p", "placeholder"));
    write(&env.source, "a.txt", "A");
    write(&env.source, "b.txt", "B");

    env.queue.enqueue("p", None, ChangeKind::FullRescan).unwrap();
    let tasks = wait_for_success_count(&env.journal, 1).await;

    let done = tasks.iter().find(|t| t.status == TaskStatus::Success).unwrap();
    assert_eq!(done.bytes, 2);
    assert_eq!(
        std::fs::read_to_string(env.target.join("a.txt")).unwrap(),
        "A"
    );
    assert_eq!(
        std::fs::read_to_string(env.target.join("b.txt")).unwrap(),
        "B"
    );
    env.scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn mirror_delete_propagation() {
    let env = start(ProjectSyncConfig::new("p", "placeholder"));
    write(&env.source, "a.txt", "A");
    write(&env.source, "b.txt", "B");
    env.queue.enqueue("p", None, ChangeKind::FullRescan).unwrap();
    wait_for_success_count(&env.journal, 1).await;
    assert!(env.target.join("b.txt").exists());

    std::fs::remove_file(env.source.join("b.txt")).unwrap();
    env.queue
        .enqueue("p", Some("b.txt"), ChangeKind::Remove)
        .unwrap();
    wait_for_success_count(&env.journal, 2).await;

    assert!(!env.target.join("b.txt").exists());
    assert!(env.target.join("a.txt").exists());
    env.scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn overlay_preserves_extras() {
    let mut config = ProjectSyncConfig::new("p", "placeholder");
    config.nodes = vec![ProjectNodeBinding {
        target_path: String::new(),
        ..binding(Path::new(""), SyncStrategy::Overlay)
    }];
    let env = start(config);
    write(&env.source, "a.txt", "A");
    write(&env.source, "b.txt", "B");
    write(&env.target, "extra.txt", "X");

    env.queue.enqueue("p", None, ChangeKind::FullRescan).unwrap();
    wait_for_success_count(&env.journal, 1).await;

    assert_eq!(
        std::fs::read_to_string(env.target.join("a.txt")).unwrap(),
        "A"
    );
    assert_eq!(
        std::fs::read_to_string(env.target.join("extra.txt")).unwrap(),
        "X"
    );
    env.scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn ignore_negation_keeps_the_carved_out_subtree() {
    let mut config = ProjectSyncConfig::new("p", "placeholder");
    config.ignore_patterns = vec![
        "node_modules/**".to_string(),
        "!node_modules/keep/**".to_string(),
    ];
    let env = start(config);
    write(&env.source, "node_modules/lib/x", "L");
    write(&env.source, "node_modules/keep/y", "K");

    env.queue.enqueue("p", None, ChangeKind::FullRescan).unwrap();
    wait_for_success_count(&env.journal, 1).await;

    assert!(env.target.join("node_modules/keep/y").exists());
    assert!(!env.target.join("node_modules/lib").exists());
    env.scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_node_coalesces_to_one_task() {
    let env = start(ProjectSyncConfig::new("p", "placeholder"));
    env.executor.set_connected(NODE, false);

    for i in 0..10 {
        let rel = format!("f{}.txt", i);
        write(&env.source, &rel, "x");
        env.queue.enqueue("p", Some(&rel), ChangeKind::Write).unwrap();
    }

    // A single pending task appears and holds.
    wait_for_tasks(&env.journal, |tasks| {
        tasks.iter().any(|t| t.status == TaskStatus::Pending)
    })
    .await;
    // Give any extra cycles time to coalesce, then verify only one task.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let tasks = env
        .journal
        .list(&TaskFilter::default(), false)
        .unwrap();
    assert_eq!(tasks.len(), 1, "burst must coalesce into one task");

    env.executor.set_connected(NODE, true);
    env.node_online_tx.send(NODE.to_string()).unwrap();

    wait_for_success_count(&env.journal, 1).await;
    let tasks = env.journal.list(&TaskFilter::default(), false).unwrap();
    assert_eq!(tasks.len(), 1);
    for i in 0..10 {
        assert!(env.target.join(format!("f{}.txt", i)).exists());
    }
    env.scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_target_fails_at_scheduling() {
    let mut config = ProjectSyncConfig::new("p", "placeholder");
    config.nodes = vec![ProjectNodeBinding {
        target_path: "/".to_string(),
        ..binding(Path::new("/"), SyncStrategy::Mirror)
    }];
    let env = start(config);
    write(&env.source, "a.txt", "A");

    env.queue.enqueue("p", None, ChangeKind::FullRescan).unwrap();
    let tasks = wait_for_tasks(&env.journal, |tasks| {
        tasks.iter().any(|t| t.status == TaskStatus::Failed)
    })
    .await;

    let failed = tasks.iter().find(|t| t.status == TaskStatus::Failed).unwrap();
    assert_eq!(failed.error_code, Some(ErrorCode::InvalidTarget));
    // Never ran.
    assert!(failed.started_at.is_none());
    env.scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn fully_ignored_source_succeeds_with_zero_ops() {
    let env = start(ProjectSyncConfig::new("p", "placeholder"));
    // Only default-ignored content in the source.
    write(&env.source, ".git/HEAD", "ref: refs/heads/main");

    env.queue.enqueue("p", None, ChangeKind::FullRescan).unwrap();
    let tasks = wait_for_success_count(&env.journal, 1).await;

    let done = tasks.iter().find(|t| t.status == TaskStatus::Success).unwrap();
    assert_eq!(done.error_code, Some(ErrorCode::IgnoredByRule));
    assert_eq!(done.bytes, 0);
    assert!(!env.target.join(".git").exists());
    env.scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn disabled_project_drains_without_tasks() {
    let mut config = ProjectSyncConfig::new("p", "placeholder");
    config.enabled = false;
    let env = start(config);
    write(&env.source, "a.txt", "A");

    env.queue.enqueue("p", None, ChangeKind::FullRescan).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(env.journal.list(&TaskFilter::default(), false).unwrap().is_empty());
    assert_eq!(env.queue.depth("p").unwrap(), 0);
    assert!(!env.target.join("a.txt").exists());
    env.scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn task_events_follow_journal_writes() {
    let env = start(ProjectSyncConfig::new("p", "placeholder"));
    let mut rx = env.events.subscribe();
    write(&env.source, "a.txt", "A");

    env.queue.enqueue("p", None, ChangeKind::FullRescan).unwrap();
    wait_for_success_count(&env.journal, 1).await;

    // Every received event names a task that is queryable right now.
    let mut saw_success = false;
    while let Ok(env_msg) = rx.try_recv() {
        let id = env_msg.data["id"].as_i64().expect("task id in event");
        let task = env.journal.get(id, false).unwrap().expect("task queryable");
        if task.status == TaskStatus::Success {
            saw_success = true;
        }
    }
    assert!(saw_success);
    env.scheduler.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn config_update_takes_effect_next_cycle() {
    let env = start(ProjectSyncConfig::new("p", "placeholder"));
    write(&env.source, "a.txt", "A");
    write(&env.source, "skip.log", "S");

    env.queue.enqueue("p", None, ChangeKind::FullRescan).unwrap();
    wait_for_success_count(&env.journal, 1).await;
    assert!(env.target.join("skip.log").exists());

    // Operator adds an ignore rule; the next cycle honors it.
    let mut updated = (*env.configs.get("p").unwrap()).clone();
    updated.ignore_patterns = vec!["*.log".to_string()];
    env.configs.upsert(updated);

    env.queue.enqueue("p", None, ChangeKind::FullRescan).unwrap();
    wait_for_success_count(&env.journal, 2).await;
    assert!(!env.target.join("skip.log").exists());
    assert!(env.target.join("a.txt").exists());
    env.scheduler.shutdown().await;
}
