// executor.rs — The seam between scheduling and transport.
//
// The worker neither knows nor cares whether a node sits behind a TLS
// session or a local directory: it hands the executor a plan and gets back
// an outcome. The control-plane transport implements this trait for real
// agents; LoopbackExecutor applies in-process for local targets and tests.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use fsync_apply::{Applier, ApplyOptions, ChunkCache};
use fsync_delta::SyncOp;
use fsync_ignore::IgnoreSet;
use fsync_journal::ErrorCode;
use fsync_manifest::Manifest;

use crate::chunksrc::{ChunkFetchError, ChunkResolver};

/// One task's worth of work for an executor.
pub struct ExecuteRequest {
    pub task_id: i64,
    pub project: String,
    pub node_id: String,
    pub target_path: String,
    pub ops: Vec<SyncOp>,
    /// Mirror aborts on the first hard error; overlay keeps going.
    pub abort_on_error: bool,
    pub preserve_mode: bool,
    pub preserve_mtime: bool,
    /// Source of chunk bytes for NEED_CHUNKS resolution.
    pub chunks: Arc<ChunkResolver>,
}

/// Per-path failures surfaced by the apply side.
#[derive(Debug, Clone)]
pub struct PathFailure {
    pub path: String,
    pub errno: u32,
    pub message: String,
}

/// What the apply side reported.
#[derive(Debug, Default)]
pub struct ExecuteOutcome {
    pub applied: usize,
    pub failures: Vec<PathFailure>,
    pub aborted: bool,
}

impl ExecuteOutcome {
    pub fn ok(&self) -> bool {
        self.failures.is_empty() && !self.aborted
    }

    /// Map the first failure onto the stable error taxonomy.
    pub fn error_code(&self) -> ErrorCode {
        match self.failures.first().map(|f| f.errno) {
            Some(2) => ErrorCode::Enoent,
            Some(28) => ErrorCode::Enospc,
            _ => ErrorCode::Eacces,
        }
    }

    pub fn error_message(&self) -> String {
        self.failures
            .first()
            .map(|f| format!("{}: {}", f.path, f.message))
            .unwrap_or_else(|| "apply failed".to_string())
    }
}

/// A task-level failure before or during transfer (as opposed to per-path
/// apply errors inside an outcome).
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ExecuteFailure {
    pub code: ErrorCode,
    pub message: String,
}

impl ExecuteFailure {
    pub fn proto(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Proto,
            message: message.into(),
        }
    }
}

/// The transport seam.
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    /// Whether the node can accept a task right now.
    fn is_connected(&self, node_id: &str) -> bool;

    /// Ship the plan and apply it at the target.
    async fn execute(&self, req: ExecuteRequest) -> Result<ExecuteOutcome, ExecuteFailure>;

    /// Walk the node's target (the mirror fast-delete correction pass).
    async fn enumerate(
        &self,
        node_id: &str,
        target_path: &str,
        ignore: &IgnoreSet,
    ) -> Result<Manifest, ExecuteFailure>;
}

/// Applies plans in-process against local directories. Used for targets on
/// the hub host itself and throughout the scheduler's tests.
#[derive(Default)]
pub struct LoopbackExecutor {
    offline: RwLock<HashSet<String>>,
}

impl LoopbackExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a node dropping off (tests and maintenance).
    pub fn set_connected(&self, node_id: &str, connected: bool) {
        let mut offline = self.offline.write().expect("offline set poisoned");
        if connected {
            offline.remove(node_id);
        } else {
            offline.insert(node_id.to_string());
        }
    }
}

#[async_trait]
impl TaskExecutor for LoopbackExecutor {
    fn is_connected(&self, node_id: &str) -> bool {
        !self
            .offline
            .read()
            .expect("offline set poisoned")
            .contains(node_id)
    }

    async fn execute(&self, req: ExecuteRequest) -> Result<ExecuteOutcome, ExecuteFailure> {
        if !self.is_connected(&req.node_id) {
            return Err(ExecuteFailure::proto("node is offline"));
        }
        // Apply on the blocking pool: the engine is synchronous file I/O.
        let outcome = tokio::task::spawn_blocking(move || -> Result<ExecuteOutcome, ExecuteFailure> {
            let target = std::path::PathBuf::from(&req.target_path);
            // First sync of a fresh node creates its target, same as the
            // remote agent does.
            std::fs::create_dir_all(&target).map_err(|e| ExecuteFailure {
                code: ErrorCode::Eacces,
                message: format!("cannot create target {}: {e}", target.display()),
            })?;
            let cache = ChunkCache::new(target.join(".fsync-cache")).map_err(|e| ExecuteFailure {
                code: ErrorCode::Eacces,
                message: e.to_string(),
            })?;
            let applier = Applier::new(
                &target,
                cache,
                ApplyOptions {
                    abort_on_error: req.abort_on_error,
                    preserve_mode: req.preserve_mode,
                    preserve_mtime: req.preserve_mtime,
                },
            )
            .map_err(|e| ExecuteFailure {
                code: ErrorCode::Enoent,
                message: e.to_string(),
            })?;

            let chunks = req.chunks.clone();
            let report = applier.apply_plan(&req.ops, |missing| {
                chunks.fetch(missing).map_err(|e| match e {
                    ChunkFetchError::Io { path, source } => fsync_apply::ApplyError::Io {
                        path: path.into(),
                        source,
                    },
                    other => fsync_apply::ApplyError::ChunkHashMismatch {
                        hash: other.to_string(),
                    },
                })
            });

            Ok(ExecuteOutcome {
                applied: report.applied,
                aborted: report.aborted,
                failures: report
                    .failures
                    .into_iter()
                    .map(|f| PathFailure {
                        path: f.path,
                        errno: f.errno,
                        message: f.message,
                    })
                    .collect(),
            })
        })
        .await
        .map_err(|e| ExecuteFailure::proto(format!("apply task panicked: {e}")))??;

        Ok(outcome)
    }

    async fn enumerate(
        &self,
        node_id: &str,
        target_path: &str,
        ignore: &IgnoreSet,
    ) -> Result<Manifest, ExecuteFailure> {
        if !self.is_connected(node_id) {
            return Err(ExecuteFailure::proto("node is offline"));
        }
        let target = std::path::PathBuf::from(target_path);
        let ignore = ignore.clone();
        tokio::task::spawn_blocking(move || {
            fsync_apply::enumerate_target(&target, &ignore).map_err(|e| ExecuteFailure {
                code: ErrorCode::Enoent,
                message: e.to_string(),
            })
        })
        .await
        .map_err(|e| ExecuteFailure::proto(format!("enumerate task panicked: {e}")))?
    }
}
