// queue.rs — The durable FIFO of pending changes.
//
// Contract: persist before acknowledging the producer, notify the
// scheduler after the persist. Notification is fire-and-forget — losing a
// notification is harmless because a restart replays the queue and
// re-notifies every project that still has rows.

use chrono::{DateTime, Utc};
use rusqlite::params;
use tokio::sync::mpsc::UnboundedSender;

use fsync_store::Db;

use crate::change::{ChangeKind, SyncFileChange};
use crate::error::QueueError;

/// SQLite-backed change queue with scheduler notification.
#[derive(Clone)]
pub struct ChangeQueue {
    db: Db,
    notify_tx: UnboundedSender<String>,
    /// Queue depth per project above which health degrades.
    degraded_depth: u64,
}

impl ChangeQueue {
    pub fn new(db: Db, notify_tx: UnboundedSender<String>, degraded_depth: u64) -> Self {
        Self {
            db,
            notify_tx,
            degraded_depth,
        }
    }

    /// Persist one change, then notify the scheduler for its project.
    /// An error here means the change was NOT recorded.
    pub fn enqueue(
        &self,
        project: &str,
        path: Option<&str>,
        kind: ChangeKind,
    ) -> Result<SyncFileChange, QueueError> {
        let enqueued_at = Utc::now();
        let id = self.db.with_conn(|c| {
            c.execute(
                "INSERT INTO change_queue (project, path, kind, enqueued_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![project, path, kind.to_string(), enqueued_at.to_rfc3339()],
            )?;
            Ok(c.last_insert_rowid())
        })?;

        // Fire-and-forget, strictly after the persist succeeded.
        let _ = self.notify_tx.send(project.to_string());

        Ok(SyncFileChange {
            id,
            project_name: project.to_string(),
            path: path.map(str::to_string),
            kind,
            enqueued_at,
        })
    }

    /// Remove and return every pending change for one project, oldest
    /// first. The scheduler batches these into a single indexing pass.
    pub fn drain(&self, project: &str) -> Result<Vec<SyncFileChange>, QueueError> {
        let rows: Vec<(i64, Option<String>, String, String)> = self.db.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT id, path, kind, enqueued_at FROM change_queue
                 WHERE project = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map([project], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            c.execute("DELETE FROM change_queue WHERE project = ?1", [project])?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(id, path, kind, enqueued_at)| {
                let kind = kind
                    .parse::<ChangeKind>()
                    .map_err(|_| QueueError::CorruptRecord {
                        id,
                        kind: kind.clone(),
                    })?;
                Ok(SyncFileChange {
                    id,
                    project_name: project.to_string(),
                    path,
                    kind,
                    enqueued_at: DateTime::parse_from_rfc3339(&enqueued_at)
                        .map(|t| t.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .collect()
    }

    /// Current queue depth for one project.
    pub fn depth(&self, project: &str) -> Result<u64, QueueError> {
        let n: i64 = self.db.with_conn(|c| {
            c.query_row(
                "SELECT COUNT(*) FROM change_queue WHERE project = ?1",
                [project],
                |r| r.get(0),
            )
        })?;
        Ok(n as u64)
    }

    /// Whether the queue depth for this project crosses the degraded
    /// threshold.
    pub fn is_degraded(&self, project: &str) -> Result<bool, QueueError> {
        Ok(self.depth(project)? > self.degraded_depth)
    }

    /// Projects that still have pending rows.
    pub fn pending_projects(&self) -> Result<Vec<String>, QueueError> {
        let projects = self.db.with_conn(|c| {
            let mut stmt =
                c.prepare("SELECT DISTINCT project FROM change_queue ORDER BY project")?;
            let rows = stmt
                .query_map([], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        Ok(projects)
    }

    /// Re-notify every project with pending rows. Called once at startup
    /// so changes persisted before a crash are picked up again.
    pub fn replay(&self) -> Result<usize, QueueError> {
        let projects = self.pending_projects()?;
        for p in &projects {
            let _ = self.notify_tx.send(p.clone());
        }
        if !projects.is_empty() {
            tracing::info!(projects = projects.len(), "replayed pending change queue");
        }
        Ok(projects.len())
    }
}
