// journal.rs — TaskJournal: persistence for the task lifecycle.
//
// AUTOINCREMENT ids give the strictly-increasing order clients observe.
// Status changes go through one guarded transition method so an illegal
// move can never be written, no matter which subsystem asks for it.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use fsync_store::Db;

use crate::error::JournalError;
use crate::error_code::ErrorCode;
use crate::task::{SyncTask, TaskLogLine, TaskStatus};

/// Filters for listing and pruning tasks.
#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    pub project: Option<String>,
    pub node_id: Option<String>,
    pub status: Option<TaskStatus>,
    /// Cursor: only tasks with id strictly below this.
    pub before_id: Option<i64>,
    pub limit: Option<u32>,
}

/// SQLite-backed journal of sync tasks.
#[derive(Clone)]
pub struct TaskJournal {
    db: Db,
}

impl TaskJournal {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Create a pending task for one (project, node) pair.
    pub fn create(&self, project: &str, node_id: &str) -> Result<SyncTask, JournalError> {
        let now = Utc::now().to_rfc3339();
        let id = self.db.with_conn(|c| {
            c.execute(
                "INSERT INTO sync_tasks (project, node_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![project, node_id, TaskStatus::Pending.to_string(), now],
            )?;
            Ok(c.last_insert_rowid())
        })?;
        self.require(id)
    }

    pub fn get(&self, id: i64, include_logs: bool) -> Result<Option<SyncTask>, JournalError> {
        let task = self.db.with_conn(|c| {
            c.query_row("SELECT * FROM sync_tasks WHERE id = ?1", [id], row_to_raw)
                .optional()
        })?;
        let Some(raw) = task else {
            return Ok(None);
        };
        let mut task = raw_to_task(raw)?;
        if include_logs {
            task.logs = self.logs(id)?;
        }
        Ok(Some(task))
    }

    /// Move a task to `running`, stamping `started_at` and counting the
    /// attempt.
    pub fn mark_running(&self, id: i64) -> Result<SyncTask, JournalError> {
        self.transition(id, TaskStatus::Running, |c| {
            c.execute(
                "UPDATE sync_tasks
                 SET started_at = ?2, attempts = attempts + 1
                 WHERE id = ?1",
                params![id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }

    /// Terminal success with the transfer accounting.
    pub fn mark_success(
        &self,
        id: i64,
        bytes: u64,
        blocks: u64,
        duration_ms: u64,
        error_code: Option<ErrorCode>,
    ) -> Result<SyncTask, JournalError> {
        self.transition(id, TaskStatus::Success, |c| {
            c.execute(
                "UPDATE sync_tasks
                 SET bytes = ?2, blocks = ?3, duration_ms = ?4, error_code = ?5,
                     last_error = NULL
                 WHERE id = ?1",
                params![
                    id,
                    bytes as i64,
                    blocks as i64,
                    duration_ms as i64,
                    error_code.map(|e| e.as_str())
                ],
            )?;
            Ok(())
        })
    }

    /// Failure with a stable code and free-text detail.
    pub fn mark_failed(
        &self,
        id: i64,
        code: ErrorCode,
        message: &str,
    ) -> Result<SyncTask, JournalError> {
        self.transition(id, TaskStatus::Failed, |c| {
            c.execute(
                "UPDATE sync_tasks SET error_code = ?2, last_error = ?3 WHERE id = ?1",
                params![id, code.as_str(), message],
            )?;
            Ok(())
        })
    }

    /// Reclassify a transient failure for another attempt.
    pub fn mark_retrying(&self, id: i64) -> Result<SyncTask, JournalError> {
        self.transition(id, TaskStatus::Retrying, |_| Ok(()))
    }

    /// Append one log line to a task.
    pub fn append_log(&self, id: i64, line: &str) -> Result<(), JournalError> {
        self.db.with_conn(|c| {
            c.execute(
                "INSERT INTO sync_task_logs (task_id, at, line) VALUES (?1, ?2, ?3)",
                params![id, Utc::now().to_rfc3339(), line],
            )
        })?;
        Ok(())
    }

    pub fn logs(&self, id: i64) -> Result<Vec<TaskLogLine>, JournalError> {
        let rows: Vec<(String, String)> = self.db.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT at, line FROM sync_task_logs WHERE task_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map([id], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        Ok(rows
            .into_iter()
            .map(|(at, line)| TaskLogLine {
                at: parse_time_or_now(&at),
                line,
            })
            .collect())
    }

    /// Newest-first listing with a `before_id` cursor.
    pub fn list(&self, filter: &TaskFilter, include_logs: bool) -> Result<Vec<SyncTask>, JournalError> {
        let (where_sql, args) = filter_clause(filter);
        let limit = filter.limit.unwrap_or(50).min(500);
        let sql = format!(
            "SELECT * FROM sync_tasks {} ORDER BY id DESC LIMIT {}",
            where_sql, limit
        );

        let raws = self.db.with_conn(|c| {
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(args.iter()), row_to_raw)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut tasks = raws
            .into_iter()
            .map(raw_to_task)
            .collect::<Result<Vec<_>, _>>()?;
        if include_logs {
            for t in &mut tasks {
                t.logs = self.logs(t.id)?;
            }
        }
        Ok(tasks)
    }

    /// Delete matching records. Active tasks survive unless
    /// `include_active` is set. Returns the number deleted; logs cascade.
    pub fn prune(&self, filter: &TaskFilter, include_active: bool) -> Result<usize, JournalError> {
        let (where_sql, mut args) = filter_clause(filter);
        let mut sql = format!("DELETE FROM sync_tasks {}", where_sql);
        if !include_active {
            if where_sql.is_empty() {
                sql.push_str(" WHERE status IN ('success', 'failed')");
            } else {
                sql.push_str(" AND status IN ('success', 'failed')");
            }
        }
        let n = self
            .db
            .with_conn(|c| c.execute(&sql, rusqlite::params_from_iter(args.drain(..))))?;
        Ok(n)
    }

    /// Whether any task for the project is currently running.
    pub fn any_running(&self, project: &str) -> Result<bool, JournalError> {
        let n: i64 = self.db.with_conn(|c| {
            c.query_row(
                "SELECT COUNT(*) FROM sync_tasks WHERE project = ?1 AND status = 'running'",
                [project],
                |r| r.get(0),
            )
        })?;
        Ok(n > 0)
    }

    /// Whether the newest terminal task for the project failed.
    pub fn recent_failure(&self, project: &str) -> Result<bool, JournalError> {
        let status: Option<String> = self.db.with_conn(|c| {
            c.query_row(
                "SELECT status FROM sync_tasks
                 WHERE project = ?1 AND status IN ('success', 'failed')
                 ORDER BY id DESC LIMIT 1",
                [project],
                |r| r.get(0),
            )
            .optional()
        })?;
        Ok(status.as_deref() == Some("failed"))
    }

    fn transition(
        &self,
        id: i64,
        to: TaskStatus,
        extra: impl FnOnce(&rusqlite::Connection) -> rusqlite::Result<()>,
    ) -> Result<SyncTask, JournalError> {
        let current = self
            .get(id, false)?
            .ok_or(JournalError::NotFound(id))?;
        if !current.status.can_transition(to) {
            return Err(JournalError::InvalidTransition {
                id,
                from: current.status,
                to,
            });
        }
        self.db.with_conn(|c| {
            c.execute(
                "UPDATE sync_tasks SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, to.to_string(), Utc::now().to_rfc3339()],
            )?;
            extra(c)?;
            Ok(())
        })?;
        self.require(id)
    }

    fn require(&self, id: i64) -> Result<SyncTask, JournalError> {
        self.get(id, false)?.ok_or(JournalError::NotFound(id))
    }
}

fn filter_clause(filter: &TaskFilter) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut args = Vec::new();
    if let Some(p) = &filter.project {
        args.push(p.clone());
        clauses.push(format!("project = ?{}", args.len()));
    }
    if let Some(n) = &filter.node_id {
        args.push(n.clone());
        clauses.push(format!("node_id = ?{}", args.len()));
    }
    if let Some(s) = filter.status {
        args.push(s.to_string());
        clauses.push(format!("status = ?{}", args.len()));
    }
    if let Some(b) = filter.before_id {
        args.push(b.to_string());
        clauses.push(format!("id < ?{}", args.len()));
    }
    if clauses.is_empty() {
        (String::new(), args)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), args)
    }
}

type RawTask = (
    i64,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    i64,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
);

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawTask> {
    Ok((
        row.get("id")?,
        row.get("project")?,
        row.get("node_id")?,
        row.get("status")?,
        row.get("bytes")?,
        row.get("blocks")?,
        row.get("duration_ms")?,
        row.get("attempts")?,
        row.get("created_at")?,
        row.get("started_at")?,
        row.get("updated_at")?,
        row.get("last_error")?,
        row.get("error_code")?,
    ))
}

fn raw_to_task(raw: RawTask) -> Result<SyncTask, JournalError> {
    let (
        id,
        project_name,
        node_id,
        status,
        bytes,
        blocks,
        duration_ms,
        attempts,
        created_at,
        started_at,
        updated_at,
        last_error,
        error_code,
    ) = raw;

    let status = status
        .parse::<TaskStatus>()
        .map_err(|_| JournalError::CorruptRecord {
            id,
            field: "status",
            value: status.clone(),
        })?;
    let error_code = match error_code {
        Some(v) => Some(v.parse::<ErrorCode>().map_err(|_| JournalError::CorruptRecord {
            id,
            field: "error_code",
            value: v.clone(),
        })?),
        None => None,
    };

    Ok(SyncTask {
        id,
        project_name,
        node_id,
        status,
        bytes: bytes.max(0) as u64,
        blocks: blocks.max(0) as u64,
        duration_ms: duration_ms.max(0) as u64,
        attempts: attempts.max(0) as u32,
        created_at: parse_time_or_now(&created_at),
        started_at: started_at.as_deref().map(parse_time_or_now),
        updated_at: parse_time_or_now(&updated_at),
        last_error,
        error_code,
        logs: Vec::new(),
    })
}

fn parse_time_or_now(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
