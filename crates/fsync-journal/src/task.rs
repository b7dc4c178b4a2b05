// task.rs — The task record and its status lifecycle.
//
// The lifecycle:
//
//   pending ──► running ──► success
//                 │   │
//                 │   └──► failed ──► retrying ──► running
//                 └──────────────────► failed (terminal)
//
// plus pending → failed for tasks rejected at scheduling time
// (INVALID_TARGET never reaches running). Transition validity is enforced
// in exactly one place: `TaskStatus::can_transition`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error_code::ErrorCode;

/// Where a task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Retrying,
}

impl TaskStatus {
    /// Whether the lifecycle permits `self → to`.
    pub fn can_transition(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Success)
                | (Running, Failed)
                | (Failed, Retrying)
                | (Retrying, Running)
        )
    }

    /// Terminal states survive until pruned; nothing moves out of them
    /// except failed → retrying.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        })
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            _ => Err(()),
        }
    }
}

/// One appended log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLogLine {
    pub at: DateTime<Utc>,
    pub line: String,
}

/// One (project, node) sync attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
    pub id: i64,
    pub project_name: String,
    pub node_id: String,
    pub status: TaskStatus,
    pub bytes: u64,
    pub blocks: u64,
    pub duration_ms: u64,
    /// How many times this task has entered `running`.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub error_code: Option<ErrorCode>,
    /// Present only when the caller asked for logs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<TaskLogLine>,
}
