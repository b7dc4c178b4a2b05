// change.rs — One unit of pending sync work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened to the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    Write,
    Remove,
    Rename,
    Chmod,
    /// No specific path: re-index the whole project. Emitted by the
    /// deployment path and the manual "run now" trigger.
    FullRescan,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Write => "write",
            Self::Remove => "remove",
            Self::Rename => "rename",
            Self::Chmod => "chmod",
            Self::FullRescan => "full-rescan",
        })
    }
}

impl std::str::FromStr for ChangeKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "write" => Ok(Self::Write),
            "remove" => Ok(Self::Remove),
            "rename" => Ok(Self::Rename),
            "chmod" => Ok(Self::Chmod),
            "full-rescan" => Ok(Self::FullRescan),
            _ => Err(()),
        }
    }
}

/// A pending-work record. Consumed in FIFO order per project; ordering
/// across projects is not guaranteed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFileChange {
    pub id: i64,
    pub project_name: String,
    /// Relative path within the project; `None` for full rescans.
    pub path: Option<String>,
    pub kind: ChangeKind,
    pub enqueued_at: DateTime<Utc>,
}

impl SyncFileChange {
    /// Whether this change invalidates incremental indexing.
    pub fn is_full_rescan(&self) -> bool {
        self.kind == ChangeKind::FullRescan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_strings() {
        for k in [
            ChangeKind::Write,
            ChangeKind::Remove,
            ChangeKind::Rename,
            ChangeKind::Chmod,
            ChangeKind::FullRescan,
        ] {
            assert_eq!(k.to_string().parse::<ChangeKind>().unwrap(), k);
        }
    }

    #[test]
    fn full_rescan_serializes_kebab_case() {
        let json = serde_json::to_string(&ChangeKind::FullRescan).unwrap();
        assert_eq!(json, "\"full-rescan\"");
    }
}
