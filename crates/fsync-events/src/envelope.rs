// envelope.rs — The wire shape every UI subscriber sees.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message types on the WebSocket channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SyncTaskEvent,
    SyncNodeEvent,
    HookTriggered,
    VersionSwitched,
    ProjectManaged,
    Ping,
    Pong,
    Connected,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncTaskEvent => "sync_task_event",
            Self::SyncNodeEvent => "sync_node_event",
            Self::HookTriggered => "hook_triggered",
            Self::VersionSwitched => "version_switched",
            Self::ProjectManaged => "project_managed",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Connected => "connected",
        }
    }
}

/// One event on the channel: `{type, timestamp, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(kind: EventKind, data: impl Serialize) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn bare(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data: serde_json::Value::Null,
        }
    }

    /// The `{type:"pong"}` reply to a client ping.
    pub fn pong() -> Self {
        Self::bare(EventKind::Pong)
    }

    /// The greeting sent when a client attaches.
    pub fn connected() -> Self {
        Self::bare(EventKind::Connected)
    }
}
