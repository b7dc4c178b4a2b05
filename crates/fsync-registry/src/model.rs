// model.rs — The node record and its enumerations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the hub reaches a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A Fleetsync agent speaking the control-plane protocol.
    Agent,
    /// A plain SSH endpoint (no agent installed).
    Ssh,
}

/// Live connection state, agent-contributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Unpaired,
    Unknown,
}

/// Operational health, derived from connection state and queue depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeHealth {
    Healthy,
    Degraded,
    Offline,
    Unknown,
}

/// One remote endpoint. The hub is authoritative for everything except
/// `connection_status`, `health`, `agent_version`, and `last_seen`, which
/// the transport layer keeps current.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    pub address: String,
    pub kind: NodeKind,
    /// One-time pairing token. Revealed only by create and rotate; the
    /// REST layer redacts it everywhere else.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_token: Option<String>,
    /// SHA-256 of the agent certificate, pinned on first connect and
    /// cleared only by an explicit pairing reset.
    pub agent_cert_fingerprint: Option<String>,
    pub agent_version: Option<String>,
    pub connection_status: ConnectionStatus,
    pub health: NodeHealth,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn is_paired(&self) -> bool {
        self.agent_cert_fingerprint.is_some()
    }

    /// Strip the token before handing the record to a listing response.
    pub fn redacted(mut self) -> Self {
        self.agent_token = None;
        self
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connected => "CONNECTED",
            Self::Disconnected => "DISCONNECTED",
            Self::Unpaired => "UNPAIRED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECTED" => Ok(Self::Connected),
            "DISCONNECTED" => Ok(Self::Disconnected),
            "UNPAIRED" => Ok(Self::Unpaired),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::Offline => "OFFLINE",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for NodeHealth {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HEALTHY" => Ok(Self::Healthy),
            "DEGRADED" => Ok(Self::Degraded),
            "OFFLINE" => Ok(Self::Offline),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Agent => "agent",
            Self::Ssh => "ssh",
        })
    }
}

impl std::str::FromStr for NodeKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(Self::Agent),
            "ssh" => Ok(Self::Ssh),
            _ => Err(()),
        }
    }
}
