// store.rs — NodeStore: SQLite-backed node records.
//
// All registry state lives in the shared hub database. Timestamps are
// RFC 3339 TEXT; enums are their canonical display strings.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use fsync_store::Db;

use crate::error::RegistryError;
use crate::model::{ConnectionStatus, Node, NodeHealth, NodeKind};
use crate::token::generate_token;

/// Persistent store for node records.
#[derive(Clone)]
pub struct NodeStore {
    db: Db,
}

impl NodeStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Create a node. Returns the full record including the one-time
    /// pairing token — the only moment it is handed out.
    pub fn create(
        &self,
        name: &str,
        address: &str,
        kind: NodeKind,
    ) -> Result<Node, RegistryError> {
        if self.get_by_name(name)?.is_some() {
            return Err(RegistryError::NameTaken(name.to_string()));
        }
        let now = Utc::now();
        let node = Node {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            address: address.to_string(),
            kind,
            agent_token: Some(generate_token()),
            agent_cert_fingerprint: None,
            agent_version: None,
            connection_status: ConnectionStatus::Unpaired,
            health: NodeHealth::Unknown,
            last_seen: None,
            created_at: now,
            updated_at: now,
        };
        self.db.with_conn(|c| {
            c.execute(
                "INSERT INTO nodes (id, name, address, kind, agent_token,
                                    agent_cert_fingerprint, agent_version,
                                    connection_status, health, last_seen,
                                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    node.id,
                    node.name,
                    node.address,
                    node.kind.to_string(),
                    node.agent_token,
                    node.agent_cert_fingerprint,
                    node.agent_version,
                    node.connection_status.to_string(),
                    node.health.to_string(),
                    node.last_seen.map(|t| t.to_rfc3339()),
                    node.created_at.to_rfc3339(),
                    node.updated_at.to_rfc3339(),
                ],
            )
        })?;
        Ok(node)
    }

    pub fn get(&self, id: &str) -> Result<Option<Node>, RegistryError> {
        self.query_one("SELECT * FROM nodes WHERE id = ?1", id)
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<Node>, RegistryError> {
        self.query_one("SELECT * FROM nodes WHERE name = ?1", name)
    }

    pub fn get_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Node>, RegistryError> {
        self.query_one(
            "SELECT * FROM nodes WHERE agent_cert_fingerprint = ?1",
            fingerprint,
        )
    }

    pub fn get_by_token(&self, token: &str) -> Result<Option<Node>, RegistryError> {
        self.query_one("SELECT * FROM nodes WHERE agent_token = ?1", token)
    }

    pub fn list(&self) -> Result<Vec<Node>, RegistryError> {
        let rows = self.db.with_conn(|c| {
            let mut stmt = c.prepare("SELECT * FROM nodes ORDER BY name")?;
            let rows = stmt
                .query_map([], row_to_raw)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(raw_to_node).collect()
    }

    /// Update the operator-editable fields.
    pub fn update(
        &self,
        id: &str,
        name: &str,
        address: &str,
        kind: NodeKind,
    ) -> Result<Node, RegistryError> {
        if let Some(other) = self.get_by_name(name)? {
            if other.id != id {
                return Err(RegistryError::NameTaken(name.to_string()));
            }
        }
        let updated = self.db.with_conn(|c| {
            c.execute(
                "UPDATE nodes SET name = ?2, address = ?3, kind = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![id, name, address, kind.to_string(), Utc::now().to_rfc3339()],
            )
        })?;
        if updated == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        self.require(id)
    }

    pub fn delete(&self, id: &str) -> Result<bool, RegistryError> {
        let n = self
            .db
            .with_conn(|c| c.execute("DELETE FROM nodes WHERE id = ?1", [id]))?;
        Ok(n > 0)
    }

    /// Issue a new token. Does not disturb an existing pairing.
    pub fn rotate_token(&self, id: &str) -> Result<Node, RegistryError> {
        let token = generate_token();
        let updated = self.db.with_conn(|c| {
            c.execute(
                "UPDATE nodes SET agent_token = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, token, Utc::now().to_rfc3339()],
            )
        })?;
        if updated == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        self.require(id)
    }

    /// Clear the pinned fingerprint; the node must pair again.
    pub fn reset_pairing(&self, id: &str) -> Result<Node, RegistryError> {
        let updated = self.db.with_conn(|c| {
            c.execute(
                "UPDATE nodes SET agent_cert_fingerprint = NULL,
                                  connection_status = ?2, updated_at = ?3
                 WHERE id = ?1",
                params![
                    id,
                    ConnectionStatus::Unpaired.to_string(),
                    Utc::now().to_rfc3339()
                ],
            )
        })?;
        if updated == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        self.require(id)
    }

    /// Pin a fingerprint during first connect. Fails if one is already set
    /// — pinning happens exactly once per pairing.
    pub fn pin_fingerprint(&self, id: &str, fingerprint: &str) -> Result<Node, RegistryError> {
        let updated = self.db.with_conn(|c| {
            c.execute(
                "UPDATE nodes SET agent_cert_fingerprint = ?2,
                                  connection_status = ?3, updated_at = ?4
                 WHERE id = ?1 AND agent_cert_fingerprint IS NULL",
                params![
                    id,
                    fingerprint,
                    ConnectionStatus::Connected.to_string(),
                    Utc::now().to_rfc3339()
                ],
            )
        })?;
        if updated == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        self.require(id)
    }

    pub fn set_connection_status(
        &self,
        id: &str,
        status: ConnectionStatus,
    ) -> Result<(), RegistryError> {
        let health = match status {
            ConnectionStatus::Connected => NodeHealth::Healthy,
            ConnectionStatus::Disconnected => NodeHealth::Offline,
            ConnectionStatus::Unpaired | ConnectionStatus::Unknown => NodeHealth::Unknown,
        };
        self.db.with_conn(|c| {
            c.execute(
                "UPDATE nodes SET connection_status = ?2, health = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![
                    id,
                    status.to_string(),
                    health.to_string(),
                    Utc::now().to_rfc3339()
                ],
            )
        })?;
        Ok(())
    }

    pub fn set_health(&self, id: &str, health: NodeHealth) -> Result<(), RegistryError> {
        self.db.with_conn(|c| {
            c.execute(
                "UPDATE nodes SET health = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, health.to_string(), Utc::now().to_rfc3339()],
            )
        })?;
        Ok(())
    }

    /// Stamp `last_seen`; called on every inbound frame.
    pub fn touch_last_seen(&self, id: &str) -> Result<(), RegistryError> {
        self.db.with_conn(|c| {
            c.execute(
                "UPDATE nodes SET last_seen = ?2 WHERE id = ?1",
                params![id, Utc::now().to_rfc3339()],
            )
        })?;
        Ok(())
    }

    pub fn set_agent_version(&self, id: &str, version: &str) -> Result<(), RegistryError> {
        self.db.with_conn(|c| {
            c.execute(
                "UPDATE nodes SET agent_version = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, version, Utc::now().to_rfc3339()],
            )
        })?;
        Ok(())
    }

    fn require(&self, id: &str) -> Result<Node, RegistryError> {
        self.get(id)?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    fn query_one(&self, sql: &str, arg: &str) -> Result<Option<Node>, RegistryError> {
        let raw = self
            .db
            .with_conn(|c| c.query_row(sql, [arg], row_to_raw).optional())?;
        raw.map(raw_to_node).transpose()
    }
}

/// Intermediate row shape: everything as owned strings, parsed afterward
/// so enum errors carry the node id.
type RawNode = (
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    Option<String>,
    String,
    String,
);

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawNode> {
    Ok((
        row.get("id")?,
        row.get("name")?,
        row.get("address")?,
        row.get("kind")?,
        row.get("agent_token")?,
        row.get("agent_cert_fingerprint")?,
        row.get("agent_version")?,
        row.get("connection_status")?,
        row.get("health")?,
        row.get("last_seen")?,
        row.get("created_at")?,
        row.get("updated_at")?,
    ))
}

fn raw_to_node(raw: RawNode) -> Result<Node, RegistryError> {
    let (
        id,
        name,
        address,
        kind,
        agent_token,
        agent_cert_fingerprint,
        agent_version,
        connection_status,
        health,
        last_seen,
        created_at,
        updated_at,
    ) = raw;

    fn corrupt(id: &str, field: &'static str, value: &str) -> RegistryError {
        RegistryError::CorruptRecord {
            id: id.to_string(),
            field,
            value: value.to_string(),
        }
    }
    fn parse_time(id: &str, field: &'static str, value: &str) -> Result<DateTime<Utc>, RegistryError> {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| corrupt(id, field, value))
    }

    let kind = kind
        .parse::<NodeKind>()
        .map_err(|_| corrupt(&id, "kind", &kind))?;
    let connection_status = connection_status
        .parse::<ConnectionStatus>()
        .map_err(|_| corrupt(&id, "connection_status", &connection_status))?;
    let health = health
        .parse::<NodeHealth>()
        .map_err(|_| corrupt(&id, "health", &health))?;
    let last_seen = match last_seen {
        Some(v) => Some(parse_time(&id, "last_seen", &v)?),
        None => None,
    };
    let created_at = parse_time(&id, "created_at", &created_at)?;
    let updated_at = parse_time(&id, "updated_at", &updated_at)?;

    Ok(Node {
        id,
        name,
        address,
        kind,
        agent_token,
        agent_cert_fingerprint,
        agent_version,
        connection_status,
        health,
        last_seen,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> NodeStore {
        NodeStore::new(Db::open_in_memory().unwrap())
    }

    #[test]
    fn create_issues_a_token_and_starts_unpaired() {
        let s = store();
        let node = s.create("edge-1", "10.0.0.5:9111", NodeKind::Agent).unwrap();

        assert_eq!(node.connection_status, ConnectionStatus::Unpaired);
        assert!(node.agent_token.is_some());
        assert!(node.agent_cert_fingerprint.is_none());

        let found = s.get(&node.id).unwrap().unwrap();
        assert_eq!(found.name, "edge-1");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let s = store();
        s.create("edge-1", "a", NodeKind::Agent).unwrap();
        assert!(matches!(
            s.create("edge-1", "b", NodeKind::Agent),
            Err(RegistryError::NameTaken(_))
        ));
    }

    #[test]
    fn rotate_token_keeps_the_pairing() {
        let s = store();
        let node = s.create("edge-1", "a", NodeKind::Agent).unwrap();
        s.pin_fingerprint(&node.id, "f1").unwrap();

        let before = s.get(&node.id).unwrap().unwrap();
        let rotated = s.rotate_token(&node.id).unwrap();

        assert_ne!(rotated.agent_token, before.agent_token);
        assert_eq!(rotated.agent_cert_fingerprint.as_deref(), Some("f1"));
    }

    #[test]
    fn pin_fingerprint_is_once_only() {
        let s = store();
        let node = s.create("edge-1", "a", NodeKind::Agent).unwrap();

        s.pin_fingerprint(&node.id, "f1").unwrap();
        // A second pin must not overwrite the first.
        assert!(s.pin_fingerprint(&node.id, "f2").is_err());
        let n = s.get(&node.id).unwrap().unwrap();
        assert_eq!(n.agent_cert_fingerprint.as_deref(), Some("f1"));
    }

    #[test]
    fn reset_pairing_clears_fingerprint_and_unpairs() {
        let s = store();
        let node = s.create("edge-1", "a", NodeKind::Agent).unwrap();
        s.pin_fingerprint(&node.id, "f1").unwrap();

        let reset = s.reset_pairing(&node.id).unwrap();
        assert!(reset.agent_cert_fingerprint.is_none());
        assert_eq!(reset.connection_status, ConnectionStatus::Unpaired);

        // And the node can pair again afterwards.
        s.pin_fingerprint(&node.id, "f2").unwrap();
    }

    #[test]
    fn status_transitions_update_health() {
        let s = store();
        let node = s.create("edge-1", "a", NodeKind::Agent).unwrap();

        s.set_connection_status(&node.id, ConnectionStatus::Connected)
            .unwrap();
        let n = s.get(&node.id).unwrap().unwrap();
        assert_eq!(n.health, NodeHealth::Healthy);

        s.set_connection_status(&node.id, ConnectionStatus::Disconnected)
            .unwrap();
        let n = s.get(&node.id).unwrap().unwrap();
        assert_eq!(n.health, NodeHealth::Offline);
    }

    #[test]
    fn lookup_by_token_and_fingerprint() {
        let s = store();
        let node = s.create("edge-1", "a", NodeKind::Agent).unwrap();
        let token = node.agent_token.clone().unwrap();

        assert_eq!(s.get_by_token(&token).unwrap().unwrap().id, node.id);
        assert!(s.get_by_fingerprint("f1").unwrap().is_none());

        s.pin_fingerprint(&node.id, "f1").unwrap();
        assert_eq!(s.get_by_fingerprint("f1").unwrap().unwrap().id, node.id);
    }

    #[test]
    fn delete_unpairs_and_forgets() {
        let s = store();
        let node = s.create("edge-1", "a", NodeKind::Agent).unwrap();
        assert!(s.delete(&node.id).unwrap());
        assert!(!s.delete(&node.id).unwrap());
        assert!(s.get(&node.id).unwrap().is_none());
    }

    #[test]
    fn update_renames_within_uniqueness() {
        let s = store();
        let a = s.create("a", "x", NodeKind::Agent).unwrap();
        s.create("b", "y", NodeKind::Agent).unwrap();

        assert!(matches!(
            s.update(&a.id, "b", "x", NodeKind::Agent),
            Err(RegistryError::NameTaken(_))
        ));
        let renamed = s.update(&a.id, "a2", "x2", NodeKind::Ssh).unwrap();
        assert_eq!(renamed.name, "a2");
        assert_eq!(renamed.kind, NodeKind::Ssh);
    }

    #[test]
    fn touch_last_seen_stamps_time() {
        let s = store();
        let node = s.create("edge-1", "a", NodeKind::Agent).unwrap();
        assert!(node.last_seen.is_none());
        s.touch_last_seen(&node.id).unwrap();
        assert!(s.get(&node.id).unwrap().unwrap().last_seen.is_some());
    }
}
