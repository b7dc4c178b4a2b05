// pairing.rs — The connect-time authorization decision.
//
// Order matters: a pinned fingerprint always wins, and a token can only
// bootstrap a node that has no pin yet. A valid token presented with the
// wrong certificate is useless — that is the whole point of pinning.

use crate::error::RegistryError;
use crate::model::{ConnectionStatus, Node};
use crate::store::NodeStore;

/// Outcome of one connection attempt.
#[derive(Debug)]
pub enum PairingDecision {
    /// The session may proceed. `newly_paired` marks a first connect that
    /// just pinned its fingerprint.
    Accepted { node: Node, newly_paired: bool },

    /// A known node, but the presented certificate does not match the pin.
    /// The session must be closed before any post-HELLO frame.
    PairingRequired { node_id: String },

    /// Neither fingerprint nor token identify any node.
    UnknownAgent,
}

/// Decide whether a connecting agent may open a session.
///
/// `fingerprint` is the SHA-256 of the certificate presented in the TLS
/// handshake; `token` is whatever the agent put in its HELLO (empty once
/// paired).
pub fn authorize(
    store: &NodeStore,
    token: &str,
    fingerprint: &str,
) -> Result<PairingDecision, RegistryError> {
    // Pinned fingerprint: the strongest identity, token irrelevant.
    if let Some(node) = store.get_by_fingerprint(fingerprint)? {
        store.set_connection_status(&node.id, ConnectionStatus::Connected)?;
        let node = store
            .get(&node.id)?
            .ok_or_else(|| RegistryError::NotFound(node.id.clone()))?;
        return Ok(PairingDecision::Accepted {
            node,
            newly_paired: false,
        });
    }

    if token.is_empty() {
        return Ok(PairingDecision::UnknownAgent);
    }

    match store.get_by_token(token)? {
        None => Ok(PairingDecision::UnknownAgent),
        Some(node) if node.is_paired() => {
            // Valid token, wrong certificate: the pin stands.
            tracing::warn!(
                node = %node.name,
                "connection with valid token but mismatched certificate rejected"
            );
            Ok(PairingDecision::PairingRequired { node_id: node.id })
        }
        Some(node) => {
            let node = store.pin_fingerprint(&node.id, fingerprint)?;
            tracing::info!(node = %node.name, "paired new agent certificate");
            Ok(PairingDecision::Accepted {
                node,
                newly_paired: true,
            })
        }
    }
}
