//! # fsync-registry
//!
//! Node records and the pairing lifecycle. A node starts UNPAIRED with a
//! one-time token; its first TLS connect pins the SHA-256 fingerprint of
//! the certificate it presented, and from then on only that certificate is
//! accepted — token rotation cannot disturb a paired session, and only an
//! explicit pairing reset clears the pin.
//!
//! ## Key components
//!
//! - [`Node`] — the record shared between hub (authoritative) and agent
//!   (live status)
//! - [`NodeStore`] — SQLite-backed CRUD plus status transitions
//! - [`authorize`] — the connect-time decision: fingerprint match, token
//!   bootstrap, or rejection

pub mod error;
pub mod model;
pub mod pairing;
pub mod store;
pub mod token;

pub use error::RegistryError;
pub use model::{ConnectionStatus, Node, NodeHealth, NodeKind};
pub use pairing::{authorize, PairingDecision};
pub use store::NodeStore;
pub use token::{cert_fingerprint, generate_token};
