//! # fsync-transport
//!
//! The long-lived control-plane stream between hub and agents. Sessions
//! run over mutual TLS: the TLS layer accepts any client certificate and
//! hands its SHA-256 fingerprint to the session layer, which enforces the
//! pairing pin (or performs the one-time token bootstrap) before a single
//! post-HELLO frame is processed. The agent certificate is self-issued —
//! trust comes from pinning, not from a chain.
//!
//! ## Key components
//!
//! - [`tls`] — rustls config builders and PEM loading
//! - [`hub`] — listener, session registry, and the [`TaskExecutor`]
//!   implementation the scheduler drives
//! - [`agent`] — the agent's connect loop: pairing, heartbeats, apply
//!
//! [`TaskExecutor`]: fsync_sched::TaskExecutor

pub mod agent;
pub mod error;
pub mod hub;
pub mod tls;

pub use agent::{AgentConfig, AgentSession};
pub use error::TransportError;
pub use hub::{HubTransport, SessionDeps};

/// Heartbeat cadence on the agent side.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 15;
/// Silence after which the hub declares an agent disconnected.
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 45;
/// Chunk window: an agent never has more than this many chunks requested
/// and unanswered at once.
pub const MAX_CHUNKS_IN_FLIGHT: usize = 64;
/// Listing frames carry at most this many entries.
pub const LISTING_BATCH: usize = 512;
