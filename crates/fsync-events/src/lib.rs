//! # fsync-events
//!
//! Best-effort event fan-out from the hub to UI subscribers. Messages are
//! `{type, timestamp, data}` envelopes over a tokio broadcast channel; a
//! WebSocket handler drains a subscription per client. Delivery errors are
//! swallowed — the journal is the source of truth, events are a
//! convenience — and publication always happens after the corresponding
//! journal write so a subscriber can immediately query what it was told.

pub mod bus;
pub mod envelope;

pub use bus::EventBus;
pub use envelope::{Envelope, EventKind};
