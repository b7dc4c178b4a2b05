//! # fsync-proto
//!
//! The control-plane wire format between the hub and its agents: framed
//! binary messages over one long-lived stream. A frame is a 4-byte
//! big-endian length, a 1-byte tag, and a binary payload of
//! length-prefixed fields — no textual framing anywhere.
//!
//! ## Key components
//!
//! - [`Message`] — every frame the protocol speaks
//! - [`codec`] — frame read/write over any `AsyncRead`/`AsyncWrite`
//! - [`wire`] — the low-level field encoding (length-prefixed strings and
//!   byte fields, big-endian integers)
//!
//! Version negotiation happens in `HELLO`/`HELLO_ACK`; everything after a
//! rejected hello is a protocol error.

pub mod codec;
pub mod error;
pub mod message;
pub mod wire;

pub use codec::{read_frame, write_frame, MAX_FRAME_LEN};
pub use error::ProtoError;
pub use message::{ListingEntry, Message, PROTO_VERSION};
