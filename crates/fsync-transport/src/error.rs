// error.rs — Error types for the control-plane transport.

use thiserror::Error;

/// Errors that can occur on hub or agent transport paths.
#[derive(Debug, Error)]
pub enum TransportError {
    /// TLS material could not be loaded or parsed.
    #[error("TLS configuration: {0}")]
    TlsConfig(String),

    /// The TLS or TCP layer failed.
    #[error("connection: {0}")]
    Io(#[from] std::io::Error),

    /// A frame could not be read or decoded.
    #[error(transparent)]
    Proto(#[from] fsync_proto::ProtoError),

    /// The hub rejected the session during the hello exchange.
    #[error("session rejected: {reason}")]
    Rejected { reason: String },

    /// The peer sent a frame the current protocol state cannot accept.
    #[error("unexpected frame {got} while {expecting}")]
    UnexpectedFrame {
        got: &'static str,
        expecting: &'static str,
    },

    /// The registry failed while authorizing or updating a node.
    #[error(transparent)]
    Registry(#[from] fsync_registry::RegistryError),

    /// No live session for the node.
    #[error("node {0} is not connected")]
    NotConnected(String),
}
