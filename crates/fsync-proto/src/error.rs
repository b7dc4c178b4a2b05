// error.rs — Error types for the wire format.

use thiserror::Error;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The stream ended or a field ran past the payload boundary.
    #[error("truncated payload while reading {context}")]
    Truncated { context: &'static str },

    /// An unknown frame tag arrived.
    #[error("unknown frame tag {0:#x}")]
    UnknownTag(u8),

    /// A frame announced a length beyond the protocol maximum.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    /// A string field held invalid UTF-8.
    #[error("invalid UTF-8 in {context}")]
    InvalidUtf8 { context: &'static str },

    /// An enumerated field held an unknown discriminant.
    #[error("invalid value {value} for {context}")]
    InvalidValue { context: &'static str, value: u64 },

    /// Transport-level I/O failure.
    #[error("transport I/O: {0}")]
    Io(#[from] std::io::Error),
}
