//! Error types for networking.

use thiserror::Error;
use tileworld_common::{TileworldError, WorldError};

/// Framing and encoding errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Socket error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be encoded
    #[error("Failed to encode message: {0}")]
    Encode(String),

    /// A payload could not be decoded as its declared kind
    #[error("Failed to decode message kind {kind}: {reason}")]
    Decode {
        /// Declared kind id
        kind: u16,
        /// Decoder message
        reason: String,
    },

    /// The frame names a kind this build does not know
    #[error("Unknown message kind {0}")]
    UnknownKind(u16),

    /// The frame is larger than the allowed maximum
    #[error("Frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Declared payload length
        len: usize,
        /// Limit
        max: usize,
    },
}

impl ProtocolError {
    /// Whether the connection must be closed after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::FrameTooLarge { .. })
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Connection-level errors.
#[derive(Debug, Error)]
pub enum NetError {
    /// Socket error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// World access failed
    #[error("World error: {0}")]
    World(#[from] WorldError),

    /// World open or save failed
    #[error(transparent)]
    Tileworld(#[from] TileworldError),

    /// No open connection
    #[error("Not connected")]
    NotConnected,

    /// Connection is not logged in
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Connection attempt timed out
    #[error("Connection timed out")]
    Timeout,
}

/// Result type for network operations.
pub type NetResult<T> = Result<T, NetError>;
