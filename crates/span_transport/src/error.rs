//! Error types for transport construction and batch sending.

use thiserror::Error;

/// Errors that can occur while constructing a transport.
///
/// These are the only hard failures: once a transport exists, `append` degrades
/// locally instead of failing.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The agent address is not of the form `host:port`.
    #[error("invalid agent address {0:?}: expected host:port")]
    InvalidAddress(String),

    /// The agent host could not be resolved, or resolved to no socket addresses.
    #[error("agent address {0:?} did not resolve to any socket address")]
    Unresolvable(String),

    /// The configured packet size leaves no room for spans after framing.
    #[error("max packet size {size} must exceed the {overhead}-byte emitBatch overhead")]
    PacketTooSmall { size: usize, overhead: usize },

    /// Socket setup failed.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The JSON configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Errors reported by a [`Sender`](crate::Sender) for one batch.
#[derive(Debug, Error)]
pub enum SendError {
    /// The datagram could not be written to the socket.
    #[error("send failed: {0}")]
    Io(#[from] std::io::Error),

    /// The sender was closed.
    #[error("sender is closed")]
    Closed,

    /// The datagram framing could not be written.
    #[error("failed to encode emitBatch datagram: {0}")]
    Encode(#[from] thrift::Error),

    /// The assembled datagram is larger than the packet limit.
    #[error("datagram of {size} bytes exceeds max packet size {limit}")]
    Oversized { size: usize, limit: usize },
}

impl SendError {
    /// Returns `true` if later batches may still succeed.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Closed)
    }
}
