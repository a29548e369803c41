//! Transport error types

use thiserror::Error;
use warden_topology::PeerId;

/// Errors raised by transports
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The recipient is not reachable through this transport
    #[error("Peer {0} is not known to the transport")]
    PeerNotFound(PeerId),

    /// The transport has been shut down
    #[error("Connection closed")]
    ConnectionClosed,

    /// Message exceeds the configured maximum size
    #[error("Message of {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge {
        /// Size of the rejected payload
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Other failure
    #[error("{0}")]
    Other(String),
}
