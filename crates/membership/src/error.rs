//! Error types for the membership layer

use thiserror::Error;
use warden_topology::{PeerId, TopologyError};
use warden_transport::TransportError;

/// Result type for membership operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type returned by listener callbacks
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for the membership layer
#[derive(Debug, Error)]
pub enum Error {
    /// Send or receive failure in the transport
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A threshold multicast did not collect enough acknowledgments in time.
    ///
    /// The message may still have reached peers that did not answer; this
    /// says nothing about whether any peer has failed.
    #[error(
        "Received {} of {threshold} required acknowledgments for message {sequence}",
        .acked.len()
    )]
    InsufficientAcks {
        /// Sequence number of the multicast message
        sequence: u64,
        /// Number of acknowledgments required
        threshold: usize,
        /// Peers that did acknowledge
        acked: Vec<PeerId>,
    },

    /// Message could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// Distributed state store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid identity
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Start was called on a running manager
    #[error("Cluster manager already started")]
    AlreadyStarted,

    /// Operation requires a started manager
    #[error("Cluster manager is not started")]
    NotStarted,

    /// Background loop failed
    #[error("Background task failed: {0}")]
    Task(String),
}

impl Error {
    /// Whether this is an acknowledgment shortfall rather than a hard failure
    pub fn is_insufficient_acks(&self) -> bool {
        matches!(self, Error::InsufficientAcks { .. })
    }
}
