//! Simple error types for topology operations

use thiserror::Error as ThisError;

/// Topology-related errors
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum TopologyError {
    /// Peer token could not be parsed
    #[error("Invalid peer id '{0}': {1}")]
    InvalidPeerId(String, &'static str),

    /// Unknown member type name
    #[error("Unknown member type: {0}")]
    UnknownMemberType(String),
}
