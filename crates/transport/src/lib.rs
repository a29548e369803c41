//! Generic transport abstraction for group communication
//!
//! This crate provides a transport-agnostic interface for the membership layer.
//! Specific transport implementations are provided in separate crates.
//!
//! Transports handle:
//! - Unicast delivery to a single peer
//! - Best-effort broadcast to every other peer in the group
//! - Delivery of inbound payloads as a stream of envelopes
//!
//! Payloads are opaque bytes; decoding into typed messages happens once, at the
//! consumer's dispatch boundary.

pub mod error;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use warden_topology::PeerId;

pub use error::TransportError;
pub use error::TransportError as Error;

/// Transport-level envelope for an inbound payload
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The sender of the message
    pub sender: PeerId,
    /// The raw message payload
    pub payload: Bytes,
}

/// Transport trait for sending and receiving group messages
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Identity this transport sends as
    fn local_peer_id(&self) -> &PeerId;

    /// Send a payload to a specific peer
    async fn send(&self, recipient: &PeerId, payload: Bytes) -> Result<(), TransportError>;

    /// Send a payload to every other peer in the group
    ///
    /// Broadcast is best-effort: unreachable peers do not make it fail.
    async fn broadcast(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Get a stream of incoming envelopes
    ///
    /// The stream ends when the transport is shut down.
    fn incoming(&self) -> Pin<Box<dyn Stream<Item = Envelope> + Send>>;

    /// Shutdown the transport
    async fn shutdown(&self) -> Result<(), TransportError>;
}

/// Configuration for transports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Inbound queue size per peer
    pub inbound_queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_message_size: 1024 * 1024, // 1MB
            inbound_queue_size: 1024,
        }
    }
}
