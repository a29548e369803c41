//! Wire messages exchanged between members
//!
//! Every payload on the transport is a single CBOR-encoded [`WireMessage`],
//! decoded once at the dispatch boundary.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use warden_topology::{Node, PeerId};

use crate::error::{Error, Result};
use crate::state::MemberState;

/// Top-level envelope for membership traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Health report
    Health(HealthMessage),
    /// Acknowledged multicast traffic
    Multicast(MulticastMessage),
}

/// A health report: the sender's view of one or more members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMessage {
    /// Member that produced the report
    pub source: PeerId,
    /// Per-sender monotonically increasing sequence number
    pub sequence: u64,
    /// Reported member states
    pub reports: Vec<HealthReport>,
}

/// State reported for a single member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Advertisement of the member the report is about
    pub node: Node,
    /// Reported state
    pub state: MemberState,
}

/// Acknowledged multicast traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MulticastMessage {
    /// Application data that receivers acknowledge
    Data {
        /// Sender-assigned sequence number
        sequence: u64,
        /// Application payload
        payload: Bytes,
    },
    /// Acknowledgment of a data message
    Ack {
        /// Sequence number being acknowledged
        sequence: u64,
    },
}

impl WireMessage {
    /// Encode to CBOR bytes
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| Error::Codec(format!("Failed to encode message: {e}")))?;
        Ok(Bytes::from(buf))
    }

    /// Decode from CBOR bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes)
            .map_err(|e| Error::Codec(format!("Failed to decode message: {e}")))
    }
}

impl HealthMessage {
    /// A report about a single member
    pub fn single(source: PeerId, sequence: u64, node: Node, state: MemberState) -> Self {
        Self {
            source,
            sequence,
            reports: vec![HealthReport { node, state }],
        }
    }
}
