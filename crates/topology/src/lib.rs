//! Member identity types for Warden groups
//!
//! This crate provides:
//! - Peer identity tokens (`PeerId`)
//! - Member roles (`MemberType`)
//! - The advertisement a member publishes about itself (`Node`)

pub mod error;
pub mod member_type;
pub mod node;
pub mod node_id;

pub use error::TopologyError;
pub use member_type::MemberType;
pub use node::Node;
pub use node_id::PeerId;
