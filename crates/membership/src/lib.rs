//! Group membership and failure detection.
//!
//! A [`ClusterManager`] runs on every member of a group. It
//!
//! - heartbeats the group and tracks the health of every peer
//!   ([`health::HealthMonitor`]), suspecting silent peers and confirming
//!   their failure after a grace period
//! - keeps the alive-and-ready view ([`ClusterViewManager`]) and the master
//!   ([`MasterNode`])
//! - maps keys to owning and replica members ([`DefaultKeyMapper`])
//! - agrees with every other member on who recovers a failed member
//!   ([`RecoveryTargetSelector`]) and records the choice in the group's
//!   state store
//! - offers multicast with acknowledgment thresholds ([`AckedMulticast`])
//!
//! Transport and state store are pluggable through the `warden-transport`
//! and `warden-store` traits.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod events;
pub mod group;
pub mod health;
pub mod manager;
pub mod mapper;
pub mod master;
pub mod messages;
pub mod multicast;
pub mod recovery;
pub mod state;
pub mod supervisor;
pub mod utils;
pub mod view;

pub use config::{HealthConfig, KeyMapperConfig, MembershipConfig, MulticastConfig, RecoveryConfig};
pub use error::{BoxError, Error, Result};
pub use events::{
    ClusterViewEvent, ClusterViewEventKind, ClusterViewEventListener, PeerHealthListener,
    ViewChangeListener,
};
pub use group::GroupHandle;
pub use manager::{ClusterManager, ManagerState};
pub use mapper::{Colocated, DefaultKeyMapper};
pub use master::{DeterministicMaster, MasterNode};
pub use multicast::{AckedMulticast, MulticastListener};
pub use recovery::{
    RecoveryAssignment, RecoveryComponents, RecoverySelection, RecoverySelectorMode,
    RecoveryTargetSelector, select_recoverer,
};
pub use state::MemberState;
pub use view::ClusterViewManager;
