//! View events and listener traits

use warden_topology::{Node, PeerId};

use crate::error::BoxError;

/// What changed in the cluster view
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClusterViewEventKind {
    /// A member joined the view
    Add,
    /// A member failed and was removed
    Failure,
    /// A member left on its own
    PeerStop,
    /// A member left as part of a group-wide shutdown
    ClusterStop,
    /// A member is suspected failed
    InDoubt,
    /// A previously suspected member is heartbeating again
    NoLongerInDoubt,
    /// The master changed
    MasterChange,
}

impl ClusterViewEventKind {
    /// Whether this kind of event removes its subject from the view
    pub fn is_departure(self) -> bool {
        matches!(self, Self::Failure | Self::PeerStop | Self::ClusterStop)
    }
}

/// A change to the cluster view, with the views on either side of it
#[derive(Clone, Debug)]
pub struct ClusterViewEvent {
    /// What happened
    pub kind: ClusterViewEventKind,
    /// The member the event is about
    pub node: Node,
    /// View before the change, sorted by peer id
    pub previous_view: Vec<Node>,
    /// View after the change, sorted by peer id
    pub current_view: Vec<Node>,
}

impl ClusterViewEvent {
    /// Peer id of the member the event is about
    pub fn peer_id(&self) -> &PeerId {
        self.node.peer_id()
    }
}

/// Receives membership recomputation callbacks.
///
/// `member` is the peer that joined or departed. Views are sorted and include
/// the local member when it is part of the alive-and-ready view.
pub trait ViewChangeListener: Send + Sync + 'static {
    /// Called once per membership change, serialized with other changes
    fn on_view_change(
        &self,
        member: &PeerId,
        current: &[PeerId],
        previous: &[PeerId],
        is_join: bool,
    ) -> Result<(), BoxError>;
}

/// Receives every [`ClusterViewEvent`]
pub trait ClusterViewEventListener: Send + Sync + 'static {
    /// Handle an event
    fn on_event(&self, event: &ClusterViewEvent) -> Result<(), BoxError>;
}

/// Receives per-peer health transitions
pub trait PeerHealthListener: Send + Sync + 'static {
    /// A peer is suspected failed
    fn on_peer_indoubt(&self, _node: &Node) -> Result<(), BoxError> {
        Ok(())
    }

    /// A suspected peer is heartbeating again
    fn on_peer_alive_again(&self, _node: &Node) -> Result<(), BoxError> {
        Ok(())
    }

    /// A peer's failure has been verified
    fn on_peer_dead(&self, _node: &Node) -> Result<(), BoxError> {
        Ok(())
    }

    /// A peer announced that it is leaving
    fn on_peer_stopping(&self, _node: &Node, _is_cluster_wide: bool) -> Result<(), BoxError> {
        Ok(())
    }
}
