//! Master coordination contract

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use warden_topology::{Node, PeerId};

use crate::events::ClusterViewEventKind;
use crate::view::ClusterViewManager;

/// The surface the health monitor needs from master election.
pub trait MasterNode: Send + Sync + 'static {
    /// Whether the local member is the master
    fn is_master(&self) -> bool;

    /// The current master, if one has been appointed
    fn master_node_id(&self) -> Option<PeerId>;

    /// Forget the current master
    fn reset_master(&self);

    /// Choose a master from the current view
    fn appoint_master(&self);

    /// Called for heartbeats from peers that are not in the view
    fn probe_node(&self, node: &Node);
}

/// Master election without a protocol: the lowest CORE peer id in the view is
/// master. Every member with the same view reaches the same answer.
pub struct DeterministicMaster {
    view: Arc<ClusterViewManager>,
    master: Mutex<Option<PeerId>>,
}

impl DeterministicMaster {
    /// Create an election over `view`. No master is appointed until
    /// [`MasterNode::appoint_master`] is called.
    pub fn new(view: Arc<ClusterViewManager>) -> Self {
        Self {
            view,
            master: Mutex::new(None),
        }
    }
}

impl MasterNode for DeterministicMaster {
    fn is_master(&self) -> bool {
        self.master
            .lock()
            .as_ref()
            .is_some_and(|master| master == self.view.local().peer_id())
    }

    fn master_node_id(&self) -> Option<PeerId> {
        self.master.lock().clone()
    }

    fn reset_master(&self) {
        if let Some(previous) = self.master.lock().take() {
            debug!("Master {} reset on {}", previous, self.view.local().peer_id());
        }
    }

    fn appoint_master(&self) {
        let candidate = self.view.core_members().into_iter().next();

        let changed = {
            let mut master = self.master.lock();
            if *master == candidate {
                false
            } else {
                *master = candidate.clone();
                true
            }
        };

        if !changed {
            return;
        }

        match candidate.and_then(|id| self.view.get(&id)) {
            Some(node) => {
                info!(
                    "Member {} appointed {} as master",
                    self.view.local().peer_id(),
                    node.peer_id()
                );
                self.view.notify(ClusterViewEventKind::MasterChange, node);
            }
            None => {
                info!(
                    "Member {} has no CORE member to appoint as master",
                    self.view.local().peer_id()
                );
            }
        }
    }

    fn probe_node(&self, node: &Node) {
        if self.view.add(node.clone()) {
            self.appoint_master();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_topology::MemberType;

    fn peer(name: &str) -> PeerId {
        PeerId::parse(name).unwrap()
    }

    fn node(name: &str, member_type: MemberType) -> Node {
        Node::new(peer(name), "group", "localhost", member_type)
    }

    #[test]
    fn test_lowest_core_member_is_master() {
        let view = Arc::new(ClusterViewManager::new(node("b", MemberType::Core)));
        let master = DeterministicMaster::new(view.clone());
        assert_eq!(master.master_node_id(), None);
        assert!(!master.is_master());

        master.appoint_master();
        assert!(master.is_master());

        master.probe_node(&node("a", MemberType::Spectator));
        assert!(master.is_master());

        master.probe_node(&node("0", MemberType::Core));
        assert_eq!(master.master_node_id(), Some(peer("0")));
        assert!(!master.is_master());
        assert!(view.contains(&peer("0")));

        view.remove(&peer("0"), ClusterViewEventKind::Failure);
        master.reset_master();
        assert_eq!(master.master_node_id(), None);
        master.appoint_master();
        assert!(master.is_master());
    }
}
