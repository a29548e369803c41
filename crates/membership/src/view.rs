//! Authoritative alive-and-ready membership view

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use warden_topology::{Node, PeerId};

use crate::events::{
    ClusterViewEvent, ClusterViewEventKind, ClusterViewEventListener, ViewChangeListener,
};

/// Tracks the current alive-and-ready members and the view before the last
/// change, and fans changes out to listeners.
///
/// Every mutation and its listener notifications run under one change lock,
/// so listeners observe changes in the order they were applied. Listeners
/// must not mutate the view from inside a callback.
pub struct ClusterViewManager {
    local: Node,
    state: RwLock<ViewState>,
    change_lock: Mutex<()>,
    view_listeners: RwLock<Vec<Arc<dyn ViewChangeListener>>>,
    event_listeners: RwLock<Vec<Arc<dyn ClusterViewEventListener>>>,
}

#[derive(Default)]
struct ViewState {
    members: BTreeMap<PeerId, Node>,
    previous: Vec<Node>,
}

impl ViewState {
    fn snapshot(&self) -> Vec<Node> {
        self.members.values().cloned().collect()
    }
}

impl ClusterViewManager {
    /// Create a view containing only the local member (if it takes part in
    /// the alive-and-ready view)
    pub fn new(local: Node) -> Self {
        let mut state = ViewState::default();
        if local.member_type().in_ready_view() {
            state
                .members
                .insert(local.peer_id().clone(), local.clone());
        }

        Self {
            local,
            state: RwLock::new(state),
            change_lock: Mutex::new(()),
            view_listeners: RwLock::new(Vec::new()),
            event_listeners: RwLock::new(Vec::new()),
        }
    }

    /// Get the local member
    pub fn local(&self) -> &Node {
        &self.local
    }

    /// Register a view change listener
    pub fn add_view_listener(&self, listener: Arc<dyn ViewChangeListener>) {
        self.view_listeners.write().push(listener);
    }

    /// Register a view event listener
    pub fn add_event_listener(&self, listener: Arc<dyn ClusterViewEventListener>) {
        self.event_listeners.write().push(listener);
    }

    /// Admit a member. Returns false if it is already present or its role
    /// does not take part in the view.
    pub fn add(&self, node: Node) -> bool {
        if !node.member_type().in_ready_view() {
            debug!(
                "Not adding {} member {} to view",
                node.member_type(),
                node.peer_id()
            );
            return false;
        }

        let _guard = self.change_lock.lock();
        let event = {
            let mut state = self.state.write();
            if state.members.contains_key(node.peer_id()) {
                return false;
            }
            let previous = state.snapshot();
            state.members.insert(node.peer_id().clone(), node.clone());
            state.previous = previous.clone();
            ClusterViewEvent {
                kind: ClusterViewEventKind::Add,
                node,
                previous_view: previous,
                current_view: state.snapshot(),
            }
        };

        info!(
            "Member {} joined the view of {}",
            event.peer_id(),
            self.local.peer_id()
        );
        self.notify_view_listeners(&event, true);
        self.notify_event_listeners(&event);
        true
    }

    /// Remove a member, reporting the departure with `kind`.
    pub fn remove(&self, peer_id: &PeerId, kind: ClusterViewEventKind) -> Option<Node> {
        debug_assert!(kind.is_departure());

        let _guard = self.change_lock.lock();
        let event = {
            let mut state = self.state.write();
            let previous = state.snapshot();
            let node = state.members.remove(peer_id)?;
            state.previous = previous.clone();
            ClusterViewEvent {
                kind,
                node,
                previous_view: previous,
                current_view: state.snapshot(),
            }
        };

        info!(
            "Member {} left the view of {} ({:?})",
            peer_id,
            self.local.peer_id(),
            kind
        );
        self.notify_view_listeners(&event, false);
        self.notify_event_listeners(&event);
        Some(event.node)
    }

    /// Publish an event that does not change membership
    pub fn notify(&self, kind: ClusterViewEventKind, node: Node) {
        let _guard = self.change_lock.lock();
        let event = {
            let state = self.state.read();
            ClusterViewEvent {
                kind,
                node,
                previous_view: state.previous.clone(),
                current_view: state.snapshot(),
            }
        };
        self.notify_event_listeners(&event);
    }

    /// Whether a peer is in the view
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.state.read().members.contains_key(peer_id)
    }

    /// Get a member's advertisement
    pub fn get(&self, peer_id: &PeerId) -> Option<Node> {
        self.state.read().members.get(peer_id).cloned()
    }

    /// Current members, sorted by peer id
    pub fn members(&self) -> Vec<PeerId> {
        self.state.read().members.keys().cloned().collect()
    }

    /// Current member advertisements, sorted by peer id
    pub fn nodes(&self) -> Vec<Node> {
        self.state.read().snapshot()
    }

    /// Current CORE members, sorted by peer id
    pub fn core_members(&self) -> Vec<PeerId> {
        self.state
            .read()
            .members
            .values()
            .filter(|node| node.is_core())
            .map(|node| node.peer_id().clone())
            .collect()
    }

    /// The view before the most recent membership change
    pub fn previous_nodes(&self) -> Vec<Node> {
        self.state.read().previous.clone()
    }

    fn notify_view_listeners(&self, event: &ClusterViewEvent, is_join: bool) {
        let current: Vec<PeerId> = ids(&event.current_view);
        let previous: Vec<PeerId> = ids(&event.previous_view);
        let listeners = self.view_listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener.on_view_change(event.peer_id(), &current, &previous, is_join)
            {
                warn!("View change listener failed: {}", e);
            }
        }
    }

    fn notify_event_listeners(&self, event: &ClusterViewEvent) {
        let listeners = self.event_listeners.read().clone();
        for listener in listeners {
            if let Err(e) = listener.on_event(event) {
                warn!("View event listener failed for {:?}: {}", event.kind, e);
            }
        }
    }
}

fn ids(nodes: &[Node]) -> Vec<PeerId> {
    nodes.iter().map(|node| node.peer_id().clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use warden_topology::MemberType;

    fn peer(name: &str) -> PeerId {
        PeerId::parse(name).unwrap()
    }

    fn node(name: &str, member_type: MemberType) -> Node {
        Node::new(peer(name), "group", "localhost", member_type)
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(ClusterViewEventKind, PeerId, usize, usize)>>,
    }

    impl ClusterViewEventListener for Recorder {
        fn on_event(&self, event: &ClusterViewEvent) -> Result<(), BoxError> {
            self.events.lock().push((
                event.kind,
                event.peer_id().clone(),
                event.previous_view.len(),
                event.current_view.len(),
            ));
            Ok(())
        }
    }

    struct Failing;

    impl ClusterViewEventListener for Failing {
        fn on_event(&self, _event: &ClusterViewEvent) -> Result<(), BoxError> {
            Err("listener exploded".into())
        }
    }

    #[test]
    fn test_add_and_remove() {
        let view = ClusterViewManager::new(node("a", MemberType::Core));
        let recorder = Arc::new(Recorder::default());
        view.add_event_listener(Arc::new(Failing));
        view.add_event_listener(recorder.clone());

        assert!(view.add(node("b", MemberType::Core)));
        assert!(!view.add(node("b", MemberType::Core)));
        assert!(view.add(node("c", MemberType::Spectator)));
        assert!(!view.add(node("w", MemberType::Watchdog)));

        assert_eq!(view.members().len(), 3);
        assert_eq!(view.core_members(), vec![peer("a"), peer("b")]);

        let removed = view.remove(&peer("b"), ClusterViewEventKind::Failure);
        assert_eq!(removed.unwrap().peer_id().as_str(), "b");
        assert!(view.remove(&peer("b"), ClusterViewEventKind::Failure).is_none());
        assert_eq!(view.previous_nodes().len(), 3);

        // The failing listener does not stop delivery to the recorder
        let events = recorder.events.lock().clone();
        assert_eq!(
            events,
            vec![
                (ClusterViewEventKind::Add, peer("b"), 1, 2),
                (ClusterViewEventKind::Add, peer("c"), 2, 3),
                (ClusterViewEventKind::Failure, peer("b"), 3, 2),
            ]
        );
    }

    #[test]
    fn test_watchdog_is_not_in_own_view() {
        let view = ClusterViewManager::new(node("w", MemberType::Watchdog));
        assert!(view.members().is_empty());
    }
}
