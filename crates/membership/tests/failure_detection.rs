use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use warden_membership::{
    BoxError, ClusterManager, ClusterViewEvent, ClusterViewEventKind, ClusterViewEventListener,
    MemberState, MembershipConfig,
};
use warden_store::{StateKey, StateStore};
use warden_store_memory::MemoryStateStore;
use warden_topology::{MemberType, Node, PeerId};
use warden_transport_memory::{MemoryNetwork, MemoryTransport};

type Manager = ClusterManager<MemoryTransport, MemoryStateStore>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn peer(name: &str) -> PeerId {
    PeerId::parse(name).unwrap()
}

fn start_member(network: &MemoryNetwork, store: &MemoryStateStore, name: &str) -> Manager {
    let transport = network.register(peer(name)).unwrap();
    let local = Node::new(peer(name), "cluster", "localhost", MemberType::Core);
    let manager =
        ClusterManager::new(local, MembershipConfig::default(), transport, store.clone()).unwrap();
    manager.group().register_recovery_component("web");
    manager.start().unwrap();
    manager
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<(ClusterViewEventKind, PeerId)>>,
}

impl ClusterViewEventListener for EventLog {
    fn on_event(&self, event: &ClusterViewEvent) -> Result<(), BoxError> {
        self.events.lock().push((event.kind, event.peer_id().clone()));
        Ok(())
    }
}

impl EventLog {
    fn count(&self, kind: ClusterViewEventKind, peer_id: &PeerId) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(k, p)| *k == kind && p == peer_id)
            .count()
    }
}

#[tokio::test(start_paused = true)]
async fn test_isolated_member_is_declared_dead_and_recovered() {
    init_tracing();
    let network = MemoryNetwork::new();
    let store = MemoryStateStore::new();

    let a = start_member(&network, &store, "a");
    let b = start_member(&network, &store, "b");
    let c = start_member(&network, &store, "c");
    let mut assignments = a.subscribe_recovery();

    tokio::time::sleep(Duration::from_secs(1)).await;
    for member in [&a, &b, &c] {
        assert_eq!(member.view().members(), vec![peer("a"), peer("b"), peer("c")]);
    }
    assert!(a.group().is_group_leader());

    network.isolate(&peer("c"));

    let assignment = tokio::time::timeout(Duration::from_secs(120), assignments.recv())
        .await
        .expect("no recovery assignment")
        .unwrap();
    assert_eq!(assignment.failed.peer_id(), &peer("c"));
    assert_eq!(assignment.group_name, "cluster");

    tokio::time::sleep(Duration::from_secs(1)).await;

    for member in [&a, &b] {
        assert_eq!(member.view().members(), vec![peer("a"), peer("b")]);
        assert_eq!(member.member_state(&peer("c")), MemberState::Dead);
        assert!(!member.group().is_member_alive(&peer("c")));
    }
    assert_eq!(a.key_mapper().members(), vec![peer("b")]);
    assert_eq!(b.key_mapper().map_key("session"), Some(peer("a")));

    let record = store
        .get(&StateKey::new("web", "a", "c"))
        .await
        .unwrap()
        .expect("recovery selection not recorded");
    assert!(record.starts_with(b"RECOVERY_SERVER_APPOINTED|"));

    // The recoverer fences the failed member while it works
    let group = a.group();
    group.raise_fence("web", &peer("c")).await.unwrap();
    assert!(b.group().is_fenced("web", &peer("c")).await.unwrap());
    group.lower_fence("web", &peer("c")).await.unwrap();
    assert!(!b.group().is_fenced("web", &peer("c")).await.unwrap());

    for member in [&a, &b, &c] {
        member.stop().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_member_recovering_within_grace_period_stays() {
    init_tracing();
    let network = MemoryNetwork::new();
    let store = MemoryStateStore::new();

    let a = start_member(&network, &store, "a");
    let b = start_member(&network, &store, "b");
    let c = start_member(&network, &store, "c");
    let events = Arc::new(EventLog::default());
    a.view().add_event_listener(events.clone());
    let mut assignments = a.subscribe_recovery();

    tokio::time::sleep(Duration::from_secs(1)).await;
    network.isolate(&peer("c"));

    // Suspected after more than three silent periods, healed before the
    // grace period runs out
    tokio::time::sleep(Duration::from_secs(44)).await;
    assert_eq!(a.member_state(&peer("c")), MemberState::InDoubt);
    assert_eq!(events.count(ClusterViewEventKind::InDoubt, &peer("c")), 1);
    network.heal(&peer("c"));

    tokio::time::sleep(Duration::from_secs(25)).await;

    assert_eq!(a.member_state(&peer("c")), MemberState::Alive);
    assert_eq!(events.count(ClusterViewEventKind::NoLongerInDoubt, &peer("c")), 1);
    assert_eq!(events.count(ClusterViewEventKind::Failure, &peer("c")), 0);
    assert!(a.view().contains(&peer("c")));
    assert!(assignments.try_recv().is_err());

    for member in [&a, &b, &c] {
        member.stop().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_planned_stop_hands_off_master() {
    init_tracing();
    let network = MemoryNetwork::new();
    let store = MemoryStateStore::new();

    let a = start_member(&network, &store, "a");
    let b = start_member(&network, &store, "b");
    let mut assignments = b.subscribe_recovery();

    tokio::time::sleep(Duration::from_secs(1)).await;
    a.report_joined_and_ready().await.unwrap();
    assert_eq!(b.group().group_leader(), Some(peer("a")));

    a.announce_stop(false).await.unwrap();
    a.stop().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(b.view().members(), vec![peer("b")]);
    assert!(b.group().is_group_leader());
    assert_eq!(b.member_state(&peer("a")), MemberState::Stopped);

    // A planned stop is not a failure
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(assignments.try_recv().is_err());

    b.stop().await.unwrap();
}
