//! Per-peer health entries

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use warden_topology::{Node, PeerId};

use crate::state::MemberState;

/// Last known health of a peer
#[derive(Clone, Debug)]
pub struct HealthEntry {
    /// Advertisement received with the latest report
    pub node: Node,
    /// Latest reported or locally derived state
    pub state: MemberState,
    /// When the latest report arrived
    pub last_seen: Instant,
    /// When the peer became INDOUBT, while it is
    pub suspected_at: Option<Instant>,
}

impl HealthEntry {
    /// Whole `period`s elapsed since the last report
    pub fn missed_beats(&self, now: Instant, period: Duration) -> u128 {
        let period = period.as_nanos().max(1);
        now.saturating_duration_since(self.last_seen).as_nanos() / period
    }
}

/// Health entries keyed by peer id, guarded by a single lock so state and
/// timestamp are always read together.
#[derive(Default)]
pub struct HealthCache {
    entries: Mutex<HashMap<PeerId, HealthEntry>>,
}

impl HealthCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the entry for `node`, returning the state it replaced.
    ///
    /// A repeated INDOUBT report keeps the time the suspicion started.
    pub fn record(&self, node: Node, state: MemberState, now: Instant) -> Option<MemberState> {
        let peer_id = node.peer_id().clone();
        let mut entries = self.entries.lock();
        let previous = entries
            .get(&peer_id)
            .map(|entry| (entry.state, entry.suspected_at));
        let suspected_at = match (state, previous) {
            (MemberState::InDoubt, Some((MemberState::InDoubt, since))) => since,
            (MemberState::InDoubt, _) => Some(now),
            _ => None,
        };
        entries.insert(
            peer_id,
            HealthEntry {
                node,
                state,
                last_seen: now,
                suspected_at,
            },
        );
        previous.map(|(state, _)| state)
    }

    /// Get the cached state of a peer
    pub fn state(&self, peer_id: &PeerId) -> Option<MemberState> {
        self.entries.lock().get(peer_id).map(|entry| entry.state)
    }

    /// Peers whose state is one of `states`, sorted
    pub fn peers_in(&self, states: &[MemberState]) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, entry)| states.contains(&entry.state))
            .map(|(peer_id, _)| peer_id.clone())
            .collect();
        peers.sort();
        peers
    }

    /// Mark ALIVE peers that have missed more than `max_missed_beats` periods
    /// as INDOUBT, for those `can_act` allows. Returns the newly suspected
    /// members.
    pub fn mark_suspects(
        &self,
        now: Instant,
        period: Duration,
        max_missed_beats: u32,
        can_act: impl Fn(&PeerId) -> bool,
    ) -> Vec<Node> {
        let mut entries = self.entries.lock();
        let mut suspects = Vec::new();
        for (peer_id, entry) in entries.iter_mut() {
            if entry.state != MemberState::Alive {
                continue;
            }
            if entry.missed_beats(now, period) > u128::from(max_missed_beats) && can_act(peer_id)
            {
                entry.state = MemberState::InDoubt;
                entry.suspected_at = Some(now);
                suspects.push(entry.node.clone());
            }
        }
        suspects.sort_by(|a, b| a.peer_id().cmp(b.peer_id()));
        suspects
    }

    /// Promote INDOUBT entries that have been suspected for at least `grace`
    /// to DEAD, returning the promoted members
    pub fn confirm_suspects(&self, now: Instant, grace: Duration) -> Vec<Node> {
        let mut entries = self.entries.lock();
        let mut dead: Vec<Node> = entries
            .values_mut()
            .filter(|entry| {
                entry.state == MemberState::InDoubt
                    && entry
                        .suspected_at
                        .is_none_or(|since| now >= since + grace)
            })
            .map(|entry| {
                entry.state = MemberState::Dead;
                entry.suspected_at = None;
                entry.node.clone()
            })
            .collect();
        dead.sort_by(|a, b| a.peer_id().cmp(b.peer_id()));
        dead
    }

    /// Earliest time an INDOUBT entry's `grace` runs out
    pub fn next_confirmation(&self, grace: Duration) -> Option<Instant> {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.state == MemberState::InDoubt)
            .filter_map(|entry| entry.suspected_at)
            .min()
            .map(|since| since + grace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_topology::MemberType;

    fn peer(name: &str) -> PeerId {
        PeerId::parse(name).unwrap()
    }

    const PERIOD: Duration = Duration::from_secs(10);
    const GRACE: Duration = Duration::from_millis(10_500);

    fn node(name: &str) -> Node {
        Node::new(peer(name), "group", "localhost", MemberType::Core)
    }

    #[test]
    fn test_record_returns_previous_state() {
        let cache = HealthCache::new();
        let now = Instant::now();
        assert_eq!(cache.record(node("a"), MemberState::Alive, now), None);
        assert_eq!(
            cache.record(node("a"), MemberState::InDoubt, now),
            Some(MemberState::Alive)
        );
        assert_eq!(cache.state(&peer("a")), Some(MemberState::InDoubt));
    }

    #[test]
    fn test_suspect_after_more_than_max_missed_beats() {
        let cache = HealthCache::new();
        let start = Instant::now();
        cache.record(node("a"), MemberState::Alive, start);

        // Exactly three periods is not more than three missed beats
        assert!(cache.mark_suspects(start + PERIOD * 3, PERIOD, 3, |_| true).is_empty());
        assert!(
            cache
                .mark_suspects(start + PERIOD * 4 - Duration::from_millis(1), PERIOD, 3, |_| true)
                .is_empty()
        );

        let suspects = cache.mark_suspects(start + PERIOD * 4, PERIOD, 3, |_| true);
        assert_eq!(suspects.len(), 1);
        assert_eq!(cache.state(&peer("a")), Some(MemberState::InDoubt));

        // Already suspected peers are not reported twice
        assert!(cache.mark_suspects(start + PERIOD * 9, PERIOD, 3, |_| true).is_empty());
    }

    #[test]
    fn test_suspects_respect_authority() {
        let cache = HealthCache::new();
        let start = Instant::now();
        cache.record(node("a"), MemberState::Alive, start);
        cache.record(node("b"), MemberState::Alive, start);
        cache.record(node("c"), MemberState::Stopped, start);

        let suspects = cache.mark_suspects(start + PERIOD * 5, PERIOD, 3, |peer| {
            peer.as_str() == "b"
        });
        assert_eq!(suspects, vec![node("b")]);
        assert_eq!(cache.state(&peer("a")), Some(MemberState::Alive));
        assert_eq!(cache.state(&peer("c")), Some(MemberState::Stopped));
    }

    #[test]
    fn test_late_alive_cancels_confirmation() {
        let cache = HealthCache::new();
        let start = Instant::now();
        cache.record(node("a"), MemberState::Alive, start);
        cache.record(node("b"), MemberState::Alive, start);
        cache.mark_suspects(start + PERIOD * 4, PERIOD, 3, |_| true);

        cache.record(node("a"), MemberState::Alive, start + PERIOD * 5);

        assert_eq!(
            cache.confirm_suspects(start + PERIOD * 5, GRACE),
            vec![node("b")]
        );
        assert_eq!(cache.state(&peer("a")), Some(MemberState::Alive));
        assert_eq!(cache.state(&peer("b")), Some(MemberState::Dead));
        assert_eq!(
            cache.peers_in(&[MemberState::InDoubt, MemberState::Dead]),
            vec![peer("b")]
        );
        assert_eq!(cache.next_confirmation(GRACE), None);
    }

    #[test]
    fn test_each_suspect_gets_a_full_grace_period() {
        let cache = HealthCache::new();
        let start = Instant::now();
        cache.record(node("a"), MemberState::Alive, start);
        cache.record(node("b"), MemberState::Alive, start + PERIOD);

        let first = start + PERIOD * 4;
        cache.mark_suspects(first, PERIOD, 3, |_| true);
        let second = start + PERIOD * 5;
        cache.mark_suspects(second, PERIOD, 3, |_| true);
        assert_eq!(cache.next_confirmation(GRACE), Some(first + GRACE));

        // b was suspected partway through a's grace period
        assert_eq!(cache.confirm_suspects(first + GRACE, GRACE), vec![node("a")]);
        assert_eq!(cache.state(&peer("b")), Some(MemberState::InDoubt));
        assert_eq!(cache.next_confirmation(GRACE), Some(second + GRACE));

        assert_eq!(cache.confirm_suspects(second + GRACE, GRACE), vec![node("b")]);
    }

    #[test]
    fn test_repeated_indoubt_report_keeps_suspicion_start() {
        let cache = HealthCache::new();
        let start = Instant::now();
        cache.record(node("a"), MemberState::InDoubt, start);
        cache.record(node("a"), MemberState::InDoubt, start + PERIOD);

        assert_eq!(cache.next_confirmation(GRACE), Some(start + GRACE));
    }
}
