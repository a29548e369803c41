//! Key to member mapping for replica placement

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::debug;
use twox_hash::XxHash64;
use warden_topology::PeerId;
use warden_topology::node_id::TOKEN_SEPARATOR;

use crate::error::BoxError;
use crate::events::ViewChangeListener;

/// A key that is placed by a separate hash key, so that keys sharing a hash
/// key land on the same member.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Colocated<K, H> {
    /// The application key
    pub key: K,
    /// The value that decides placement
    pub hash_key: H,
}

impl<K, H> Colocated<K, H> {
    /// Place `key` where `hash_key` would be placed
    pub fn new(key: K, hash_key: H) -> Self {
        Self { key, hash_key }
    }
}

impl<K, H: Hash> Hash for Colocated<K, H> {
    fn hash<S: Hasher>(&self, state: &mut S) {
        self.hash_key.hash(state);
    }
}

/// Placement hash, identical on every member
pub fn key_hash<K: Hash + ?Sized>(key: &K) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    key.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Default)]
struct MapperSnapshot {
    members: Vec<PeerId>,
    replica_choices: Vec<String>,
    previous_members: Vec<PeerId>,
}

impl MapperSnapshot {
    fn index_of<K: Hash + ?Sized>(&self, key: &K) -> Option<usize> {
        index(key, self.members.len())
    }
}

fn index<K: Hash + ?Sized>(key: &K, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some((key_hash(key) % len as u64) as usize)
}

/// Maps keys to an owning member and its replica candidates.
///
/// Members are the sorted alive-and-ready view without the local member.
/// Reads load an immutable snapshot; view changes build a new snapshot and
/// swap it in.
pub struct DefaultKeyMapper {
    local: PeerId,
    hop_count: usize,
    snapshot: ArcSwap<MapperSnapshot>,
    update_lock: Mutex<()>,
}

impl DefaultKeyMapper {
    /// Create a mapper for `local` with no members
    pub fn new(local: PeerId, hop_count: usize) -> Self {
        Self {
            local,
            hop_count: hop_count.max(1),
            snapshot: ArcSwap::from_pointee(MapperSnapshot::default()),
            update_lock: Mutex::new(()),
        }
    }

    /// Owner of `key`, or `None` when there are no other members
    pub fn map_key<K: Hash + ?Sized>(&self, key: &K) -> Option<PeerId> {
        let snapshot = self.snapshot.load();
        snapshot
            .index_of(key)
            .map(|i| snapshot.members[i].clone())
    }

    /// Colon-separated replica candidates for `key`, or an empty string when
    /// there are none
    pub fn replica_choices<K: Hash + ?Sized>(&self, key: &K) -> String {
        let snapshot = self.snapshot.load();
        snapshot
            .index_of(key)
            .map(|i| snapshot.replica_choices[i].clone())
            .unwrap_or_default()
    }

    /// Where to look for the replica of `key`.
    ///
    /// A hint recorded from an earlier [`replica_choices`](Self::replica_choices)
    /// call wins; otherwise the key is hashed over the previous view.
    pub fn find_replica<K: Hash + ?Sized>(&self, key: &K, hint: Option<&str>) -> Vec<PeerId> {
        if let Some(hint) = hint.filter(|hint| !hint.is_empty()) {
            return hint
                .split(TOKEN_SEPARATOR)
                .filter_map(|token| PeerId::parse(token).ok())
                .collect();
        }

        let snapshot = self.snapshot.load();
        index(key, snapshot.previous_members.len())
            .map(|i| vec![snapshot.previous_members[i].clone()])
            .unwrap_or_default()
    }

    /// Current members used for placement
    pub fn members(&self) -> Vec<PeerId> {
        self.snapshot.load().members.clone()
    }

    /// Members of the view before the last change, without the local member
    pub fn previous_members(&self) -> Vec<PeerId> {
        self.snapshot.load().previous_members.clone()
    }

    /// Rebuild the mapping for a new view. `member` is the peer that joined
    /// or departed; a departed member is dropped from the previous view too.
    /// The local member is never part of either list.
    pub fn update(&self, member: &PeerId, current: &[PeerId], previous: &[PeerId], is_join: bool) {
        let _guard = self.update_lock.lock();

        let mut members: Vec<PeerId> = current
            .iter()
            .filter(|peer| **peer != self.local)
            .cloned()
            .collect();
        members.sort();
        members.dedup();

        let replica_choices = (0..members.len())
            .map(|i| self.choices_for(&members, i))
            .collect();

        let mut previous_members: Vec<PeerId> = previous
            .iter()
            .filter(|peer| **peer != self.local && (is_join || *peer != member))
            .cloned()
            .collect();
        previous_members.sort();
        previous_members.dedup();

        debug!(
            "Key mapper on {} now maps over {:?} (join: {}, previous {:?})",
            self.local, members, is_join, previous_members
        );

        self.snapshot.store(Arc::new(MapperSnapshot {
            members,
            replica_choices,
            previous_members,
        }));
    }

    fn choices_for(&self, members: &[PeerId], owner: usize) -> String {
        let len = members.len();
        let hops = self.hop_count.min(len.saturating_sub(1));
        (1..=hops)
            .map(|hop| members[(owner + hop) % len].as_str())
            .collect::<Vec<_>>()
            .join(&TOKEN_SEPARATOR.to_string())
    }
}

impl ViewChangeListener for DefaultKeyMapper {
    fn on_view_change(
        &self,
        member: &PeerId,
        current: &[PeerId],
        previous: &[PeerId],
        is_join: bool,
    ) -> Result<(), BoxError> {
        self.update(member, current, previous, is_join);
        Ok(())
    }
}
