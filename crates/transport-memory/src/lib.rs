//! In-memory transport implementation for testing
//!
//! This transport routes messages between members within the same process.
//! Members are registered on an explicit [`MemoryNetwork`] hub, so independent
//! tests never share routing state. The hub can isolate a member to simulate a
//! crash or partition without tearing its tasks down.

use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use futures::Stream;
use tracing::{debug, info, warn};
use warden_topology::PeerId;
use warden_transport::{Config, Envelope, Transport, TransportError};

/// Shared routing hub for memory transports
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    peers: DashMap<PeerId, flume::Sender<Envelope>>,
    isolated: DashSet<PeerId>,
    config: Config,
}

impl Debug for MemoryNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("peers", &self.inner.peers.len())
            .field("isolated", &self.inner.isolated.len())
            .finish()
    }
}

impl MemoryNetwork {
    /// Create a new network with default configuration
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a new network with custom configuration
    pub fn with_config(config: Config) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                peers: DashMap::new(),
                isolated: DashSet::new(),
                config,
            }),
        }
    }

    /// Register a member and get its transport
    pub fn register(&self, peer_id: PeerId) -> Result<MemoryTransport, TransportError> {
        if self.inner.peers.contains_key(&peer_id) {
            return Err(TransportError::Other(format!(
                "Peer {peer_id} is already registered"
            )));
        }

        let (tx, rx) = flume::bounded(self.inner.config.inbound_queue_size);
        self.inner.peers.insert(peer_id.clone(), tx);

        info!("Registered memory transport for peer {}", peer_id);

        Ok(MemoryTransport {
            network: self.clone(),
            peer_id,
            receiver: rx,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Drop all traffic to and from a member until [`heal`](Self::heal) is called
    pub fn isolate(&self, peer_id: &PeerId) {
        info!("Isolating peer {} from the memory network", peer_id);
        self.inner.isolated.insert(peer_id.clone());
    }

    /// Restore traffic to and from a previously isolated member
    pub fn heal(&self, peer_id: &PeerId) {
        info!("Healing peer {} on the memory network", peer_id);
        self.inner.isolated.remove(peer_id);
    }

    /// Whether a member is currently isolated
    pub fn is_isolated(&self, peer_id: &PeerId) -> bool {
        self.inner.isolated.contains(peer_id)
    }

    /// Currently registered members
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.inner.peers.iter().map(|e| e.key().clone()).collect();
        peers.sort();
        peers
    }

    fn deliver(&self, from: &PeerId, to: &PeerId, payload: Bytes) -> Result<(), TransportError> {
        let sender = self
            .inner
            .peers
            .get(to)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::PeerNotFound(to.clone()))?;

        if self.is_isolated(from) || self.is_isolated(to) {
            debug!("Dropping message {} -> {} (isolated)", from, to);
            return Ok(());
        }

        let envelope = Envelope {
            sender: from.clone(),
            payload,
        };

        match sender.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Full(_)) => {
                // Datagram semantics: a saturated receiver loses the message
                warn!("Inbound queue of peer {} is full, dropping message", to);
                Ok(())
            }
            Err(flume::TrySendError::Disconnected(_)) => {
                Err(TransportError::PeerNotFound(to.clone()))
            }
        }
    }
}

/// Memory transport bound to one member of a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    peer_id: PeerId,
    receiver: flume::Receiver<Envelope>,
    closed: Arc<AtomicBool>,
}

impl Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("peer_id", &self.peer_id)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl MemoryTransport {
    fn check_open(&self, payload: &Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }

        let limit = self.network.inner.config.max_message_size;
        if payload.len() > limit {
            return Err(TransportError::MessageTooLarge {
                size: payload.len(),
                limit,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    async fn send(&self, recipient: &PeerId, payload: Bytes) -> Result<(), TransportError> {
        self.check_open(&payload)?;
        self.network.deliver(&self.peer_id, recipient, payload)
    }

    async fn broadcast(&self, payload: Bytes) -> Result<(), TransportError> {
        self.check_open(&payload)?;

        for peer in self.network.peers() {
            if peer == self.peer_id {
                continue;
            }
            if let Err(e) = self.network.deliver(&self.peer_id, &peer, payload.clone()) {
                debug!("Broadcast from {} skipped {}: {}", self.peer_id, peer, e);
            }
        }

        Ok(())
    }

    fn incoming(&self) -> Pin<Box<dyn Stream<Item = Envelope> + Send>> {
        Box::pin(self.receiver.clone().into_stream())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!("Shutting down memory transport for peer {}", self.peer_id);
        self.network.inner.peers.remove(&self.peer_id);
        self.network.inner.isolated.remove(&self.peer_id);

        Ok(())
    }
}
