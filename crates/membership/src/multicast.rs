//! Multicast with acknowledgments
//!
//! Data messages carry the sender's sequence number. Receivers acknowledge
//! every data message to its sender before handing it to the listener, so a
//! sender can wait until enough members have it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};
use warden_topology::PeerId;
use warden_transport::Transport;

use crate::config::MulticastConfig;
use crate::error::{BoxError, Error, Result};
use crate::messages::{MulticastMessage, WireMessage};

/// Receives multicast payloads
pub trait MulticastListener: Send + Sync + 'static {
    /// Handle a payload from `sender`
    fn on_message(&self, sender: &PeerId, payload: Bytes) -> std::result::Result<(), BoxError>;
}

struct PendingAcks {
    threshold: usize,
    expected: Option<Vec<PeerId>>,
    acked: Vec<PeerId>,
    done: Option<oneshot::Sender<()>>,
}

impl PendingAcks {
    fn accept(&mut self, sender: &PeerId) {
        if self.acked.contains(sender) {
            return;
        }
        if let Some(expected) = &self.expected {
            if !expected.contains(sender) {
                return;
            }
        }
        self.acked.push(sender.clone());
        if self.acked.len() >= self.threshold {
            if let Some(done) = self.done.take() {
                let _ = done.send(());
            }
        }
    }
}

/// Acknowledged multicast over a [`Transport`]
pub struct AckedMulticast<T>
where
    T: Transport,
{
    transport: Arc<T>,
    config: MulticastConfig,
    sequence: AtomicU64,
    pending: Mutex<HashMap<u64, PendingAcks>>,
    listener: RwLock<Option<Arc<dyn MulticastListener>>>,
}

impl<T> AckedMulticast<T>
where
    T: Transport,
{
    /// Create a multicast endpoint
    pub fn new(transport: Arc<T>, config: MulticastConfig) -> Self {
        Self {
            transport,
            config,
            sequence: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            listener: RwLock::new(None),
        }
    }

    /// Set the listener that receives payloads
    pub fn set_listener(&self, listener: Arc<dyn MulticastListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Broadcast without waiting for acknowledgments
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        let sequence = self.next_sequence();
        self.transport
            .broadcast(Self::data(sequence, payload)?)
            .await?;
        Ok(())
    }

    /// Broadcast and wait until `threshold` members acknowledge.
    ///
    /// Returns the members that acknowledged. Falling short within the
    /// configured timeout yields [`Error::InsufficientAcks`].
    pub async fn send_with_threshold(&self, payload: Bytes, threshold: usize) -> Result<Vec<PeerId>> {
        if threshold == 0 {
            self.send(payload).await?;
            return Ok(Vec::new());
        }

        let sequence = self.next_sequence();
        let data = Self::data(sequence, payload)?;
        let done = self.register(sequence, threshold, None);

        if let Err(e) = self.transport.broadcast(data).await {
            self.pending.lock().remove(&sequence);
            return Err(e.into());
        }

        self.await_acks(sequence, done).await
    }

    /// Send to each of `peers` and wait until all of them acknowledge
    pub async fn send_to_peers(&self, peers: &[PeerId], payload: Bytes) -> Result<Vec<PeerId>> {
        let mut targets = peers.to_vec();
        targets.sort();
        targets.dedup();
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let sequence = self.next_sequence();
        let data = Self::data(sequence, payload)?;
        let done = self.register(sequence, targets.len(), Some(targets.clone()));

        for peer in &targets {
            if let Err(e) = self.transport.send(peer, data.clone()).await {
                warn!("Multicast {} to {} failed: {}", sequence, peer, e);
            }
        }

        self.await_acks(sequence, done).await
    }

    /// Handle inbound multicast traffic
    pub async fn handle(&self, sender: &PeerId, message: MulticastMessage) {
        if sender == self.transport.local_peer_id() {
            return;
        }

        match message {
            MulticastMessage::Data { sequence, payload } => {
                match WireMessage::Multicast(MulticastMessage::Ack { sequence }).encode() {
                    Ok(ack) => {
                        if let Err(e) = self.transport.send(sender, ack).await {
                            debug!("Failed to acknowledge {} from {}: {}", sequence, sender, e);
                        }
                    }
                    Err(e) => warn!("Failed to encode ack: {}", e),
                }

                let listener = self.listener.read().clone();
                match listener {
                    Some(listener) => {
                        if let Err(e) = listener.on_message(sender, payload) {
                            warn!("Multicast listener failed: {}", e);
                        }
                    }
                    None => debug!("No multicast listener for message {} from {}", sequence, sender),
                }
            }
            MulticastMessage::Ack { sequence } => {
                if let Some(pending) = self.pending.lock().get_mut(&sequence) {
                    pending.accept(sender);
                }
            }
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn data(sequence: u64, payload: Bytes) -> Result<Bytes> {
        WireMessage::Multicast(MulticastMessage::Data { sequence, payload }).encode()
    }

    fn register(
        &self,
        sequence: u64,
        threshold: usize,
        expected: Option<Vec<PeerId>>,
    ) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            sequence,
            PendingAcks {
                threshold,
                expected,
                acked: Vec::new(),
                done: Some(tx),
            },
        );
        rx
    }

    async fn await_acks(&self, sequence: u64, done: oneshot::Receiver<()>) -> Result<Vec<PeerId>> {
        let outcome = timeout(self.config.total_timeout(), done).await;
        let Some(pending) = self.pending.lock().remove(&sequence) else {
            return Err(Error::Task(format!("Lost pending acks for message {sequence}")));
        };

        match outcome {
            Ok(Ok(())) => Ok(pending.acked),
            _ => Err(Error::InsufficientAcks {
                sequence,
                threshold: pending.threshold,
                acked: pending.acked,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;
    use warden_transport_memory::{MemoryNetwork, MemoryTransport};

    fn peer(name: &str) -> PeerId {
        PeerId::parse(name).unwrap()
    }

    #[derive(Default)]
    struct Inbox {
        messages: Mutex<Vec<(PeerId, Bytes)>>,
    }

    impl MulticastListener for Inbox {
        fn on_message(
            &self,
            sender: &PeerId,
            payload: Bytes,
        ) -> std::result::Result<(), BoxError> {
            self.messages.lock().push((sender.clone(), payload));
            Ok(())
        }
    }

    fn endpoint(network: &MemoryNetwork, name: &str) -> Arc<AckedMulticast<MemoryTransport>> {
        let transport = Arc::new(network.register(peer(name)).unwrap());
        Arc::new(AckedMulticast::new(transport, MulticastConfig::default()))
    }

    /// Pump inbound traffic of `endpoint` into its multicast handler
    fn pump(endpoint: Arc<AckedMulticast<MemoryTransport>>) {
        tokio::spawn(async move {
            let mut incoming = endpoint.transport.incoming();
            while let Some(envelope) = incoming.next().await {
                if let Ok(WireMessage::Multicast(message)) = WireMessage::decode(&envelope.payload)
                {
                    endpoint.handle(&envelope.sender, message).await;
                }
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_reached() {
        let network = MemoryNetwork::new();
        let a = endpoint(&network, "a");
        let b = endpoint(&network, "b");
        let c = endpoint(&network, "c");
        let inbox = Arc::new(Inbox::default());
        b.set_listener(inbox.clone());
        for endpoint in [&a, &b, &c] {
            pump(endpoint.clone());
        }

        let mut acked = a
            .send_with_threshold(Bytes::from_static(b"hello"), 2)
            .await
            .unwrap();
        acked.sort();
        assert_eq!(acked, vec![peer("b"), peer("c")]);

        let messages = inbox.messages.lock().clone();
        assert_eq!(messages, vec![(peer("a"), Bytes::from_static(b"hello"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_acks() {
        let network = MemoryNetwork::new();
        let a = endpoint(&network, "a");
        let b = endpoint(&network, "b");
        let _c = endpoint(&network, "c");
        pump(a.clone());
        pump(b.clone());
        network.isolate(&peer("c"));

        let started = tokio::time::Instant::now();
        let err = a
            .send_with_threshold(Bytes::from_static(b"hello"), 2)
            .await
            .unwrap_err();
        assert!(err.is_insufficient_acks());
        assert!(started.elapsed() >= Duration::from_millis(5250));
        match err {
            Error::InsufficientAcks { threshold, acked, .. } => {
                assert_eq!(threshold, 2);
                assert_eq!(acked, vec![peer("b")]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_to_peers_waits_for_each() {
        let network = MemoryNetwork::new();
        let a = endpoint(&network, "a");
        let b = endpoint(&network, "b");
        let c = endpoint(&network, "c");
        for endpoint in [&a, &b, &c] {
            pump(endpoint.clone());
        }

        let acked = a
            .send_to_peers(&[peer("c")], Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(acked, vec![peer("c")]);

        assert!(a.send_to_peers(&[], Bytes::new()).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_threshold_returns_immediately() {
        let network = MemoryNetwork::new();
        let a = endpoint(&network, "a");
        let acked = a
            .send_with_threshold(Bytes::from_static(b"x"), 0)
            .await
            .unwrap();
        assert!(acked.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loopback_is_ignored() {
        let network = MemoryNetwork::new();
        let a = endpoint(&network, "a");
        let inbox = Arc::new(Inbox::default());
        a.set_listener(inbox.clone());

        a.handle(
            &peer("a"),
            MulticastMessage::Data {
                sequence: 1,
                payload: Bytes::from_static(b"x"),
            },
        )
        .await;
        assert!(inbox.messages.lock().is_empty());
    }
}
