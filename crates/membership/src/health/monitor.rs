//! Health monitor: inbound report processing and outbound reports

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use warden_topology::{Node, PeerId};
use warden_transport::Transport;

use super::cache::HealthCache;
use crate::config::HealthConfig;
use crate::error::BoxError;
use crate::events::{ClusterViewEventKind, PeerHealthListener};
use crate::master::MasterNode;
use crate::messages::{HealthMessage, WireMessage};
use crate::state::MemberState;
use crate::view::ClusterViewManager;

const SUSPECT_QUEUE_SIZE: usize = 64;

/// Owns the liveness state machine for every peer of the local member.
///
/// Inbound reports go through [`HealthMonitor::process`]. The heartbeat,
/// detector and verifier loops are driven by [`HealthMonitor::run_heartbeat`],
/// [`HealthMonitor::run_detector`] and [`HealthMonitor::run_verifier`].
pub struct HealthMonitor<T>
where
    T: Transport,
{
    pub(super) local: Node,
    pub(super) config: HealthConfig,
    pub(super) transport: Arc<T>,
    pub(super) view: Arc<ClusterViewManager>,
    pub(super) master: Arc<dyn MasterNode>,
    pub(super) cache: HealthCache,
    pub(super) suspect_tx: mpsc::Sender<PeerId>,
    pub(super) suspect_rx: tokio::sync::Mutex<mpsc::Receiver<PeerId>>,
    sequence: AtomicU64,
    local_state: Mutex<MemberState>,
    stopping: AtomicBool,
    listeners: RwLock<Vec<Arc<dyn PeerHealthListener>>>,
}

impl<T> HealthMonitor<T>
where
    T: Transport,
{
    /// Create a monitor for `local`
    pub fn new(
        local: Node,
        config: HealthConfig,
        transport: Arc<T>,
        view: Arc<ClusterViewManager>,
        master: Arc<dyn MasterNode>,
    ) -> Self {
        let (suspect_tx, suspect_rx) = mpsc::channel(SUSPECT_QUEUE_SIZE);
        Self {
            local,
            config,
            transport,
            view,
            master,
            cache: HealthCache::new(),
            suspect_tx,
            suspect_rx: tokio::sync::Mutex::new(suspect_rx),
            sequence: AtomicU64::new(0),
            local_state: Mutex::new(MemberState::Starting),
            stopping: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a health listener
    pub fn add_listener(&self, listener: Arc<dyn PeerHealthListener>) {
        self.listeners.write().push(listener);
    }

    /// Get the local member
    pub fn local(&self) -> &Node {
        &self.local
    }

    /// State of `peer_id` as far as this member knows
    pub fn member_state(&self, peer_id: &PeerId) -> MemberState {
        if peer_id == self.local.peer_id() {
            return *self.local_state.lock();
        }
        self.cache.state(peer_id).unwrap_or_default()
    }

    /// Peers currently suspected or confirmed failed
    pub fn suspects(&self) -> Vec<PeerId> {
        self.cache
            .peers_in(&[MemberState::InDoubt, MemberState::Dead])
    }

    /// Whether a stop has been announced or performed
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Handle a health report received from the transport
    pub async fn process(&self, message: HealthMessage) {
        if &message.source == self.local.peer_id() {
            return;
        }
        if self.is_stopping() {
            debug!(
                "Ignoring health report from {} while {} is stopping",
                message.source,
                self.local.peer_id()
            );
            return;
        }

        for report in message.reports {
            if report.node.peer_id() == self.local.peer_id() {
                if report.state.is_failure() {
                    info!(
                        "Member {} reported {} as {}, answering ALIVE",
                        message.source,
                        self.local.peer_id(),
                        report.state
                    );
                    self.send_report(Some(&message.source), self.local.clone(), MemberState::Alive)
                        .await;
                }
                continue;
            }

            self.apply_report(report.node, report.state).await;
        }
    }

    async fn apply_report(&self, node: Node, state: MemberState) {
        let peer_id = node.peer_id().clone();
        let previous = self.cache.record(node.clone(), state, Instant::now());
        debug!(
            "Member {} recorded {} as {} (was {:?})",
            self.local.peer_id(),
            peer_id,
            state,
            previous
        );

        if matches!(
            state,
            MemberState::Starting | MemberState::Started | MemberState::Alive
        ) && !self.view.contains(&peer_id)
            && node.member_type().in_ready_view()
        {
            debug!("Probing unknown member {}", peer_id);
            self.master.probe_node(&node);
        }

        match state {
            MemberState::Started | MemberState::Alive => {
                if previous == Some(MemberState::InDoubt) {
                    info!("Member {} is no longer in doubt", peer_id);
                    self.view
                        .notify(ClusterViewEventKind::NoLongerInDoubt, node.clone());
                    self.notify_listeners(|l| l.on_peer_alive_again(&node));
                }
            }
            MemberState::PeerStopping | MemberState::ClusterStopping => {
                if previous != Some(state) {
                    self.handle_stop_event(&node, state == MemberState::ClusterStopping);
                }
            }
            MemberState::InDoubt => {
                if previous != Some(MemberState::InDoubt) {
                    warn!("Member {} reported {} as in doubt", self.local.peer_id(), peer_id);
                    self.view.notify(ClusterViewEventKind::InDoubt, node.clone());
                    self.notify_listeners(|l| l.on_peer_indoubt(&node));
                }
            }
            MemberState::Dead => {
                if previous != Some(MemberState::Dead) {
                    self.assign_and_report_failure(&node, false).await;
                }
            }
            MemberState::Stopped => {
                if self.view.contains(&peer_id) {
                    self.handle_stop_event(&node, false);
                }
            }
            MemberState::Starting | MemberState::Unknown => {}
        }
    }

    /// Remove a member that announced its departure, handing off master if
    /// it was the master.
    fn handle_stop_event(&self, node: &Node, is_cluster_wide: bool) {
        let was_master = self.master.master_node_id().as_ref() == Some(node.peer_id());
        let kind = if is_cluster_wide {
            ClusterViewEventKind::ClusterStop
        } else {
            ClusterViewEventKind::PeerStop
        };

        info!(
            "Member {} is stopping (cluster wide: {})",
            node.peer_id(),
            is_cluster_wide
        );
        self.view.remove(node.peer_id(), kind);
        self.notify_listeners(|l| l.on_peer_stopping(node, is_cluster_wide));

        if was_master {
            self.master.reset_master();
            self.master.appoint_master();
        }
    }

    /// Report a verified failure: broadcast it if asked, remove the member
    /// from the view and re-elect if it was the master.
    pub(super) async fn assign_and_report_failure(&self, node: &Node, broadcast: bool) {
        warn!(
            "Member {} declared {} dead",
            self.local.peer_id(),
            node.peer_id()
        );

        if broadcast {
            self.send_report(None, node.clone(), MemberState::Dead).await;
        }

        let was_master = self.master.master_node_id().as_ref() == Some(node.peer_id());
        self.view
            .remove(node.peer_id(), ClusterViewEventKind::Failure);
        self.notify_listeners(|l| l.on_peer_dead(node));

        if was_master {
            info!("Master {} failed, appointing a new master", node.peer_id());
            self.master.reset_master();
            self.master.appoint_master();
        }
    }

    /// Broadcast STARTED for the local member
    pub async fn report_joined_and_ready(&self) {
        self.set_local_state(MemberState::Started);
        self.send_report(None, self.local.clone(), MemberState::Started)
            .await;
    }

    /// Broadcast that the local member is leaving.
    ///
    /// From here on inbound reports are ignored and the detector idles.
    pub async fn announce_stop(&self, is_cluster_shutdown: bool) {
        let state = if is_cluster_shutdown {
            MemberState::ClusterStopping
        } else {
            MemberState::PeerStopping
        };
        self.stopping.store(true, Ordering::SeqCst);
        self.set_local_state(state);
        self.send_report(None, self.local.clone(), state).await;
    }

    /// Broadcast STOPPED for the local member
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.set_local_state(MemberState::Stopped);
        self.send_report(None, self.local.clone(), MemberState::Stopped)
            .await;
    }

    /// Broadcast one heartbeat
    pub async fn heartbeat(&self) {
        if self.is_stopping() {
            return;
        }
        {
            let mut local_state = self.local_state.lock();
            if matches!(*local_state, MemberState::Starting | MemberState::Started) {
                *local_state = MemberState::Alive;
            }
        }
        self.send_report(None, self.local.clone(), MemberState::Alive)
            .await;
    }

    fn set_local_state(&self, state: MemberState) {
        *self.local_state.lock() = state;
    }

    /// Send a report about `node` to `target`, or to everyone. Failures are
    /// logged and swallowed.
    pub(super) async fn send_report(&self, target: Option<&PeerId>, node: Node, state: MemberState) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let message = WireMessage::Health(HealthMessage::single(
            self.local.peer_id().clone(),
            sequence,
            node,
            state,
        ));

        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode health report: {}", e);
                return;
            }
        };

        let result = match target {
            Some(peer_id) => self.transport.send(peer_id, payload).await,
            None => self.transport.broadcast(payload).await,
        };
        if let Err(e) = result {
            warn!(
                "Member {} failed to send {} report: {}",
                self.local.peer_id(),
                state,
                e
            );
        }
    }

    pub(super) fn notify_listeners(
        &self,
        call: impl Fn(&dyn PeerHealthListener) -> Result<(), BoxError>,
    ) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            if let Err(e) = call(listener.as_ref()) {
                warn!("Health listener failed: {}", e);
            }
        }
    }
}
