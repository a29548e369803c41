//! Cluster manager: the per-member context that wires everything together

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use warden_store::StateStore;
use warden_topology::{Node, PeerId};
use warden_transport::{Envelope, Transport};

use crate::config::MembershipConfig;
use crate::error::{BoxError, Error, Result};
use crate::events::{ClusterViewEvent, ClusterViewEventKind, ClusterViewEventListener};
use crate::group::GroupHandle;
use crate::health::HealthMonitor;
use crate::mapper::DefaultKeyMapper;
use crate::master::{DeterministicMaster, MasterNode};
use crate::messages::WireMessage;
use crate::multicast::AckedMulticast;
use crate::recovery::{
    RecoveryAssignment, RecoveryComponents, RecoverySelectorMode, RecoveryTargetSelector,
};
use crate::state::MemberState;
use crate::supervisor::supervise;
use crate::utils::now_millis;
use crate::view::ClusterViewManager;

const ASSIGNMENT_CHANNEL_SIZE: usize = 64;

/// Lifecycle of a [`ClusterManager`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagerState {
    /// Created but not started
    NotStarted,
    /// Loops are running
    Running,
    /// Stopped; cannot be restarted
    Stopped,
}

/// Forwards failure events to the recovery task
struct FailureForwarder {
    tx: mpsc::UnboundedSender<ClusterViewEvent>,
}

impl ClusterViewEventListener for FailureForwarder {
    fn on_event(&self, event: &ClusterViewEvent) -> std::result::Result<(), BoxError> {
        if event.kind == ClusterViewEventKind::Failure {
            self.tx.send(event.clone())?;
        }
        Ok(())
    }
}

/// Everything one member needs to take part in a group.
///
/// Owns the view, master election, health monitor, key mapper, recovery
/// selector and multicast endpoint for the local member, and runs the
/// background loops that drive them.
pub struct ClusterManager<T, S>
where
    T: Transport,
    S: StateStore,
{
    local: Node,
    config: MembershipConfig,
    transport: Arc<T>,
    view: Arc<ClusterViewManager>,
    master: Arc<dyn MasterNode>,
    health: Arc<HealthMonitor<T>>,
    multicast: Arc<AckedMulticast<T>>,
    key_mapper: Arc<DefaultKeyMapper>,
    selector: Arc<RecoveryTargetSelector<S>>,
    group: GroupHandle<T, S>,
    assignments: broadcast::Sender<RecoveryAssignment>,
    failures: Mutex<Option<mpsc::UnboundedReceiver<ClusterViewEvent>>>,
    state: RwLock<ManagerState>,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl<T, S> ClusterManager<T, S>
where
    T: Transport,
    S: StateStore,
{
    /// Create a manager using [`DeterministicMaster`] election
    pub fn new(local: Node, config: MembershipConfig, transport: T, store: S) -> Result<Self> {
        Self::with_master(local, config, transport, store, |view| {
            Arc::new(DeterministicMaster::new(view)) as Arc<dyn MasterNode>
        })
    }

    /// Create a manager with a custom master election
    pub fn with_master<M>(
        local: Node,
        config: MembershipConfig,
        transport: T,
        store: S,
        make_master: M,
    ) -> Result<Self>
    where
        M: FnOnce(Arc<ClusterViewManager>) -> Arc<dyn MasterNode>,
    {
        config.validate()?;
        if transport.local_peer_id() != local.peer_id() {
            return Err(Error::Configuration(format!(
                "Transport sends as {} but the local member is {}",
                transport.local_peer_id(),
                local.peer_id()
            )));
        }

        let transport = Arc::new(transport);
        let view = Arc::new(ClusterViewManager::new(local.clone()));

        let key_mapper = Arc::new(DefaultKeyMapper::new(
            local.peer_id().clone(),
            config.key_mapper.hop_count,
        ));
        key_mapper.update(local.peer_id(), &view.members(), &[], true);
        view.add_view_listener(key_mapper.clone());

        let master = make_master(view.clone());
        let health = Arc::new(HealthMonitor::new(
            local.clone(),
            config.health.clone(),
            transport.clone(),
            view.clone(),
            master.clone(),
        ));
        let multicast = Arc::new(AckedMulticast::new(
            transport.clone(),
            config.multicast.clone(),
        ));

        let components = RecoveryComponents::new();
        let selector = Arc::new(RecoveryTargetSelector::new(
            local.clone(),
            store.clone(),
            components.clone(),
        ));
        let group = GroupHandle::new(
            view.clone(),
            master.clone(),
            health.clone(),
            store,
            components,
        );

        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        view.add_event_listener(Arc::new(FailureForwarder { tx: failure_tx }));
        let (assignments, _) = broadcast::channel(ASSIGNMENT_CHANNEL_SIZE);

        Ok(Self {
            local,
            config,
            transport,
            view,
            master,
            health,
            multicast,
            key_mapper,
            selector,
            group,
            assignments,
            failures: Mutex::new(Some(failure_rx)),
            state: RwLock::new(ManagerState::NotStarted),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Start the inbound dispatch, heartbeat, detector, verifier and
    /// recovery tasks
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != ManagerState::NotStarted {
                return Err(Error::AlreadyStarted);
            }
            *state = ManagerState::Running;
        }

        let Some(failures) = self.failures.lock().take() else {
            return Err(Error::AlreadyStarted);
        };

        self.master.appoint_master();

        self.task_tracker.spawn(dispatch(
            self.health.clone(),
            self.multicast.clone(),
            self.transport.incoming(),
            self.cancellation_token.clone(),
        ));

        let restart_delay = self.config.health.restart_delay;
        let health = self.health.clone();
        self.task_tracker.spawn(supervise(
            "heartbeat",
            restart_delay,
            self.cancellation_token.clone(),
            move |token| health.clone().run_heartbeat(token),
        ));
        let health = self.health.clone();
        self.task_tracker.spawn(supervise(
            "in-doubt detector",
            restart_delay,
            self.cancellation_token.clone(),
            move |token| health.clone().run_detector(token),
        ));
        let health = self.health.clone();
        self.task_tracker.spawn(supervise(
            "failure verifier",
            restart_delay,
            self.cancellation_token.clone(),
            move |token| health.clone().run_verifier(token),
        ));

        self.task_tracker.spawn(run_recovery(
            self.selector.clone(),
            self.view.clone(),
            self.health.clone(),
            self.config.recovery.mode,
            self.assignments.clone(),
            failures,
            self.cancellation_token.clone(),
        ));

        info!(
            "Cluster manager for {} started in group {}",
            self.local.peer_id(),
            self.local.group_name()
        );
        Ok(())
    }

    /// Tell the group the local member is joined and ready
    pub async fn report_joined_and_ready(&self) -> Result<()> {
        self.ensure_running()?;
        self.health.report_joined_and_ready().await;
        Ok(())
    }

    /// Tell the group the local member is about to leave
    pub async fn announce_stop(&self, is_cluster_shutdown: bool) -> Result<()> {
        self.ensure_running()?;
        info!(
            "{} announcing stop (cluster shutdown: {})",
            self.local.peer_id(),
            is_cluster_shutdown
        );
        self.health.announce_stop(is_cluster_shutdown).await;
        Ok(())
    }

    /// Report STOPPED, stop every background task and shut the transport down
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            match *state {
                ManagerState::NotStarted => return Err(Error::NotStarted),
                ManagerState::Stopped => return Ok(()),
                ManagerState::Running => *state = ManagerState::Stopped,
            }
        }

        self.health.stop().await;

        debug!("Signaling cancellation to background tasks");
        self.cancellation_token.cancel();
        self.task_tracker.close();

        match tokio::time::timeout(Duration::from_secs(5), self.task_tracker.wait()).await {
            Ok(()) => debug!("All background tasks completed"),
            Err(_) => warn!("Background tasks did not complete within 5 seconds timeout"),
        }

        if let Err(e) = self.transport.shutdown().await {
            warn!("Failed to shut down transport: {}", e);
        }

        info!("Cluster manager for {} stopped", self.local.peer_id());
        Ok(())
    }

    /// Current lifecycle state
    pub fn state(&self) -> ManagerState {
        *self.state.read()
    }

    /// Subscribe to recovery assignments for the local member
    pub fn subscribe_recovery(&self) -> broadcast::Receiver<RecoveryAssignment> {
        self.assignments.subscribe()
    }

    /// State of a member as seen locally
    pub fn member_state(&self, peer_id: &PeerId) -> MemberState {
        self.health.member_state(peer_id)
    }

    /// The local member
    pub fn local(&self) -> &Node {
        &self.local
    }

    /// Active configuration
    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    /// Membership view
    pub fn view(&self) -> &Arc<ClusterViewManager> {
        &self.view
    }

    /// Master election
    pub fn master(&self) -> &Arc<dyn MasterNode> {
        &self.master
    }

    /// Health monitor
    pub fn health(&self) -> &Arc<HealthMonitor<T>> {
        &self.health
    }

    /// Key mapper
    pub fn key_mapper(&self) -> &Arc<DefaultKeyMapper> {
        &self.key_mapper
    }

    /// Acknowledged multicast endpoint
    pub fn multicast(&self) -> &Arc<AckedMulticast<T>> {
        &self.multicast
    }

    /// Recovery selector
    pub fn recovery_selector(&self) -> &Arc<RecoveryTargetSelector<S>> {
        &self.selector
    }

    /// Application-facing group handle
    pub fn group(&self) -> GroupHandle<T, S> {
        self.group.clone()
    }

    fn ensure_running(&self) -> Result<()> {
        match *self.state.read() {
            ManagerState::Running => Ok(()),
            _ => Err(Error::NotStarted),
        }
    }
}

/// Decode inbound payloads once and route them
async fn dispatch<T>(
    health: Arc<HealthMonitor<T>>,
    multicast: Arc<AckedMulticast<T>>,
    mut incoming: Pin<Box<dyn Stream<Item = Envelope> + Send>>,
    cancellation_token: CancellationToken,
) where
    T: Transport,
{
    loop {
        tokio::select! {
            envelope = incoming.next() => {
                let Some(envelope) = envelope else {
                    debug!("Inbound stream for {} ended", health.local().peer_id());
                    break;
                };

                match WireMessage::decode(&envelope.payload) {
                    Ok(WireMessage::Health(message)) => health.process(message).await,
                    Ok(WireMessage::Multicast(message)) => {
                        multicast.handle(&envelope.sender, message).await
                    }
                    Err(e) => warn!("Dropping malformed message from {}: {}", envelope.sender, e),
                }
            }
            _ = cancellation_token.cancelled() => break,
        }
    }
}

/// Evaluate recovery for every failure and publish local appointments
async fn run_recovery<T, S>(
    selector: Arc<RecoveryTargetSelector<S>>,
    view: Arc<ClusterViewManager>,
    health: Arc<HealthMonitor<T>>,
    mode: Option<RecoverySelectorMode>,
    assignments: broadcast::Sender<RecoveryAssignment>,
    mut failures: mpsc::UnboundedReceiver<ClusterViewEvent>,
    cancellation_token: CancellationToken,
) where
    T: Transport,
    S: StateStore,
{
    loop {
        let event = tokio::select! {
            event = failures.recv() => event,
            _ = cancellation_token.cancelled() => break,
        };
        let Some(event) = event else {
            break;
        };

        let failed = event.peer_id();
        let suspects: Vec<PeerId> = health
            .suspects()
            .into_iter()
            .filter(|peer_id| peer_id != failed)
            .collect();
        // Members that left while this event was queued cannot recover
        let current_members = view.members();

        match selector
            .resolve_recovery_assignment(
                mode,
                &event.previous_view,
                &current_members,
                failed,
                &suspects,
            )
            .await
        {
            Ok(true) => {
                info!(
                    "{} is the recoverer for {}",
                    health.local().peer_id(),
                    failed
                );
                let assignment = RecoveryAssignment {
                    failed: event.node.clone(),
                    group_name: health.local().group_name().to_string(),
                    timestamp: now_millis(),
                };
                if assignments.send(assignment).is_err() {
                    debug!("No subscribers for recovery assignment of {}", failed);
                }
            }
            Ok(false) => debug!("{} is not the recoverer for {}", health.local().peer_id(), failed),
            Err(e) => error!("Recovery selection for {} failed: {}", failed, e),
        }
    }
}
