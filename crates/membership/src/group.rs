//! Application-facing view of the group

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};
use warden_store::{StateKey, StateStore};
use warden_topology::{Node, PeerId};
use warden_transport::Transport;

use crate::error::{Error, Result};
use crate::health::HealthMonitor;
use crate::master::MasterNode;
use crate::recovery::{RECOVERY_IN_PROGRESS, RecoveryComponents, STATE_TAG_SEPARATOR};
use crate::state::MemberState;
use crate::utils::now_millis;
use crate::view::ClusterViewManager;

/// Membership queries and recovery fencing for application components.
///
/// Cheap to clone; clones share state with the cluster manager that handed
/// them out.
pub struct GroupHandle<T, S>
where
    T: Transport,
    S: StateStore,
{
    local: Node,
    view: Arc<ClusterViewManager>,
    master: Arc<dyn MasterNode>,
    health: Arc<HealthMonitor<T>>,
    store: S,
    components: RecoveryComponents,
}

impl<T, S> Clone for GroupHandle<T, S>
where
    T: Transport,
    S: StateStore,
{
    fn clone(&self) -> Self {
        Self {
            local: self.local.clone(),
            view: self.view.clone(),
            master: self.master.clone(),
            health: self.health.clone(),
            store: self.store.clone(),
            components: self.components.clone(),
        }
    }
}

impl<T, S> GroupHandle<T, S>
where
    T: Transport,
    S: StateStore,
{
    pub(crate) fn new(
        view: Arc<ClusterViewManager>,
        master: Arc<dyn MasterNode>,
        health: Arc<HealthMonitor<T>>,
        store: S,
        components: RecoveryComponents,
    ) -> Self {
        Self {
            local: view.local().clone(),
            view,
            master,
            health,
            store,
            components,
        }
    }

    /// Name of the group
    pub fn group_name(&self) -> &str {
        self.local.group_name()
    }

    /// The local member
    pub fn local(&self) -> &Node {
        &self.local
    }

    /// CORE members of the current view
    pub fn current_core_members(&self) -> Vec<PeerId> {
        self.view.core_members()
    }

    /// Every member of the current view
    pub fn current_members(&self) -> Vec<PeerId> {
        self.view.members()
    }

    /// Members of the current view that are not suspected
    pub fn alive_and_ready_members(&self) -> Vec<PeerId> {
        let suspects = self.health.suspects();
        self.view
            .members()
            .into_iter()
            .filter(|peer_id| !suspects.contains(peer_id))
            .collect()
    }

    /// Last known state of a member
    pub fn member_state(&self, peer_id: &PeerId) -> MemberState {
        self.health.member_state(peer_id)
    }

    /// Whether a member is in the view and not known to have failed
    pub fn is_member_alive(&self, peer_id: &PeerId) -> bool {
        self.view.contains(peer_id) && self.member_state(peer_id) != MemberState::Dead
    }

    /// The current master
    pub fn group_leader(&self) -> Option<PeerId> {
        self.master.master_node_id()
    }

    /// Whether the local member is the master
    pub fn is_group_leader(&self) -> bool {
        self.master.is_master()
    }

    /// Register a component that takes part in recovery
    pub fn register_recovery_component(&self, component: impl Into<String>) {
        let component = component.into();
        if self.components.register(component.clone()) {
            debug!("Registered recovery component {}", component);
        }
    }

    /// Unregister a recovery component
    pub fn unregister_recovery_component(&self, component: &str) -> bool {
        self.components.unregister(component)
    }

    /// Registered recovery components
    pub fn recovery_components(&self) -> Vec<String> {
        self.components.names()
    }

    /// Record that the local member is recovering `failed` for `component`.
    ///
    /// Other members check [`is_fenced`](Self::is_fenced) before touching
    /// the failed member's state.
    pub async fn raise_fence(&self, component: &str, failed: &PeerId) -> Result<()> {
        let value = format!("{RECOVERY_IN_PROGRESS}{STATE_TAG_SEPARATOR}{}", now_millis());
        self.store
            .put(self.fence_key(component, failed), Bytes::from(value))
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        info!(
            "{} raised recovery fence for {} in {}",
            self.local.peer_id(),
            failed,
            component
        );
        Ok(())
    }

    /// Remove a fence raised by the local member
    pub async fn lower_fence(&self, component: &str, failed: &PeerId) -> Result<()> {
        let removed = self
            .store
            .remove(&self.fence_key(component, failed))
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        if removed {
            info!(
                "{} lowered recovery fence for {} in {}",
                self.local.peer_id(),
                failed,
                component
            );
        }
        Ok(())
    }

    /// Whether any member is recovering `failed` for `component`
    pub async fn is_fenced(&self, component: &str, failed: &PeerId) -> Result<bool> {
        let entries = self
            .store
            .entries(component)
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        Ok(entries.iter().any(|(key, value)| {
            key.key == failed.as_str() && value.starts_with(RECOVERY_IN_PROGRESS.as_bytes())
        }))
    }

    fn fence_key(&self, component: &str, failed: &PeerId) -> StateKey {
        StateKey::new(component, self.local.peer_id().as_str(), failed.as_str())
    }
}
