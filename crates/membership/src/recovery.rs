//! Recovery target selection
//!
//! When a member fails, exactly one surviving CORE member must take over its
//! state. Every member runs the same selection over the same inputs and
//! therefore agrees on the recoverer without exchanging messages. Each member
//! also records the outcome in the group's state store.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use warden_store::{StateKey, StateStore};
use warden_topology::{MemberType, Node, PeerId};

use crate::error::{Error, Result};
use crate::utils::now_millis;

/// State tag recorded when a recoverer is appointed
pub const RECOVERY_SERVER_APPOINTED: &str = "RECOVERY_SERVER_APPOINTED";

/// State tag recorded while a recovery is running
pub const RECOVERY_IN_PROGRESS: &str = "RECOVERY_IN_PROGRESS";

/// Separator between state tag and timestamp in a stored record
pub const STATE_TAG_SEPARATOR: char = '|';

/// Recovery selection algorithm
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecoverySelectorMode {
    /// The failed member's successor in the previous view, wrapping around
    #[default]
    SimpleSelect,
    /// The first live member of the previous view
    FirstLiveSelect,
    /// Not implemented; behaves like [`SimpleSelect`](Self::SimpleSelect)
    HostSelect,
}

impl RecoverySelectorMode {
    /// Canonical upper-case name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SimpleSelect => "SIMPLESELECT",
            Self::FirstLiveSelect => "FIRSTLIVESELECT",
            Self::HostSelect => "HOSTSELECT",
        }
    }
}

impl fmt::Display for RecoverySelectorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoverySelectorMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SIMPLESELECT" => Ok(Self::SimpleSelect),
            "FIRSTLIVESELECT" => Ok(Self::FirstLiveSelect),
            "HOSTSELECT" => Ok(Self::HostSelect),
            other => Err(Error::Configuration(format!(
                "Unknown recovery selection mode: {other}"
            ))),
        }
    }
}

/// A recovery appointment as recorded in the state store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoverySelection {
    /// Member appointed to recover
    pub recoverer: PeerId,
    /// Member that failed
    pub failed: PeerId,
    /// Group both belong to
    pub group_name: String,
    /// Wall-clock milliseconds when the selection was made
    pub timestamp: i64,
    /// Recorded state tag
    pub state_tag: &'static str,
}

impl RecoverySelection {
    /// Stored representation: `<tag>|<millis>`
    pub fn value(&self) -> String {
        format!("{}{}{}", self.state_tag, STATE_TAG_SEPARATOR, self.timestamp)
    }
}

/// Published when the local member is appointed to recover a failed member
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveryAssignment {
    /// The member to recover
    pub failed: Node,
    /// Group the failed member belonged to
    pub group_name: String,
    /// Wall-clock milliseconds when the assignment was made
    pub timestamp: i64,
}

/// Names of the components that take part in recovery. Shared between the
/// selector and the group handle.
#[derive(Clone, Debug, Default)]
pub struct RecoveryComponents {
    names: Arc<RwLock<BTreeSet<String>>>,
}

impl RecoveryComponents {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component. Returns false if it was already registered.
    pub fn register(&self, name: impl Into<String>) -> bool {
        self.names.write().insert(name.into())
    }

    /// Unregister a component
    pub fn unregister(&self, name: &str) -> bool {
        self.names.write().remove(name)
    }

    /// Registered components, sorted
    pub fn names(&self) -> Vec<String> {
        self.names.read().iter().cloned().collect()
    }
}

/// Pick the recoverer for `failed`.
///
/// Candidates are the CORE members of `previous_view` that are still in
/// `current_members`, other than the failed member and the suspects. Returns
/// `None` when no candidate is left.
pub fn select_recoverer(
    mode: RecoverySelectorMode,
    previous_view: &[Node],
    current_members: &[PeerId],
    failed: &PeerId,
    suspects: &[PeerId],
) -> Option<PeerId> {
    let mut core: Vec<&PeerId> = previous_view
        .iter()
        .filter(|node| node.is_core())
        .map(|node| node.peer_id())
        .collect();
    core.sort();
    core.dedup();

    let live: Vec<&PeerId> = core
        .iter()
        .copied()
        .filter(|peer_id| {
            *peer_id != failed
                && !suspects.contains(*peer_id)
                && current_members.contains(*peer_id)
        })
        .collect();

    match mode {
        RecoverySelectorMode::FirstLiveSelect => live.first().map(|peer_id| (*peer_id).clone()),
        RecoverySelectorMode::SimpleSelect => simple_select(&core, &live, failed),
        RecoverySelectorMode::HostSelect => {
            warn!("HOSTSELECT recovery selection is not implemented, using SIMPLESELECT");
            simple_select(&core, &live, failed)
        }
    }
}

/// First live member after `failed` in `core` order, wrapping around
fn simple_select(core: &[&PeerId], live: &[&PeerId], failed: &PeerId) -> Option<PeerId> {
    let Some(position) = core.iter().position(|peer_id| *peer_id == failed) else {
        debug!(
            "Failed member {} is not a CORE member of the previous view, using first live member",
            failed
        );
        return live.first().map(|peer_id| (*peer_id).clone());
    };

    (1..core.len())
        .map(|offset| core[(position + offset) % core.len()])
        .find(|peer_id| live.contains(peer_id))
        .cloned()
}

/// Runs recovery selection for the local member and records the result.
pub struct RecoveryTargetSelector<S>
where
    S: StateStore,
{
    local: Node,
    store: S,
    components: RecoveryComponents,
}

impl<S> RecoveryTargetSelector<S>
where
    S: StateStore,
{
    /// Create a selector for `local`
    pub fn new(local: Node, store: S, components: RecoveryComponents) -> Self {
        Self {
            local,
            store,
            components,
        }
    }

    /// Select the recoverer for `failed` and record the appointment for every
    /// registered component. Returns whether the local member was selected.
    ///
    /// Store failures are logged per component and do not change the result.
    /// Watchdogs evaluate but never record.
    pub async fn resolve_recovery_assignment(
        &self,
        mode: Option<RecoverySelectorMode>,
        previous_view: &[Node],
        current_members: &[PeerId],
        failed: &PeerId,
        suspects: &[PeerId],
    ) -> Result<bool> {
        let mode = mode.unwrap_or_default();
        let Some(recoverer) =
            select_recoverer(mode, previous_view, current_members, failed, suspects)
        else {
            info!(
                "No live CORE member can recover {} in group {}",
                failed,
                self.local.group_name()
            );
            return Ok(false);
        };

        info!(
            "{} selected {} to recover {} in group {}",
            mode,
            recoverer,
            failed,
            self.local.group_name()
        );

        let selection = RecoverySelection {
            recoverer: recoverer.clone(),
            failed: failed.clone(),
            group_name: self.local.group_name().to_string(),
            timestamp: now_millis(),
            state_tag: RECOVERY_SERVER_APPOINTED,
        };
        self.record(&selection).await;

        Ok(&recoverer == self.local.peer_id())
    }

    /// Like [`resolve_recovery_assignment`](Self::resolve_recovery_assignment)
    /// with the mode given by name. An unknown name is logged and selects
    /// nobody.
    pub async fn resolve_recovery_assignment_by_name(
        &self,
        mode: &str,
        previous_view: &[Node],
        current_members: &[PeerId],
        failed: &PeerId,
        suspects: &[PeerId],
    ) -> Result<bool> {
        match mode.parse::<RecoverySelectorMode>() {
            Ok(mode) => {
                self.resolve_recovery_assignment(
                    Some(mode),
                    previous_view,
                    current_members,
                    failed,
                    suspects,
                )
                .await
            }
            Err(e) => {
                error!("{}; no recoverer selected for {}", e, failed);
                Ok(false)
            }
        }
    }

    async fn record(&self, selection: &RecoverySelection) {
        if self.local.member_type() == MemberType::Watchdog {
            debug!("Watchdog {} does not record recovery selections", self.local.peer_id());
            return;
        }

        let value = Bytes::from(selection.value());
        for component in self.components.names() {
            let key = StateKey::new(
                component.as_str(),
                selection.recoverer.as_str(),
                selection.failed.as_str(),
            );
            if let Err(e) = self.store.put(key, value.clone()).await {
                error!(
                    "Failed to record {} as recoverer of {} for component {}: {}",
                    selection.recoverer, selection.failed, component, e
                );
            }
        }
    }
}
