//! Member liveness states

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Liveness state of a member as seen by the health monitor.
///
/// `Starting → Started → Alive ⇄ InDoubt → Dead` is the failure path;
/// `PeerStopping`/`ClusterStopping → Stopped` is the voluntary exit path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemberState {
    /// Member is booting
    Starting,
    /// Member has joined and is ready
    Started,
    /// Member is heartbeating
    Alive,
    /// Member is suspected failed but not yet confirmed
    InDoubt,
    /// Member failure has been verified
    Dead,
    /// Member is leaving on its own
    PeerStopping,
    /// Member is leaving as part of a group-wide shutdown
    ClusterStopping,
    /// Member has left
    Stopped,
    /// Member has never been seen
    #[default]
    Unknown,
}

impl MemberState {
    /// Whether this state reports a (suspected or verified) failure
    pub fn is_failure(self) -> bool {
        matches!(self, Self::InDoubt | Self::Dead)
    }

    /// Canonical upper-case name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Alive => "ALIVE",
            Self::InDoubt => "INDOUBT",
            Self::Dead => "DEAD",
            Self::PeerStopping => "PEERSTOPPING",
            Self::ClusterStopping => "CLUSTERSTOPPING",
            Self::Stopped => "STOPPED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s.to_ascii_uppercase().as_str() {
            "STARTING" => Self::Starting,
            "STARTED" => Self::Started,
            "ALIVE" => Self::Alive,
            "INDOUBT" => Self::InDoubt,
            "DEAD" => Self::Dead,
            "PEERSTOPPING" => Self::PeerStopping,
            "CLUSTERSTOPPING" => Self::ClusterStopping,
            "STOPPED" => Self::Stopped,
            "UNKNOWN" => Self::Unknown,
            other => return Err(Error::Codec(format!("Unknown member state: {other}"))),
        };
        Ok(state)
    }
}
