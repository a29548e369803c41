//! Member advertisement

use serde::{Deserialize, Serialize};

use crate::{MemberType, PeerId};

/// What a member publishes about itself: identity, group, host and role.
///
/// Health messages carry a snapshot of this so that peers can admit a member
/// they have never seen before.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct Node {
    peer_id: PeerId,
    group_name: String,
    host: String,
    member_type: MemberType,
}

impl Node {
    /// Create a new member advertisement
    pub fn new(
        peer_id: PeerId,
        group_name: impl Into<String>,
        host: impl Into<String>,
        member_type: MemberType,
    ) -> Self {
        Self {
            peer_id,
            group_name: group_name.into(),
            host: host.into(),
            member_type,
        }
    }

    /// Get the peer id of this member
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Get the group this member belongs to
    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    /// Get the host this member runs on
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the role of this member
    pub fn member_type(&self) -> MemberType {
        self.member_type
    }

    /// Whether this member owns keys and may recover others
    pub fn is_core(&self) -> bool {
        self.member_type.is_core()
    }
}
