//! Peer identity token

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::TopologyError;

/// Separator used when peer tokens are joined into replica choice lists.
pub const TOKEN_SEPARATOR: char = ':';

/// Opaque, ordered token naming a member uniquely within its group.
///
/// Ordering is lexicographic on the member name, which is what every member
/// uses to derive the same sorted views independently.
///
/// Every constructor validates the name, including deserialization, so a
/// `PeerId` never contains [`TOKEN_SEPARATOR`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(Arc<str>);

impl PeerId {
    /// Parse a member name into a peer id.
    ///
    /// Names must be non-empty and must not contain the token separator.
    pub fn parse(name: &str) -> Result<Self, TopologyError> {
        if name.is_empty() {
            return Err(TopologyError::InvalidPeerId(
                name.to_string(),
                "empty member name",
            ));
        }
        if name.contains(TOKEN_SEPARATOR) {
            return Err(TopologyError::InvalidPeerId(
                name.to_string(),
                "member name contains ':'",
            ));
        }
        Ok(Self(Arc::from(name)))
    }

    /// The member name behind this token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for PeerId {
    type Error = TopologyError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::parse(name)
    }
}

impl TryFrom<String> for PeerId {
    type Error = TopologyError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        Self::parse(&name)
    }
}

impl From<PeerId> for String {
    fn from(peer_id: PeerId) -> Self {
        peer_id.0.to_string()
    }
}

impl Borrow<str> for PeerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}
