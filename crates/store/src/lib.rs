//! Distributed state cache abstraction.
//!
//! Entries are addressed by a three-part [`StateKey`]: the component that owns
//! the entry, the member that wrote it, and a free-form key. Recovery selection
//! and fencing records are stored this way, keyed across every registered
//! recovery-aware component.

use std::error::Error;
use std::fmt::{self, Debug};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Address of a state cache entry.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StateKey {
    /// Component that owns the entry
    pub component: String,
    /// Member token the entry is recorded under
    pub member: String,
    /// Entry key within the component
    pub key: String,
}

impl StateKey {
    /// Creates a new key.
    pub fn new(
        component: impl Into<String>,
        member: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            member: member.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.component, self.member, self.key)
    }
}

/// A state cache shared by the members of a group.
///
/// # Associated Types
/// - `Error`: The error type that implements `Debug`, `Error`, `Send`, and `Sync`.
///
/// # Required Methods
/// - `put`: Stores a value, replacing any previous value under the same key.
/// - `get`: Retrieves the value stored under a key.
/// - `entries`: Retrieves every entry recorded for a component.
/// - `remove`: Deletes a single entry, reporting whether it existed.
#[async_trait]
pub trait StateStore: Clone + Send + Sync + 'static {
    type Error: Debug + Error + Send + Sync + 'static;

    async fn put(&self, key: StateKey, value: Bytes) -> Result<(), Self::Error>;
    async fn get(&self, key: &StateKey) -> Result<Option<Bytes>, Self::Error>;
    async fn entries(&self, component: &str) -> Result<Vec<(StateKey, Bytes)>, Self::Error>;
    async fn remove(&self, key: &StateKey) -> Result<bool, Self::Error>;
}
