//! In-memory (single process) implementation of the distributed state cache
//! for local development and tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use warden_store::{StateKey, StateStore};

/// In-memory state cache.
///
/// Clones share the same entries, so one instance handed to every member of a
/// test cluster behaves like a group-wide cache.
#[derive(Clone, Debug, Default)]
pub struct MemoryStateStore {
    map: Arc<Mutex<BTreeMap<StateKey, Bytes>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryStateStore {
    /// Creates a new `MemoryStateStore`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects all further operations.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.map.lock().await.len()
    }

    /// Whether the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.map.lock().await.is_empty()
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    type Error = Error;

    async fn put(&self, key: StateKey, value: Bytes) -> Result<(), Self::Error> {
        self.check_open()?;
        self.map.lock().await.insert(key, value);
        Ok(())
    }

    async fn get(&self, key: &StateKey) -> Result<Option<Bytes>, Self::Error> {
        self.check_open()?;
        Ok(self.map.lock().await.get(key).cloned())
    }

    async fn entries(&self, component: &str) -> Result<Vec<(StateKey, Bytes)>, Self::Error> {
        self.check_open()?;
        let map = self.map.lock().await;
        Ok(map
            .iter()
            .filter(|(key, _)| key.component == component)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn remove(&self, key: &StateKey) -> Result<bool, Self::Error> {
        self.check_open()?;
        Ok(self.map.lock().await.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStateStore::new();
        let key = StateKey::new("ejb", "n2", "n1");
        let value = Bytes::from_static(b"RECOVERY_SERVER_APPOINTED|1");

        store.put(key.clone(), value.clone()).await.unwrap();

        assert_eq!(store.get(&key).await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let store = MemoryStateStore::new();
        let key = StateKey::new("ejb", "n2", "n1");

        store.put(key.clone(), Bytes::from_static(b"a")).await.unwrap();
        store.put(key.clone(), Bytes::from_static(b"b")).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&key).await.unwrap(), Some(Bytes::from_static(b"b")));
    }

    #[tokio::test]
    async fn test_entries_are_scoped_by_component() {
        let store = MemoryStateStore::new();
        store
            .put(StateKey::new("ejb", "n2", "n1"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        store
            .put(StateKey::new("jms", "n2", "n1"), Bytes::from_static(b"y"))
            .await
            .unwrap();

        let entries = store.entries("ejb").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.component, "ejb");
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryStateStore::new();
        store
            .put(StateKey::new("ejb", "n2", "n1"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        store
            .put(StateKey::new("jms", "n2", "n3"), Bytes::from_static(b"y"))
            .await
            .unwrap();
        store
            .put(StateKey::new("jms", "n3", "n1"), Bytes::from_static(b"z"))
            .await
            .unwrap();

        assert!(store.remove(&StateKey::new("ejb", "n2", "n1")).await.unwrap());
        assert!(!store.remove(&StateKey::new("ejb", "n2", "n1")).await.unwrap());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = MemoryStateStore::new();
        store.close();

        let result = store.get(&StateKey::new("ejb", "n2", "n1")).await;
        assert!(matches!(result, Err(Error::Closed)));
    }
}
