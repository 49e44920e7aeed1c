// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{DurableStore, Result};

/// A durable store kept entirely in memory.
///
/// Not actually durable across a real process exit, but clones share the same map: dropping
/// every component that uses a store and re-opening them over a clone behaves exactly like a
/// restart against persistent storage. This makes it the store of choice for tests and for
/// clients that only need the queue to survive component recreation.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use stowage::{DurableStore, MemoryStore};
///
/// # futures::executor::block_on(async {
/// let store = MemoryStore::new();
/// let reopened = store.clone();
///
/// store.write("k", Bytes::from_static(b"v")).await?;
/// assert_eq!(reopened.read("k").await?, Some(Bytes::from_static(b"v")));
/// # Ok::<(), stowage::Error>(())
/// # }).unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns every stored key in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }
}

impl DurableStore for MemoryStore {
    async fn read_all(&self) -> Result<Vec<(String, Bytes)>> {
        Ok(self
            .data
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn write(&self, key: &str, value: Bytes) -> Result<()> {
        self.data.write().insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }
}
