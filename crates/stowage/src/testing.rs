// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Mock store implementation for testing.
//!
//! [`MockStore`] keeps its data in a [`MemoryStore`], records every operation and can be told
//! to fail selected operations, which makes storage error paths easy to exercise.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{DurableStore, Error, MemoryStore, Result};

/// A recorded store operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// `read_all` was called.
    ReadAll,
    /// `read` was called with the given key.
    Read(String),
    /// `write` was called with the given key and value.
    Write(String, Bytes),
    /// `delete` was called with the given key.
    Delete(String),
}

impl StoreOp {
    /// Returns the key the operation targeted, if any.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::ReadAll => None,
            Self::Read(key) | Self::Write(key, _) | Self::Delete(key) => Some(key),
        }
    }
}

type FailPredicate = Box<dyn Fn(&StoreOp) -> bool + Send + Sync>;

/// A configurable mock store for testing.
///
/// # Failure Injection
///
/// ```
/// use bytes::Bytes;
/// use stowage::DurableStore;
/// use stowage::testing::{MockStore, StoreOp};
///
/// # futures::executor::block_on(async {
/// let store = MockStore::new();
/// store.fail_when(|op| matches!(op, StoreOp::Write(..)));
///
/// assert!(store.write("k", Bytes::new()).await.is_err());
/// assert!(store.read("k").await.is_ok());
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MockStore {
    data: MemoryStore,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    fail_when: Arc<Mutex<Option<FailPredicate>>>,
}

impl Debug for MockStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore")
            .field("data", &self.data)
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish()
    }
}

impl MockStore {
    /// Creates an empty mock store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock store over existing data.
    #[must_use]
    pub fn with_data(data: MemoryStore) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    /// Sets a predicate that decides which operations fail.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&StoreOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Clears the failure predicate.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns a copy of every recorded operation.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().clone()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    /// Returns the backing in-memory data.
    #[must_use]
    pub fn data(&self) -> &MemoryStore {
        &self.data
    }

    fn record(&self, op: StoreOp) -> Result<()> {
        let fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        self.operations.lock().push(op.clone());
        if fail {
            Err(Error::from_message(format!("injected failure for {op:?}")))
        } else {
            Ok(())
        }
    }
}

impl DurableStore for MockStore {
    async fn read_all(&self) -> Result<Vec<(String, Bytes)>> {
        self.record(StoreOp::ReadAll)?;
        self.data.read_all().await
    }

    async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        self.record(StoreOp::Read(key.to_owned()))?;
        self.data.read(key).await
    }

    async fn write(&self, key: &str, value: Bytes) -> Result<()> {
        self.record(StoreOp::Write(key.to_owned(), value.clone()))?;
        self.data.write(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.record(StoreOp::Delete(key.to_owned()))?;
        self.data.delete(key).await
    }
}
