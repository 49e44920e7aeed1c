// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The core trait for durable storage backends.

use std::sync::Arc;

use bytes::Bytes;

use crate::Result;

/// A durable key-value store.
///
/// Implementations must make every individual `write` and `delete` crash-consistent: after a
/// crash a key holds either its previous value or its new value, never a torn one. There are
/// no ordering guarantees across keys.
///
/// Keys are arbitrary UTF-8 strings; implementations are responsible for mapping them onto
/// whatever naming rules their medium imposes.
pub trait DurableStore: Send + Sync {
    /// Returns every key together with its value.
    ///
    /// Used on startup to rebuild in-memory indexes. The order is unspecified.
    fn read_all(&self) -> impl Future<Output = Result<Vec<(String, Bytes)>>> + Send;

    /// Returns the value stored under `key`, if any.
    fn read(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// Stores `value` under `key`, replacing any previous value.
    fn write(&self, key: &str, value: Bytes) -> impl Future<Output = Result<()>> + Send;

    /// Removes `key`. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

impl<S: DurableStore> DurableStore for Arc<S> {
    fn read_all(&self) -> impl Future<Output = Result<Vec<(String, Bytes)>>> + Send {
        (**self).read_all()
    }

    fn read(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>>> + Send {
        (**self).read(key)
    }

    fn write(&self, key: &str, value: Bytes) -> impl Future<Output = Result<()>> + Send {
        (**self).write(key, value)
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).delete(key)
    }
}
