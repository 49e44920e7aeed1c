// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::Arc;

use airbag::{CircuitBreakers, RetryPolicy, RetryableStatuses};
use convoy::FetchCoordinator;
use outbox::{ConnectivitySignal, DrainerHandle, OfflineQueue};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use stowage::{DurableStore, Namespaced};
use strata::{CacheKey, SweeperHandle, TieredCache};
use sundial::Clock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::read::FetchResult;
use crate::{Event, LifeboatBuilder, LifeboatOptions, Transport};

/// The resilient data-access layer applications read and write through.
///
/// A `Lifeboat` wires a [`TieredCache`], a [`FetchCoordinator`], per-endpoint circuit breakers,
/// a retry executor and an [`OfflineQueue`] together behind two operations:
///
/// - [`get`][Self::get] reads a resource according to a [`CachePolicy`][crate::CachePolicy].
///   Concurrent misses for the same resource share one fetch; fetches run through the
///   endpoint's circuit breaker and are retried with backoff; fetched values are cached.
/// - [`mutate`][Self::mutate] applies a write optimistically to the cache, sends it right
///   away when the device is online and queues it durably otherwise. Queued writes are
///   replayed in the background as soon as connectivity returns.
///
/// The cache and the queue share the durable store under separate key prefixes. Clones share
/// all state; call [`shutdown`][Self::shutdown] to stop the background tasks deterministically.
///
/// `V` is the cached value type, `S` the durable store and `T` the [`Transport`] used to
/// replay writes.
pub struct Lifeboat<V, S, T> {
    pub(crate) inner: Arc<Inner<V, S, T>>,
}

pub(crate) struct Inner<V, S, T> {
    pub(crate) clock: Clock,
    pub(crate) cache: TieredCache<V, Namespaced<S>>,
    pub(crate) queue: OfflineQueue<Namespaced<S>>,
    pub(crate) coordinator: FetchCoordinator<CacheKey, FetchResult<V>>,
    pub(crate) breakers: CircuitBreakers,
    pub(crate) statuses: RetryableStatuses,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) transport: Arc<T>,
    pub(crate) connectivity: ConnectivitySignal,
    pub(crate) events: broadcast::Sender<Event>,
    pub(crate) options: LifeboatOptions,
    pub(crate) tasks: Mutex<Tasks>,
}

/// Background work owned by a [`Lifeboat`].
#[derive(Debug, Default)]
pub(crate) struct Tasks {
    pub(crate) drainer: Option<DrainerHandle>,
    pub(crate) sweeper: Option<SweeperHandle>,
    pub(crate) forwarder: Option<JoinHandle<()>>,
}

impl Drop for Tasks {
    fn drop(&mut self) {
        // The drainer and sweeper handles abort their tasks when dropped.
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

impl<V, S, T> Clone for Lifeboat<V, S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, S, T> Debug for Lifeboat<V, S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifeboat")
            .field("connectivity", &self.inner.connectivity.current())
            .field("pending_mutations", &self.inner.queue.len())
            .field("endpoints", &self.inner.breakers.endpoints())
            .finish_non_exhaustive()
    }
}

impl<V, S, T> Lifeboat<V, S, T>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: DurableStore + Clone + 'static,
    T: Transport + 'static,
{
    /// Starts building a `Lifeboat`.
    ///
    /// `store` holds both the persistent cache tier and the offline queue. `transport`
    /// replays queued writes, and `connectivity` tells the replay task when the device is
    /// online.
    pub fn builder(clock: Clock, store: S, transport: T, connectivity: ConnectivitySignal) -> LifeboatBuilder<V, S, T> {
        LifeboatBuilder::new(clock, store, transport, connectivity)
    }
}

impl<V, S, T> Lifeboat<V, S, T> {
    /// Subscribes to [`Event`]s.
    ///
    /// Only events emitted after this call are received.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    /// Stops the background tasks: the queue replay, the cache sweeper and event forwarding.
    ///
    /// A replay in progress finishes its current send first. Reads and writes keep working
    /// afterwards, but queued writes are no longer replayed automatically.
    pub async fn shutdown(&self) {
        let (drainer, sweeper, forwarder) = {
            let mut tasks = self.inner.tasks.lock();
            (tasks.drainer.take(), tasks.sweeper.take(), tasks.forwarder.take())
        };

        if let Some(drainer) = drainer {
            drainer.stop().await;
        }
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
        if let Some(forwarder) = forwarder {
            forwarder.abort();
            let _ = forwarder.await;
        }

        tracing::event!(name: "lifeboat.shutdown", tracing::Level::DEBUG, "background tasks stopped");
    }

    /// Returns the cache.
    #[must_use]
    pub fn cache(&self) -> &TieredCache<V, Namespaced<S>> {
        &self.inner.cache
    }

    /// Returns the offline queue.
    #[must_use]
    pub fn queue(&self) -> &OfflineQueue<Namespaced<S>> {
        &self.inner.queue
    }

    /// Returns the per-endpoint circuit breakers.
    #[must_use]
    pub fn breakers(&self) -> &CircuitBreakers {
        &self.inner.breakers
    }

    /// Returns the connectivity signal.
    #[must_use]
    pub fn connectivity(&self) -> &ConnectivitySignal {
        &self.inner.connectivity
    }

    /// Returns the clock.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Returns the options this instance was built with.
    #[must_use]
    pub fn options(&self) -> &LifeboatOptions {
        &self.inner.options
    }

    pub(crate) fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}
