// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::marker::PhantomData;
use std::sync::Arc;

use airbag::CircuitBreakers;
use convoy::FetchCoordinator;
use outbox::{ConnectivitySignal, OfflineQueue};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use stowage::{DurableStore, Namespaced};
use strata::TieredCache;
use sundial::Clock;
use tokio::sync::broadcast;

use crate::event::spawn_forwarder;
use crate::orchestrator::{Inner, Tasks};
use crate::transport::QueueSender;
use crate::{Lifeboat, LifeboatOptions, Result, Transport};

const CACHE_NAMESPACE: &str = "cache/";
const QUEUE_NAMESPACE: &str = "queue/";
const EVENT_CAPACITY: usize = 256;

/// Builds a [`Lifeboat`]. Created by [`Lifeboat::builder`].
#[derive(Debug)]
#[must_use]
pub struct LifeboatBuilder<V, S, T> {
    clock: Clock,
    store: S,
    transport: T,
    connectivity: ConnectivitySignal,
    options: LifeboatOptions,
    _value: PhantomData<fn() -> V>,
}

impl<V, S, T> LifeboatBuilder<V, S, T>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: DurableStore + Clone + 'static,
    T: Transport + 'static,
{
    pub(crate) fn new(clock: Clock, store: S, transport: T, connectivity: ConnectivitySignal) -> Self {
        Self {
            clock,
            store,
            transport,
            connectivity,
            options: LifeboatOptions::default(),
            _value: PhantomData,
        }
    }

    /// Replaces the default options.
    pub fn options(mut self, options: LifeboatOptions) -> Self {
        self.options = options;
        self
    }

    /// Opens the cache and the queue from the store and starts the background tasks.
    ///
    /// Mutations left in the queue by an earlier run are replayed as soon as the device is
    /// online. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn build(self) -> Result<Lifeboat<V, S, T>> {
        let Self {
            clock,
            store,
            transport,
            connectivity,
            options,
            _value: _,
        } = self;

        let cache = TieredCache::open(
            clock.clone(),
            Namespaced::new(store.clone(), CACHE_NAMESPACE),
            options.cache_options(),
        )
        .await?;
        let queue = OfflineQueue::open(Namespaced::new(store, QUEUE_NAMESPACE), clock.clone(), options.queue_options()).await?;

        let breakers = CircuitBreakers::new(clock.clone(), options.breaker_options());
        let statuses = options.statuses();
        let transport = Arc::new(transport);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        // Subscribe before anything can emit.
        let forwarder = spawn_forwarder(breakers.subscribe(), queue.subscribe(), events.clone());
        let drainer = queue.spawn_drainer(
            QueueSender::new(Arc::clone(&transport), breakers.clone(), statuses.clone()),
            connectivity.subscribe(),
        );
        let sweeper = options.get_sweep_interval().map(|interval| cache.spawn_sweeper(interval));

        tracing::event!(
            name: "lifeboat.build",
            tracing::Level::DEBUG,
            cache.persistent_entries = cache.persistent().len(),
            queue.pending = queue.len(),
            "lifeboat ready",
        );

        Ok(Lifeboat {
            inner: Arc::new(Inner {
                clock,
                cache,
                queue,
                coordinator: FetchCoordinator::new(),
                breakers,
                statuses,
                retry_policy: options.retry_policy(),
                transport,
                connectivity,
                events,
                options,
                tasks: Mutex::new(Tasks {
                    drainer: Some(drainer),
                    sweeper,
                    forwarder: Some(forwarder),
                }),
            }),
        })
    }
}
