// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::Flight;
use crate::flight::FlightState;

type FlightMap<K, T> = Arc<Mutex<HashMap<K, Arc<FlightState<T>>>>>;

/// Deduplicates concurrent fetches for the same key.
///
/// At most one fetch exists per key at any instant. The coordinator owns no results: once a
/// fetch resolves its record is gone, and the next call for the key starts a new fetch.
///
/// Cloning is cheap and clones coordinate through the same set of in-flight fetches.
pub struct FetchCoordinator<K, T> {
    flights: FlightMap<K, T>,
}

impl<K, T> Default for FetchCoordinator<K, T> {
    fn default() -> Self {
        Self {
            flights: Arc::default(),
        }
    }
}

impl<K, T> Clone for FetchCoordinator<K, T> {
    fn clone(&self) -> Self {
        Self {
            flights: Arc::clone(&self.flights),
        }
    }
}

impl<K, T> Debug for FetchCoordinator<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("in_flight", &self.flights.lock().len())
            .finish()
    }
}

impl<K, T> FetchCoordinator<K, T>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Creates a coordinator with nothing in flight.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the fetch in flight for `key`, or starts one by invoking `producer` exactly once.
    ///
    /// The producer's future is spawned onto the current Tokio runtime, so this must be
    /// called from within one.
    pub fn fetch_or_join<F, Fut>(&self, key: K, producer: F) -> Flight<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (sender, state) = {
            let mut flights = self.flights.lock();
            if let Some(state) = flights.get(&key) {
                let flight = Flight::attach(state, true);
                drop(flights);
                tracing::event!(
                    name: "convoy.join",
                    tracing::Level::DEBUG,
                    fetch.key = ?key,
                    fetch.joiners = flight_joiners(&self.flights, &key),
                );
                return flight;
            }

            let (sender, receiver) = oneshot::channel();
            let state = Arc::new(FlightState::new(receiver));
            flights.insert(key.clone(), Arc::clone(&state));
            (sender, state)
        };

        let flight = Flight::attach(&state, false);
        let landing = Landing {
            flights: Arc::clone(&self.flights),
            key,
            state,
        };

        // A panic in `producer` itself drops `landing` and `sender`, resolving joiners with
        // `ProducerLost` just like a panic inside the spawned future.
        let work = producer();
        tokio::spawn(async move {
            let outcome = work.await;
            drop(landing);
            let _ = sender.send(outcome);
        });

        flight
    }

    /// Returns the number of keys with a fetch in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }

    /// Returns how many observers are attached to the fetch for `key`, if one is in flight.
    #[must_use]
    pub fn joiners(&self, key: &K) -> Option<u32> {
        flight_joiners(&self.flights, key)
    }

    /// Returns `true` if a fetch for `key` is in flight.
    #[must_use]
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.flights.lock().contains_key(key)
    }
}

fn flight_joiners<K: Hash + Eq, T>(flights: &FlightMap<K, T>, key: &K) -> Option<u32> {
    flights
        .lock()
        .get(key)
        .map(|state| state.joiners.load(Ordering::Acquire))
}

/// Removes the in-flight record when the fetch lands, or when its task unwinds.
struct Landing<K: Hash + Eq, T> {
    flights: FlightMap<K, T>,
    key: K,
    state: Arc<FlightState<T>>,
}

impl<K: Hash + Eq, T> Drop for Landing<K, T> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock();
        if flights.get(&self.key).is_some_and(|current| Arc::ptr_eq(current, &self.state)) {
            flights.remove(&self.key);
        }
    }
}
