// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sundial::Clock;
use tokio::sync::broadcast;

use crate::{BreakerOptions, CircuitBreaker, CircuitSnapshot, CircuitTransition};

const TRANSITION_CAPACITY: usize = 64;

/// One circuit breaker per endpoint, created on first use.
///
/// Every breaker in the registry shares the same options and publishes its state changes on
/// a single broadcast stream. Clones share the registry.
///
/// # Examples
///
/// ```
/// use airbag::{BreakerOptions, CircuitBreakers, Outcome};
/// use sundial::Clock;
///
/// let breakers = CircuitBreakers::new(Clock::new_system(), BreakerOptions::default().failure_threshold(1));
/// let mut transitions = breakers.subscribe();
///
/// breakers.get("api.example.com").enter().unwrap().record(Outcome::Failure);
///
/// let transition = transitions.try_recv().unwrap();
/// assert_eq!(&*transition.endpoint, "api.example.com");
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreakers {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    clock: Clock,
    options: BreakerOptions,
    breakers: Mutex<HashMap<Arc<str>, CircuitBreaker>>,
    transitions: broadcast::Sender<CircuitTransition>,
}

impl CircuitBreakers {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(clock: Clock, options: BreakerOptions) -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                clock,
                options,
                breakers: Mutex::new(HashMap::new()),
                transitions,
            }),
        }
    }

    /// Returns the breaker for `endpoint`, creating a closed one if needed.
    #[must_use]
    pub fn get(&self, endpoint: &str) -> CircuitBreaker {
        let mut breakers = self.inner.breakers.lock();
        if let Some(breaker) = breakers.get(endpoint) {
            return breaker.clone();
        }

        let endpoint: Arc<str> = Arc::from(endpoint);
        let breaker = CircuitBreaker::with_transitions(
            Arc::clone(&endpoint),
            self.inner.clock.clone(),
            self.inner.options,
            Some(self.inner.transitions.clone()),
        );
        breakers.insert(endpoint, breaker.clone());
        breaker
    }

    /// Returns the state of `endpoint`'s breaker, or `None` if it was never used.
    #[must_use]
    pub fn snapshot(&self, endpoint: &str) -> Option<CircuitSnapshot> {
        self.inner.breakers.lock().get(endpoint).map(CircuitBreaker::snapshot)
    }

    /// Lists the endpoints that have a breaker.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Arc<str>> {
        let mut endpoints: Vec<_> = self.inner.breakers.lock().keys().cloned().collect();
        endpoints.sort();
        endpoints
    }

    /// Closes every circuit.
    pub fn reset_all(&self) {
        let breakers: Vec<_> = self.inner.breakers.lock().values().cloned().collect();
        breakers.iter().for_each(CircuitBreaker::reset);
    }

    /// Subscribes to state changes of every breaker in the registry.
    ///
    /// A receiver that falls more than 64 notifications behind skips the oldest ones.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CircuitTransition> {
        self.inner.transitions.subscribe()
    }

    /// Returns the options every breaker is created with.
    #[must_use]
    pub fn options(&self) -> &BreakerOptions {
        &self.inner.options
    }
}
