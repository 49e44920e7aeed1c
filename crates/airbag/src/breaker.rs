// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sundial::{Clock, Timestamp};
use tokio::sync::broadcast;

use crate::{BreakerError, CircuitOpenError};

/// Thresholds and timeouts of a circuit breaker.
///
/// Defaults: 5 consecutive failures open the circuit, the circuit stays open for 30 seconds,
/// 2 consecutive probe successes close it again and as many probes as the success threshold
/// may run at once while half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerOptions {
    failure_threshold: u32,
    reset_timeout: Duration,
    success_threshold: u32,
    half_open_max_probes: Option<u32>,
}

impl Default for BreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
            half_open_max_probes: None,
        }
    }
}

impl BreakerOptions {
    /// Sets how many consecutive failures open the circuit.
    #[must_use]
    pub fn failure_threshold(mut self, failures: u32) -> Self {
        self.failure_threshold = failures.max(1);
        self
    }

    /// Sets how long the circuit stays open before letting a probe through.
    #[must_use]
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Sets how many consecutive probe successes close the circuit.
    #[must_use]
    pub fn success_threshold(mut self, successes: u32) -> Self {
        self.success_threshold = successes.max(1);
        self
    }

    /// Sets how many probes may run at once while half-open.
    #[must_use]
    pub fn half_open_max_probes(mut self, probes: u32) -> Self {
        self.half_open_max_probes = Some(probes.max(1));
        self
    }

    /// Returns the failure threshold.
    #[must_use]
    pub const fn get_failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Returns the reset timeout.
    #[must_use]
    pub const fn get_reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// Returns the success threshold.
    #[must_use]
    pub const fn get_success_threshold(&self) -> u32 {
        self.success_threshold
    }

    /// Returns the number of concurrent half-open probes, which defaults to the success threshold.
    #[must_use]
    pub fn get_half_open_max_probes(&self) -> u32 {
        self.half_open_max_probes.unwrap_or(self.success_threshold)
    }
}

/// The state of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through.
    Closed,

    /// Requests are rejected until the reset timeout has elapsed since `opened_at`.
    Open {
        /// When the circuit opened.
        opened_at: Timestamp,
    },

    /// A limited number of probe requests pass through.
    HalfOpen,
}

impl CircuitState {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open { .. } => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// How a call that went through the breaker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The endpoint served the call.
    Success,

    /// The endpoint failed the call.
    Failure,

    /// The call failed for reasons that say nothing about the endpoint's health.
    Neutral,
}

/// A point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct CircuitSnapshot {
    /// Current state.
    pub state: CircuitState,

    /// Failures since the last success while closed.
    pub consecutive_failures: u32,

    /// Successful probes since the circuit became half-open.
    pub half_open_successes: u32,

    /// Probes currently running.
    pub probes_in_flight: u32,
}

/// A state change of one endpoint's circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct CircuitTransition {
    /// The endpoint the circuit guards.
    pub endpoint: Arc<str>,

    /// State before the change.
    pub from: CircuitState,

    /// State after the change.
    pub to: CircuitState,

    /// When the change happened.
    pub at: Timestamp,
}

/// A failure-rate gate in front of one endpoint.
///
/// The breaker starts closed. Reaching the failure threshold opens it; while open every call
/// is rejected with [`CircuitOpenError`] without running. Once the reset timeout has elapsed,
/// the next call flips the circuit to half-open and runs as a probe. Enough probe successes
/// close the circuit again; any probe failure reopens it with a fresh timestamp.
///
/// State is kept under a mutex that is only held for the in-memory transition and never
/// across the call itself. Clones share the same state.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use airbag::{BreakerOptions, CircuitBreaker, CircuitState, Outcome};
/// use sundial::ClockControl;
///
/// let control = ClockControl::new();
/// let breaker = CircuitBreaker::new(
///     "api.example.com",
///     control.to_clock(),
///     BreakerOptions::default().failure_threshold(1).reset_timeout(Duration::from_secs(10)),
/// );
///
/// breaker.enter().unwrap().record(Outcome::Failure);
/// assert!(breaker.enter().is_err());
///
/// control.advance(Duration::from_secs(10));
/// let probe = breaker.enter().unwrap();
/// assert_eq!(breaker.snapshot().state, CircuitState::HalfOpen);
/// probe.record(Outcome::Success);
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    endpoint: Arc<str>,
    clock: Clock,
    options: BreakerOptions,
    core: Mutex<Core>,
    transitions: Option<broadcast::Sender<CircuitTransition>>,
}

#[derive(Debug)]
struct Core {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    probes_in_flight: u32,
    // Bumped on every transition; observations from an older epoch are ignored.
    epoch: u64,
}

type Change = (CircuitState, CircuitState);

impl CircuitBreaker {
    /// Creates a closed breaker for `endpoint`.
    pub fn new(endpoint: impl Into<Arc<str>>, clock: Clock, options: BreakerOptions) -> Self {
        Self::with_transitions(endpoint.into(), clock, options, None)
    }

    pub(crate) fn with_transitions(
        endpoint: Arc<str>,
        clock: Clock,
        options: BreakerOptions,
        transitions: Option<broadcast::Sender<CircuitTransition>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                endpoint,
                clock,
                options,
                core: Mutex::new(Core {
                    state: CircuitState::Closed,
                    consecutive_failures: 0,
                    half_open_successes: 0,
                    probes_in_flight: 0,
                    epoch: 0,
                }),
                transitions,
            }),
        }
    }

    /// Returns the endpoint this breaker guards.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> &BreakerOptions {
        &self.shared.options
    }

    /// Asks to run one call.
    ///
    /// If the circuit is open and the reset timeout has elapsed, the circuit becomes half-open
    /// before this method returns and the returned permit is a probe.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitOpenError`] while the circuit is open or while every half-open probe
    /// slot is taken.
    pub fn enter(&self) -> Result<Permit, CircuitOpenError> {
        let now = self.shared.clock.now();
        let (admission, change) = self.shared.core.lock().enter(now, &self.shared.options);

        if let Some(change) = change {
            self.shared.notify(change, now);
        }

        match admission {
            Ok((epoch, probe)) => Ok(Permit {
                shared: Arc::clone(&self.shared),
                epoch,
                probe,
                settled: false,
            }),
            Err(retry_after) => Err(CircuitOpenError::new(Arc::clone(&self.shared.endpoint), retry_after)),
        }
    }

    /// Runs `operation` through the breaker.
    ///
    /// `classify` maps a failure to the observation recorded for it; a success is always
    /// recorded as [`Outcome::Success`].
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Open`] without running `operation` if the circuit rejects the
    /// call, or [`BreakerError::Inner`] if `operation` fails.
    pub async fn execute<T, E, Op, Fut, C>(&self, classify: C, operation: Op) -> Result<T, BreakerError<E>>
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> Outcome,
    {
        let permit = self.enter()?;
        let result = operation().await;

        permit.record(match &result {
            Ok(_) => Outcome::Success,
            Err(error) => classify(error),
        });

        result.map_err(BreakerError::Inner)
    }

    /// Returns the current state and counters.
    ///
    /// The state is reported as stored: an open circuit whose timeout has elapsed stays
    /// `Open` until the next call arrives.
    #[must_use]
    pub fn snapshot(&self) -> CircuitSnapshot {
        let core = self.shared.core.lock();
        CircuitSnapshot {
            state: core.state,
            consecutive_failures: core.consecutive_failures,
            half_open_successes: core.half_open_successes,
            probes_in_flight: core.probes_in_flight,
        }
    }

    /// Forces the circuit closed and clears its counters.
    ///
    /// Permits issued before the reset no longer affect the circuit.
    pub fn reset(&self) {
        let now = self.shared.clock.now();
        let change = self.shared.core.lock().transition(CircuitState::Closed);

        if change.0 != change.1 {
            self.shared.notify(change, now);
        }
    }
}

impl Shared {
    fn record(&self, epoch: u64, probe: bool, outcome: Outcome) {
        let now = self.clock.now();
        let change = self.core.lock().record(epoch, probe, outcome, now, &self.options);

        if let Some(change) = change {
            self.notify(change, now);
        }
    }

    fn notify(&self, (from, to): Change, at: Timestamp) {
        match to {
            CircuitState::Open { .. } => tracing::event!(
                name: "airbag.circuit",
                tracing::Level::WARN,
                circuit.endpoint = %self.endpoint,
                circuit.from = from.as_str(),
                circuit.state = to.as_str(),
                "circuit opened",
            ),
            CircuitState::Closed | CircuitState::HalfOpen => tracing::event!(
                name: "airbag.circuit",
                tracing::Level::INFO,
                circuit.endpoint = %self.endpoint,
                circuit.from = from.as_str(),
                circuit.state = to.as_str(),
                "circuit state changed",
            ),
        }

        if let Some(sender) = &self.transitions {
            // Nobody listening is fine; notifications never hold up the transition.
            let _ = sender.send(CircuitTransition {
                endpoint: Arc::clone(&self.endpoint),
                from,
                to,
                at,
            });
        }
    }
}

impl Core {
    fn enter(&mut self, now: Timestamp, options: &BreakerOptions) -> (Result<(u64, bool), Duration>, Option<Change>) {
        match self.state {
            CircuitState::Closed => (Ok((self.epoch, false)), None),
            CircuitState::Open { opened_at } => {
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed < options.reset_timeout {
                    return (Err(options.reset_timeout.saturating_sub(elapsed)), None);
                }

                let change = self.transition(CircuitState::HalfOpen);
                self.probes_in_flight = 1;
                (Ok((self.epoch, true)), Some(change))
            }
            CircuitState::HalfOpen => {
                if self.probes_in_flight >= options.get_half_open_max_probes() {
                    return (Err(Duration::ZERO), None);
                }

                self.probes_in_flight += 1;
                (Ok((self.epoch, true)), None)
            }
        }
    }

    fn record(&mut self, epoch: u64, probe: bool, outcome: Outcome, now: Timestamp, options: &BreakerOptions) -> Option<Change> {
        if epoch != self.epoch {
            return None;
        }

        match self.state {
            CircuitState::Closed => match outcome {
                Outcome::Success => {
                    self.consecutive_failures = 0;
                    None
                }
                Outcome::Failure => {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                    (self.consecutive_failures >= options.failure_threshold)
                        .then(|| self.transition(CircuitState::Open { opened_at: now }))
                }
                Outcome::Neutral => None,
            },
            CircuitState::HalfOpen => {
                if probe {
                    self.probes_in_flight = self.probes_in_flight.saturating_sub(1);
                }

                match outcome {
                    Outcome::Success => {
                        self.half_open_successes = self.half_open_successes.saturating_add(1);
                        (self.half_open_successes >= options.success_threshold).then(|| self.transition(CircuitState::Closed))
                    }
                    Outcome::Failure => Some(self.transition(CircuitState::Open { opened_at: now })),
                    Outcome::Neutral => None,
                }
            }
            // Results that arrive while open belong to calls admitted before the circuit opened.
            CircuitState::Open { .. } => None,
        }
    }

    fn release_probe(&mut self, epoch: u64) {
        if epoch == self.epoch && self.state == CircuitState::HalfOpen {
            self.probes_in_flight = self.probes_in_flight.saturating_sub(1);
        }
    }

    fn transition(&mut self, to: CircuitState) -> Change {
        let from = self.state;
        self.state = to;
        self.epoch = self.epoch.wrapping_add(1);
        self.consecutive_failures = 0;
        self.half_open_successes = 0;
        self.probes_in_flight = 0;
        (from, to)
    }
}

/// Permission to run one call through a [`CircuitBreaker`].
///
/// Report how the call ended with [`record`][Self::record]. Dropping a permit without
/// recording counts as no observation and frees its half-open probe slot.
#[derive(Debug)]
#[must_use = "record the outcome of the call or drop the permit to release it"]
pub struct Permit {
    shared: Arc<Shared>,
    epoch: u64,
    probe: bool,
    settled: bool,
}

impl Permit {
    /// Returns `true` if this permit is a half-open probe.
    #[must_use]
    pub const fn is_probe(&self) -> bool {
        self.probe
    }

    /// Records the outcome of the call.
    pub fn record(mut self, outcome: Outcome) {
        self.settled = true;
        self.shared.record(self.epoch, self.probe, outcome);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.shared.core.lock().release_probe(self.epoch);
        }
    }
}
