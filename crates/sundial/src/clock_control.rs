// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::task::Waker;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::{Clock, Timestamp};

/// Controls the flow of time in tests.
///
/// Time stands still until [`advance`][Self::advance] is called. Delays created from a
/// controlled clock complete as soon as the controlled time reaches their deadline, which
/// makes TTL expiry, breaker reset timeouts and backoff schedules deterministic.
///
/// `ClockControl` is available when the `test-util` feature is enabled.
///
/// # Examples
///
/// ## Advancing time manually
///
/// ```
/// # use std::time::Duration;
/// # use sundial::ClockControl;
/// let control = ClockControl::new();
/// let clock = control.to_clock();
///
/// let now = clock.now();
/// control.advance(Duration::from_secs(1));
///
/// assert_eq!(clock.now().saturating_duration_since(now), Duration::from_secs(1));
/// ```
///
/// ## Completing timers automatically
///
/// ```
/// # use std::time::Duration;
/// # use sundial::ClockControl;
/// let control = ClockControl::new().auto_advance_timers(true);
/// let clock = control.to_clock();
///
/// // The delay jumps the clock forward instead of waiting.
/// futures::executor::block_on(clock.delay(Duration::from_secs(60)));
/// assert_eq!(clock.now().as_millis(), 60_000);
/// ```
///
/// # Production code and `ClockControl`
///
/// Never enable the `test-util` feature or use `ClockControl` in production code.
///
/// ```toml
/// sundial = { version = "*", features = ["test-util"] }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClockControl {
    state: Arc<Mutex<State>>,
}

#[derive(Debug)]
struct State {
    origin: Timestamp,
    base_instant: Instant,
    elapsed: Duration,
    auto_advance_timers: bool,
    timers: BTreeMap<(Duration, u64), Waker>,
    next_id: u64,
}

impl Default for State {
    fn default() -> Self {
        Self {
            origin: Timestamp::UNIX_EPOCH,
            base_instant: Instant::now(),
            elapsed: Duration::ZERO,
            auto_advance_timers: false,
            timers: BTreeMap::new(),
            next_id: 0,
        }
    }
}

impl ClockControl {
    /// Creates a new `ClockControl` frozen at the Unix epoch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new `ClockControl` frozen at `timestamp`.
    ///
    /// ```
    /// use sundial::{ClockControl, Timestamp};
    ///
    /// let clock = ClockControl::new_at(Timestamp::from_millis(1_000)).to_clock();
    /// assert_eq!(clock.now().as_millis(), 1_000);
    /// ```
    #[must_use]
    pub fn new_at(timestamp: Timestamp) -> Self {
        let this = Self::new();
        this.state.lock().origin = timestamp;
        this
    }

    /// Makes every pending delay complete immediately by jumping time to its deadline.
    ///
    /// Useful for tests that only care about the order of operations and not about the
    /// exact moment a sleep ends.
    #[must_use]
    pub fn auto_advance_timers(self, enabled: bool) -> Self {
        self.state.lock().auto_advance_timers = enabled;
        self
    }

    /// Creates a [`Clock`] driven by this control.
    #[must_use]
    pub fn to_clock(&self) -> Clock {
        Clock::from_control(self.clone())
    }

    /// Moves time forward by `duration` and wakes every delay that became due.
    pub fn advance(&self, duration: Duration) {
        let due = {
            let mut state = self.state.lock();
            state.elapsed = state.elapsed.saturating_add(duration);
            state.take_due()
        };

        // Wake outside the lock; woken tasks may poll and re-enter the control.
        due.into_iter().for_each(Waker::wake);
    }

    /// Moves time forward by `millis` milliseconds.
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Moves time forward to `timestamp`. Does nothing if `timestamp` is in the past.
    pub fn advance_to(&self, timestamp: Timestamp) {
        let now = self.now();
        self.advance(timestamp.saturating_duration_since(now));
    }

    /// Returns the number of delays currently waiting on this control.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }

    pub(crate) fn now(&self) -> Timestamp {
        let state = self.state.lock();
        state.origin.saturating_add(state.elapsed)
    }

    pub(crate) fn instant(&self) -> Instant {
        let state = self.state.lock();
        state.base_instant.checked_add(state.elapsed).unwrap_or(state.base_instant)
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    /// Polls a timer with the given deadline (expressed as elapsed controlled time).
    ///
    /// Returns `true` when the deadline has been reached. Otherwise the waker is stored under
    /// `key`, which is allocated on first registration.
    pub(crate) fn poll_timer(&self, deadline: Duration, key: &mut Option<u64>, waker: &Waker) -> bool {
        let due = {
            let mut state = self.state.lock();

            if let Some(id) = key.take() {
                state.timers.remove(&(deadline, id));
            }

            if state.elapsed >= deadline {
                return true;
            }

            if !state.auto_advance_timers || deadline == Duration::MAX {
                let id = state.next_id;
                state.next_id = state.next_id.wrapping_add(1);
                state.timers.insert((deadline, id), waker.clone());
                *key = Some(id);
                return false;
            }

            state.elapsed = deadline;
            state.take_due()
        };

        due.into_iter().for_each(Waker::wake);
        true
    }

    pub(crate) fn unregister(&self, deadline: Duration, key: u64) {
        self.state.lock().timers.remove(&(deadline, key));
    }
}

impl State {
    fn take_due(&mut self) -> Vec<Waker> {
        let pending = self.timers.split_off(&(self.elapsed.saturating_add(Duration::from_nanos(1)), 0));
        std::mem::replace(&mut self.timers, pending).into_values().collect()
    }
}
