// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use crate::{Delay, Stopwatch, Timestamp};

/// Provides an abstraction for time-related operations.
///
/// The clock is the single source of "now" for caches, breakers, retry loops and queues.
/// Production code creates it with [`Clock::new_system`]; tests build one from a
/// [`ClockControl`][crate::ClockControl] (available with the `test-util` feature) and move
/// time forward explicitly.
///
/// The clock is used for:
///
/// - Retrieving the current absolute time as a [`Timestamp`].
/// - Creating [`Delay`] futures that complete after a duration of clock time.
/// - Creating [`Stopwatch`] instances to measure elapsed time.
///
/// # Cloning and shared state
///
/// Cloning a clock is inexpensive (just an `Arc` clone) and every clone shares the same
/// underlying state, including the monotonic high-water mark and, for controlled clocks,
/// the registered timers.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use sundial::Clock;
///
/// # async fn delay_example(clock: &Clock) {
/// let stopwatch = clock.stopwatch();
/// clock.delay(Duration::from_millis(10)).await;
/// assert!(stopwatch.elapsed() >= Duration::from_millis(10));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Clock(Arc<ClockState>);

#[derive(Debug)]
enum ClockState {
    System(SystemSource),
    #[cfg(any(feature = "test-util", test))]
    Controlled(crate::ClockControl),
}

#[derive(Debug)]
struct SystemSource {
    high_water: AtomicU64,
}

impl SystemSource {
    fn now(&self) -> Timestamp {
        let wall = Timestamp::from_system_time(SystemTime::now()).as_millis();
        let previous = self.high_water.fetch_max(wall, Ordering::AcqRel);
        Timestamp::from_millis(previous.max(wall))
    }
}

impl Clock {
    /// Creates a clock backed by the system wall clock and the Tokio timer.
    ///
    /// Timestamps returned by [`now`][Self::now] never decrease, even if the operating
    /// system clock is adjusted backwards. Delays require a Tokio runtime with the time
    /// driver enabled when they are first polled.
    #[must_use]
    pub fn new_system() -> Self {
        Self(Arc::new(ClockState::System(SystemSource {
            high_water: AtomicU64::new(0),
        })))
    }

    /// Creates a frozen clock that starts at the Unix epoch.
    ///
    /// Time only moves when the returned clock's control is advanced; use
    /// [`ClockControl`][crate::ClockControl] directly when the test needs to advance time.
    #[cfg(any(feature = "test-util", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
    #[must_use]
    pub fn new_frozen() -> Self {
        crate::ClockControl::new().to_clock()
    }

    #[cfg(any(feature = "test-util", test))]
    pub(crate) fn from_control(control: crate::ClockControl) -> Self {
        Self(Arc::new(ClockState::Controlled(control)))
    }

    /// Returns the current time.
    ///
    /// Successive calls on clones of the same clock never return a smaller value.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        match &*self.0 {
            ClockState::System(source) => source.now(),
            #[cfg(any(feature = "test-util", test))]
            ClockState::Controlled(control) => control.now(),
        }
    }

    /// Returns the current time as a [`SystemTime`].
    #[must_use]
    pub fn system_time(&self) -> SystemTime {
        self.now().to_system_time()
    }

    /// Returns a monotonic instant suitable for measuring elapsed time.
    #[must_use]
    pub fn instant(&self) -> Instant {
        match &*self.0 {
            ClockState::System(_) => Instant::now(),
            #[cfg(any(feature = "test-util", test))]
            ClockState::Controlled(control) => control.instant(),
        }
    }

    /// Returns a future that completes once `duration` of clock time has passed.
    ///
    /// A zero duration completes on first poll and [`Duration::MAX`] never completes.
    pub fn delay(&self, duration: Duration) -> Delay {
        match &*self.0 {
            ClockState::System(_) => Delay::system(duration),
            #[cfg(any(feature = "test-util", test))]
            ClockState::Controlled(control) => Delay::controlled(control.clone(), duration),
        }
    }

    /// Returns a future that completes once the clock reaches `deadline`.
    pub fn delay_until(&self, deadline: Timestamp) -> Delay {
        self.delay(deadline.saturating_duration_since(self.now()))
    }

    /// Starts a new stopwatch measuring from the current instant.
    #[must_use]
    pub fn stopwatch(&self) -> Stopwatch {
        Stopwatch::new(self)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClockControl;

    static_assertions::assert_impl_all!(Clock: Send, Sync, Clone, std::fmt::Debug);

    #[test]
    fn system_clock_is_monotonic() {
        let clock = Clock::new_system();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let current = clock.now();
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn system_clock_high_water_wins() {
        let clock = Clock::new_system();
        let ClockState::System(source) = &*clock.0 else {
            unreachable!("system clock expected");
        };
        let future = Timestamp::from_system_time(SystemTime::now()).as_millis() + 60_000;
        source.high_water.store(future, Ordering::Release);

        assert_eq!(clock.now().as_millis(), future);
    }

    #[test]
    fn clones_share_controlled_time() {
        let control = ClockControl::new();
        let clock = control.to_clock();
        let clone = clock.clone();

        control.advance(Duration::from_secs(3));

        assert_eq!(clock.now(), clone.now());
        assert_eq!(clone.now().as_millis(), 3_000);
    }

    #[test]
    fn delay_until_past_deadline_is_ready() {
        let control = ClockControl::new_at(Timestamp::from_millis(10_000));
        let clock = control.to_clock();

        futures::executor::block_on(clock.delay_until(Timestamp::from_millis(5_000)));
    }

    #[test]
    fn frozen_clock_starts_at_epoch() {
        let clock = Clock::new_frozen();
        assert_eq!(clock.now(), Timestamp::UNIX_EPOCH);
        assert_eq!(clock.system_time(), SystemTime::UNIX_EPOCH);
    }

    #[tokio::test]
    async fn system_delay_completes() {
        let clock = Clock::new_system();
        let watch = clock.stopwatch();
        clock.delay(Duration::from_millis(5)).await;
        assert!(watch.elapsed() >= Duration::from_millis(5));
    }
}
