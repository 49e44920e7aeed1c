// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use crate::Backoff;
use crate::rnd::Rnd;

/// How many times an operation is attempted and how long to wait in between.
///
/// `max_attempts` counts every attempt, including the first one, so `max_attempts: 1` means
/// "never retry". A value of zero is treated as one: the operation always runs at least once.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use airbag::RetryPolicy;
///
/// let policy = RetryPolicy::Exponential {
///     base: Duration::from_millis(100),
///     max_delay: Duration::from_millis(500),
///     max_attempts: 5,
/// };
///
/// assert_eq!(policy.max_attempts(), 5);
/// assert_eq!(policy.delay_for(0), Duration::from_millis(100));
/// assert_eq!(policy.delay_for(2), Duration::from_millis(400));
/// assert_eq!(policy.delay_for(3), Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Run the operation once.
    None,

    /// Wait the same `delay` between attempts.
    Fixed {
        /// Delay between attempts.
        delay: Duration,
        /// Total number of attempts.
        max_attempts: u32,
    },

    /// Double the delay after every attempt, starting at `base` and capped at `max_delay`.
    Exponential {
        /// Delay before the first retry.
        base: Duration,
        /// Largest delay between two attempts.
        max_delay: Duration,
        /// Total number of attempts.
        max_attempts: u32,
    },

    /// Like [`RetryPolicy::Exponential`] with up to 30% random jitter added to every delay.
    ExponentialWithJitter {
        /// Delay before the first retry.
        base: Duration,
        /// Largest delay between two attempts, before jitter.
        max_delay: Duration,
        /// Total number of attempts.
        max_attempts: u32,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::ExponentialWithJitter {
            base: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    /// Returns the total number of attempts, never less than one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        match *self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. }
            | Self::Exponential { max_attempts, .. }
            | Self::ExponentialWithJitter { max_attempts, .. } => max_attempts.max(1),
        }
    }

    /// Returns the delay schedule, or `None` if the policy never retries.
    #[must_use]
    pub fn backoff(&self) -> Option<Backoff> {
        match *self {
            Self::None => None,
            Self::Fixed { delay, .. } => Some(Backoff::fixed(delay)),
            Self::Exponential { base, max_delay, .. } => Some(Backoff::exponential(base, max_delay)),
            Self::ExponentialWithJitter { base, max_delay, .. } => Some(Backoff::exponential(base, max_delay).with_jitter()),
        }
    }

    /// Returns the delay before retry `attempt` (0-indexed: `0` is the wait after the first
    /// failure).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &Rnd::Real)
    }

    pub(crate) fn delay_with(&self, attempt: u32, rnd: &Rnd) -> Duration {
        self.backoff().map_or(Duration::ZERO, |backoff| backoff.delay_with(attempt, rnd))
    }
}
