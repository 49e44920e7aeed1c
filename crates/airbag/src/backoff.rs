// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::min;
use std::time::Duration;

use crate::rnd::Rnd;

/// Upper bound of the jitter added to a delay, as a fraction of that delay.
pub(crate) const JITTER_FACTOR: f64 = 0.3;

/// A delay schedule shared by the retry executor and the offline queue.
///
/// The delay before retry `n` (0-indexed) is `min(base * 2^n, max_delay)` for exponential
/// schedules and `base` for fixed ones. With jitter enabled a uniform random value in
/// `[0, 0.3 * delay]` is added on top, which keeps many clients from retrying in lockstep.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use airbag::Backoff;
///
/// let backoff = Backoff::exponential(Duration::from_millis(100), Duration::from_secs(1));
///
/// assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
/// assert_eq!(backoff.delay_for(3), Duration::from_millis(800));
/// assert_eq!(backoff.delay_for(10), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max_delay: Duration,
    exponential: bool,
    jitter: bool,
}

impl Backoff {
    /// A schedule that always waits `delay`.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            base: delay,
            max_delay: delay,
            exponential: false,
            jitter: false,
        }
    }

    /// A schedule that doubles from `base` up to `max_delay`.
    #[must_use]
    pub const fn exponential(base: Duration, max_delay: Duration) -> Self {
        Self {
            base,
            max_delay,
            exponential: true,
            jitter: false,
        }
    }

    /// Adds up to 30% random jitter to every delay.
    #[must_use]
    pub const fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Returns the base delay.
    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }

    /// Returns the cap applied before jitter.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Returns `true` if the delay doubles after every attempt.
    #[must_use]
    pub const fn is_exponential(&self) -> bool {
        self.exponential
    }

    /// Returns `true` if jitter is applied.
    #[must_use]
    pub const fn has_jitter(&self) -> bool {
        self.jitter
    }

    /// Returns the delay before retry `attempt` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, &Rnd::Real)
    }

    pub(crate) fn delay_with(&self, attempt: u32, rnd: &Rnd) -> Duration {
        let delay = if self.exponential {
            clamp_to_max(duration_mul_pow2(self.base, attempt), self.max_delay)
        } else {
            self.base
        };

        if self.jitter { apply_jitter(delay, rnd) } else { delay }
    }
}

fn clamp_to_max(delay: Duration, max: Duration) -> Duration {
    min(delay, max)
}

fn duration_mul_pow2(base: Duration, attempt: u32) -> Duration {
    1_u32
        .checked_shl(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

/// Adds a uniform jitter in `[0, JITTER_FACTOR * delay]`.
fn apply_jitter(delay: Duration, rnd: &Rnd) -> Duration {
    let extra = delay.as_secs_f64() * JITTER_FACTOR * rnd.next_f64().clamp(0.0, 1.0);
    delay.saturating_add(secs_to_duration_saturating(extra))
}

fn secs_to_duration_saturating(secs: f64) -> Duration {
    if secs <= 0.0 {
        return Duration::ZERO;
    }

    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}
