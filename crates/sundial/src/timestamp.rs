// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{Display, Formatter};
use std::time::{Duration, SystemTime};

/// An absolute point in time, in whole milliseconds since the Unix epoch.
///
/// Timestamps are cheap to copy, totally ordered and survive serialization, which is why
/// cache entries and queued mutations store them instead of [`std::time::Instant`]. All
/// arithmetic saturates instead of panicking.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use sundial::Timestamp;
///
/// let created = Timestamp::from_millis(1_000);
/// let expires = created.saturating_add(Duration::from_secs(5));
///
/// assert_eq!(expires.as_millis(), 6_000);
/// assert_eq!(expires.saturating_duration_since(created), Duration::from_secs(5));
/// assert_eq!(created.saturating_duration_since(expires), Duration::ZERO);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(transparent))]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch.
    pub const UNIX_EPOCH: Self = Self(0);

    /// The largest representable timestamp.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a timestamp from milliseconds since the Unix epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the number of milliseconds since the Unix epoch.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Converts a [`SystemTime`], clamping times before the epoch to the epoch.
    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        time.duration_since(SystemTime::UNIX_EPOCH)
            .map_or(Self::UNIX_EPOCH, |since| Self(duration_to_millis(since)))
    }

    /// Converts the timestamp back to a [`SystemTime`].
    #[must_use]
    pub fn to_system_time(self) -> SystemTime {
        SystemTime::UNIX_EPOCH
            .checked_add(Duration::from_millis(self.0))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    }

    /// Adds a duration, saturating at [`Timestamp::MAX`].
    ///
    /// Sub-millisecond remainders are rounded up so that a non-zero duration always moves
    /// the timestamp forward.
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration_to_millis_ceil(duration)))
    }

    /// Subtracts a duration, saturating at the epoch.
    #[must_use]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration_to_millis(duration)))
    }

    /// Returns the time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        Self::from_system_time(time)
    }
}

pub(crate) fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn duration_to_millis_ceil(duration: Duration) -> u64 {
    let millis = duration_to_millis(duration);
    if duration > Duration::from_millis(millis) {
        millis.saturating_add(1)
    } else {
        millis
    }
}
