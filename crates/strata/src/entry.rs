// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use sundial::Timestamp;

/// A cached value with its lifetime metadata.
///
/// The entry is expired once the clock reaches `expires_at`; from that instant it is logically
/// absent and never returned by a tier. `expires_at` is always strictly later than `created_at`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use strata::CacheEntry;
/// use sundial::Timestamp;
///
/// let entry = CacheEntry::new("v1", Timestamp::from_millis(0), Duration::from_secs(5), 2).unwrap();
///
/// assert!(!entry.is_expired(Timestamp::from_millis(4_999)));
/// assert!(entry.is_expired(Timestamp::from_millis(5_000)));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry<V> {
    value: V,
    created_at: Timestamp,
    expires_at: Timestamp,
    size_bytes: u64,
}

impl<V> CacheEntry<V> {
    /// Creates an entry that lives for `ttl` starting at `created_at`.
    ///
    /// Returns `None` if `ttl` is zero.
    #[must_use]
    pub fn new(value: V, created_at: Timestamp, ttl: Duration, size_bytes: u64) -> Option<Self> {
        let expires_at = created_at.saturating_add(ttl);
        Self::from_parts(value, created_at, expires_at, size_bytes)
    }

    /// Recreates an entry from stored timestamps.
    ///
    /// Returns `None` unless `expires_at > created_at`.
    #[must_use]
    pub fn from_parts(value: V, created_at: Timestamp, expires_at: Timestamp, size_bytes: u64) -> Option<Self> {
        (expires_at > created_at).then_some(Self {
            value,
            created_at,
            expires_at,
            size_bytes,
        })
    }

    pub(crate) fn with_size(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    /// Returns a reference to the value.
    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the entry and returns the value.
    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }

    /// Returns when the entry was written.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Returns when the entry stops being served.
    #[must_use]
    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    /// Returns the accounted size of the entry.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Returns `true` once `now` has reached the expiry time.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Returns how long ago the entry was written.
    #[must_use]
    pub fn age(&self, now: Timestamp) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Returns how long the entry remains valid, zero if expired.
    #[must_use]
    pub fn remaining(&self, now: Timestamp) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_ttl_is_rejected() {
        assert!(CacheEntry::new(1, Timestamp::from_millis(10), Duration::ZERO, 0).is_none());
        assert!(CacheEntry::from_parts(1, Timestamp::from_millis(10), Timestamp::from_millis(10), 0).is_none());
    }

    #[test]
    fn age_and_remaining() {
        let entry = CacheEntry::new("x", Timestamp::from_millis(1_000), Duration::from_secs(10), 1).unwrap();
        let now = Timestamp::from_millis(4_000);
        assert_eq!(entry.age(now), Duration::from_secs(3));
        assert_eq!(entry.remaining(now), Duration::from_secs(7));
        assert_eq!(entry.remaining(Timestamp::from_millis(20_000)), Duration::ZERO);
        assert_eq!(entry.into_value(), "x");
    }
}
