// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use parking_lot::{Mutex, MutexGuard};
use sundial::Timestamp;

use crate::lru::LruIndex;
use crate::telemetry::{self, CacheActivity, Tier};
use crate::{CacheEntry, CacheKey, TierBudget};

/// A bounded, volatile cache tier.
///
/// Every operation is a single short critical section over the map and its recency index;
/// nothing here ever awaits. Entries found expired during a lookup are removed on the spot.
///
/// The tier counts its writes. A value read from a slower tier is promoted with
/// [`promote`][Self::promote] only if no write happened since [`write_stamp`][Self::write_stamp]
/// was taken, so a promotion can never shadow a newer value.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use strata::{CacheEntry, CacheKey, MemoryTier, TierBudget};
/// use sundial::Timestamp;
///
/// let tier = MemoryTier::new(TierBudget::unlimited().with_max_entries(1));
/// let now = Timestamp::from_millis(0);
/// let entry = |v| CacheEntry::new(v, now, Duration::from_secs(1), 1).unwrap();
///
/// tier.insert(CacheKey::from("a"), entry(1));
/// tier.insert(CacheKey::from("b"), entry(2));
///
/// assert!(tier.get(&CacheKey::from("a"), now).is_none());
/// assert_eq!(tier.get(&CacheKey::from("b"), now).map(|e| *e.value()), Some(2));
/// ```
#[derive(Debug)]
pub struct MemoryTier<V> {
    state: Mutex<State<V>>,
    budget: TierBudget,
}

#[derive(Debug)]
struct State<V> {
    index: LruIndex<CacheEntry<V>>,
    writes: u64,
}

/// The number of writes a [`MemoryTier`] had seen at some point. See [`MemoryTier::promote`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteStamp(u64);

impl<V: Clone> MemoryTier<V> {
    /// Creates an empty tier with the given budget.
    #[must_use]
    pub fn new(budget: TierBudget) -> Self {
        Self {
            state: Mutex::new(State {
                index: LruIndex::default(),
                writes: 0,
            }),
            budget,
        }
    }

    /// Returns a copy of the live entry for `key`, marking it most recently used.
    pub fn get(&self, key: &CacheKey, now: Timestamp) -> Option<CacheEntry<V>> {
        let mut state = self.state.lock();

        let Some(entry) = state.index.touch(key) else {
            drop(state);
            telemetry::record(Tier::Memory, CacheActivity::Miss, key);
            return None;
        };

        if !entry.is_expired(now) {
            let entry = entry.clone();
            drop(state);
            telemetry::record(Tier::Memory, CacheActivity::Hit, key);
            return Some(entry);
        }

        state.index.remove(key);
        drop(state);
        telemetry::record(Tier::Memory, CacheActivity::Expired, key);
        None
    }

    /// Stores `entry` under `key`, evicting least recently used entries to stay in budget.
    ///
    /// Returns `false` if the entry alone exceeds the budget; in that case any previous
    /// value for `key` is removed so a stale value cannot outlive the write.
    pub fn insert(&self, key: CacheKey, entry: CacheEntry<V>) -> bool {
        let mut state = self.state.lock();
        state.writes = state.writes.wrapping_add(1);
        self.store(state, key, entry)
    }

    /// Returns the current write stamp, to be passed to [`promote`][Self::promote] later.
    #[must_use]
    pub fn write_stamp(&self) -> WriteStamp {
        WriteStamp(self.state.lock().writes)
    }

    /// Stores `entry` under `key` unless the tier was written to after `stamp` was taken.
    ///
    /// Returns `true` if the entry was stored.
    pub fn promote(&self, key: CacheKey, entry: CacheEntry<V>, stamp: WriteStamp) -> bool {
        let state = self.state.lock();
        if state.writes != stamp.0 {
            drop(state);
            telemetry::record(Tier::Memory, CacheActivity::Superseded, &key);
            return false;
        }
        self.store(state, key, entry)
    }

    fn store(&self, mut state: MutexGuard<'_, State<V>>, key: CacheKey, entry: CacheEntry<V>) -> bool {
        if !self.budget.admits(entry.size_bytes()) {
            state.index.remove(&key);
            drop(state);
            telemetry::record(Tier::Memory, CacheActivity::Rejected, &key);
            return false;
        }

        state.index.insert(key, entry.size_bytes(), entry);
        let evicted = state.index.enforce(&self.budget);
        drop(state);

        for (key, _) in &evicted {
            telemetry::record(Tier::Memory, CacheActivity::Evicted, key);
        }
        true
    }

    /// Removes `key`. Returns `true` if it was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut state = self.state.lock();
        state.writes = state.writes.wrapping_add(1);
        state.index.remove(key).is_some()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.writes = state.writes.wrapping_add(1);
        state.index.drain();
    }

    /// Removes every entry expired at `now` and returns how many were removed.
    pub fn remove_expired(&self, now: Timestamp) -> usize {
        self.state.lock().index.remove_where(|entry| entry.is_expired(now)).len()
    }

    /// Returns the number of resident entries, expired ones included until they are swept.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.state.lock().index.len()
    }

    /// Returns `true` if the tier holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the accounted size of all resident entries.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.state.lock().index.total_bytes()
    }

    /// Returns the tier budget.
    #[must_use]
    pub fn budget(&self) -> TierBudget {
        self.budget
    }
}
