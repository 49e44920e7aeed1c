// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Recency index shared by both tiers.

use std::collections::{BTreeMap, HashMap};

use crate::{CacheKey, TierBudget};

#[derive(Debug)]
struct Slot<M> {
    tick: u64,
    size_bytes: u64,
    meta: M,
}

/// A map that remembers the order in which keys were last touched.
///
/// Every access gets a fresh, strictly increasing tick; the smallest tick is the least recently
/// used key. All operations are `O(log n)`.
#[derive(Debug)]
pub(crate) struct LruIndex<M> {
    slots: HashMap<CacheKey, Slot<M>>,
    order: BTreeMap<u64, CacheKey>,
    next_tick: u64,
    total_bytes: u64,
}

impl<M> Default for LruIndex<M> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
            total_bytes: 0,
        }
    }
}

impl<M> LruIndex<M> {
    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick = self.next_tick.wrapping_add(1);
        tick
    }

    /// Returns the metadata for `key` without changing its recency.
    pub(crate) fn peek(&self, key: &CacheKey) -> Option<&M> {
        self.slots.get(key).map(|slot| &slot.meta)
    }

    /// Marks `key` as most recently used and returns its metadata.
    pub(crate) fn touch(&mut self, key: &CacheKey) -> Option<&M> {
        let tick = self.bump();
        let slot = self.slots.get_mut(key)?;
        if let Some(key) = self.order.remove(&slot.tick) {
            self.order.insert(tick, key);
        }
        slot.tick = tick;
        Some(&slot.meta)
    }

    /// Inserts or replaces `key` as the most recently used entry.
    pub(crate) fn insert(&mut self, key: CacheKey, size_bytes: u64, meta: M) -> Option<M> {
        let previous = self.remove(&key);
        let tick = self.bump();
        self.order.insert(tick, key.clone());
        self.total_bytes = self.total_bytes.saturating_add(size_bytes);
        self.slots.insert(key, Slot { tick, size_bytes, meta });
        previous
    }

    pub(crate) fn remove(&mut self, key: &CacheKey) -> Option<M> {
        let slot = self.slots.remove(key)?;
        self.order.remove(&slot.tick);
        self.total_bytes = self.total_bytes.saturating_sub(slot.size_bytes);
        Some(slot.meta)
    }

    /// Removes and returns the least recently used entry.
    pub(crate) fn pop_lru(&mut self) -> Option<(CacheKey, M)> {
        let (_, key) = self.order.pop_first()?;
        let slot = self.slots.remove(&key)?;
        self.total_bytes = self.total_bytes.saturating_sub(slot.size_bytes);
        Some((key, slot.meta))
    }

    /// Evicts least recently used entries until `budget` holds.
    pub(crate) fn enforce(&mut self, budget: &TierBudget) -> Vec<(CacheKey, M)> {
        let mut evicted = Vec::new();
        while budget.is_exceeded(self.len(), self.total_bytes) {
            match self.pop_lru() {
                Some(entry) => evicted.push(entry),
                None => break,
            }
        }
        evicted
    }

    /// Removes every entry matching `predicate`.
    pub(crate) fn remove_where(&mut self, mut predicate: impl FnMut(&M) -> bool) -> Vec<(CacheKey, M)> {
        let doomed: Vec<CacheKey> = self
            .slots
            .iter()
            .filter(|(_, slot)| predicate(&slot.meta))
            .map(|(key, _)| key.clone())
            .collect();

        doomed
            .into_iter()
            .filter_map(|key| self.remove(&key).map(|meta| (key, meta)))
            .collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<CacheKey> {
        self.order.clear();
        self.total_bytes = 0;
        self.slots.drain().map(|(key, _)| key).collect()
    }

    pub(crate) fn len(&self) -> u64 {
        u64::try_from(self.slots.len()).unwrap_or(u64::MAX)
    }

    pub(crate) fn total_bytes(&self) -> u64 {
        self.total_bytes
    }
}
