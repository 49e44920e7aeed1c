// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stowage::DurableStore;
use sundial::Timestamp;
use tokio::sync::Mutex as KeyLock;

use crate::lru::LruIndex;
use crate::telemetry::{self, CacheActivity, Tier};
use crate::{CacheEntry, CacheKey, Result, TierBudget};

/// The on-disk record of one entry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord<V> {
    created_at: Timestamp,
    expires_at: Timestamp,
    value: V,
}

/// The part of a record needed to rebuild the index; the value is skipped while parsing.
#[derive(Debug, Deserialize)]
struct StoredMeta {
    created_at: Timestamp,
    expires_at: Timestamp,
}

#[derive(Debug, Clone, Copy)]
struct EntryMeta {
    expires_at: Timestamp,
    generation: u64,
}

const KEY_LOCK_STRIPES: usize = 64;

/// A bounded cache tier whose values live in a [`DurableStore`].
///
/// Only keys, expiry times and sizes are kept in memory; values are read from the store on
/// demand. Records are JSON documents named by [`CacheKey::to_hex`]. The in-memory index is
/// never locked across a store operation.
///
/// Store mutations for one key are serialized through a striped set of key locks, and every
/// indexed record carries the generation of the write that produced it. A delete only goes
/// through if the record it targets is still the one indexed, so a concurrent write to the
/// same key is never lost to an expiry, eviction or sweep that started before it.
#[derive(Debug)]
pub struct PersistentTier<V, S> {
    store: S,
    index: Mutex<LruIndex<EntryMeta>>,
    key_locks: Box<[KeyLock<()>]>,
    generation: AtomicU64,
    budget: TierBudget,
    _value: PhantomData<fn() -> V>,
}

impl<V, S> PersistentTier<V, S>
where
    V: Serialize + DeserializeOwned + Send,
    S: DurableStore,
{
    /// Opens the tier over `store`, rebuilding the index from what the store contains.
    ///
    /// Records that cannot be parsed are deleted. If the store holds more than `budget`
    /// allows, the oldest records are evicted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    pub async fn open(store: S, budget: TierBudget) -> Result<Self> {
        let mut valid = Vec::new();
        let mut corrupt = Vec::new();

        for (name, bytes) in store.read_all().await? {
            let meta = CacheKey::from_hex(&name).and_then(|key| {
                let meta: StoredMeta = serde_json::from_slice(&bytes).ok()?;
                (meta.expires_at > meta.created_at).then_some((key, meta, bytes.len()))
            });
            match meta {
                Some(record) => valid.push(record),
                None => corrupt.push(name),
            }
        }

        valid.sort_by_key(|(_, meta, _)| meta.created_at);

        let mut index = LruIndex::default();
        let mut doomed: Vec<String> = corrupt;
        let mut generation = 0;
        for (key, meta, size) in valid {
            let size = size as u64;
            if budget.admits(size) {
                generation += 1;
                index.insert(
                    key,
                    size,
                    EntryMeta {
                        expires_at: meta.expires_at,
                        generation,
                    },
                );
            } else {
                doomed.push(key.to_hex());
            }
        }
        doomed.extend(index.enforce(&budget).into_iter().map(|(key, _)| key.to_hex()));

        for name in doomed {
            if let Err(error) = store.delete(&name).await {
                telemetry::storage_failure("open", None, &error);
            }
        }

        Ok(Self {
            store,
            index: Mutex::new(index),
            key_locks: (0..KEY_LOCK_STRIPES).map(|_| KeyLock::new(())).collect(),
            generation: AtomicU64::new(generation),
            budget,
            _value: PhantomData,
        })
    }

    fn key_lock(&self, key: &CacheKey) -> &KeyLock<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.key_locks[usize::from(hasher.finish().to_le_bytes()[0]) % self.key_locks.len()]
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Removes `key` from the index only if it still refers to the record of `generation`.
    fn unindex(&self, key: &CacheKey, generation: u64) -> bool {
        let mut index = self.index.lock();
        if index.peek(key).is_some_and(|meta| meta.generation == generation) {
            index.remove(key);
            true
        } else {
            false
        }
    }

    /// Reads the live entry for `key`, marking it most recently used.
    ///
    /// Expired entries are deleted from the store as a side effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the record cannot be decoded. A record that
    /// cannot be decoded is dropped from the index.
    pub async fn get(&self, key: &CacheKey, now: Timestamp) -> Result<Option<CacheEntry<V>>> {
        let meta = self.index.lock().touch(key).copied();
        let Some(meta) = meta else {
            telemetry::record(Tier::Persistent, CacheActivity::Miss, key);
            return Ok(None);
        };

        if now >= meta.expires_at {
            telemetry::record(Tier::Persistent, CacheActivity::Expired, key);
            let _guard = self.key_lock(key).lock().await;
            if self.unindex(key, meta.generation) {
                self.store.delete(&key.to_hex()).await?;
            }
            return Ok(None);
        }

        let Some(bytes) = self.store.read(&key.to_hex()).await? else {
            self.unindex(key, meta.generation);
            telemetry::record(Tier::Persistent, CacheActivity::Miss, key);
            return Ok(None);
        };

        let record: StoredRecord<V> = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(error) => {
                self.unindex(key, meta.generation);
                return Err(error.into());
            }
        };

        let entry = CacheEntry::from_parts(record.value, record.created_at, record.expires_at, bytes.len() as u64)
            .filter(|entry| !entry.is_expired(now));
        let outcome = if entry.is_some() { CacheActivity::Hit } else { CacheActivity::Expired };
        telemetry::record(Tier::Persistent, outcome, key);
        Ok(entry)
    }

    /// Writes `entry` under `key`, evicting least recently used records to stay in budget.
    ///
    /// Returns `Ok(false)` if the encoded entry alone exceeds the budget; any previous record
    /// for `key` is deleted in that case.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the store write fails.
    pub async fn insert(&self, key: CacheKey, entry: &CacheEntry<V>) -> Result<bool> {
        let bytes = encode(entry)?;
        self.insert_encoded(key, entry.expires_at(), bytes).await
    }

    pub(crate) async fn insert_encoded(&self, key: CacheKey, expires_at: Timestamp, bytes: Bytes) -> Result<bool> {
        let size = bytes.len() as u64;
        let name = key.to_hex();

        let evicted = {
            let _guard = self.key_lock(&key).lock().await;

            if !self.budget.admits(size) {
                self.index.lock().remove(&key);
                telemetry::record(Tier::Persistent, CacheActivity::Rejected, &key);
                self.store.delete(&name).await?;
                return Ok(false);
            }

            self.store.write(&name, bytes).await?;

            let generation = self.next_generation();
            let mut index = self.index.lock();
            index.insert(key, size, EntryMeta { expires_at, generation });
            index.enforce(&self.budget)
        };

        for (key, meta) in evicted {
            telemetry::record(Tier::Persistent, CacheActivity::Evicted, &key);
            if let Err(error) = self.delete_unless_rewritten(&key, meta.generation).await {
                // The record is re-evicted on the next open.
                telemetry::storage_failure("evict", Some(&key), &error);
            }
        }

        Ok(true)
    }

    /// Deletes the record of an entry already removed from the index, unless the key was
    /// written again in the meantime.
    async fn delete_unless_rewritten(&self, key: &CacheKey, generation: u64) -> stowage::Result<()> {
        let _guard = self.key_lock(key).lock().await;
        let rewritten = self
            .index
            .lock()
            .peek(key)
            .is_some_and(|meta| meta.generation > generation);
        if rewritten {
            return Ok(());
        }
        self.store.delete(&key.to_hex()).await
    }

    /// Removes `key` from the tier and the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store delete fails.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<bool> {
        let _guard = self.key_lock(key).lock().await;
        let existed = self.index.lock().remove(key).is_some();
        self.store.delete(&key.to_hex()).await?;
        Ok(existed)
    }

    /// Removes every entry of this tier.
    ///
    /// # Errors
    ///
    /// Attempts every delete and returns the first failure.
    pub async fn clear(&self) -> Result<()> {
        let generation = self.generation.load(Ordering::Relaxed);
        let keys = self.index.lock().drain();
        self.delete_all(keys.into_iter().map(|key| (key, generation)), "clear").await
    }

    /// Removes every entry expired at `now` and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Attempts every delete and returns the first failure.
    pub async fn remove_expired(&self, now: Timestamp) -> Result<usize> {
        let expired = self.index.lock().remove_where(|meta| now >= meta.expires_at);
        let count = expired.len();
        self.delete_all(expired.into_iter().map(|(key, meta)| (key, meta.generation)), "sweep")
            .await?;
        Ok(count)
    }

    async fn delete_all(
        &self,
        keys: impl Iterator<Item = (CacheKey, u64)> + Send,
        operation: &'static str,
    ) -> Result<()> {
        let mut first_error = None;
        for (key, generation) in keys {
            if let Err(error) = self.delete_unless_rewritten(&key, generation).await {
                telemetry::storage_failure(operation, Some(&key), &error);
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), |error| Err(error.into()))
    }

    /// Returns the number of indexed entries.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.index.lock().len()
    }

    /// Returns `true` if the tier holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the stored size of all indexed records.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.index.lock().total_bytes()
    }

    /// Returns the tier budget.
    #[must_use]
    pub fn budget(&self) -> TierBudget {
        self.budget
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }
}

pub(crate) fn encode<V: Serialize>(entry: &CacheEntry<V>) -> Result<Bytes> {
    let record = StoredRecord {
        created_at: entry.created_at(),
        expires_at: entry.expires_at(),
        value: entry.value(),
    };
    Ok(Bytes::from(serde_json::to_vec(&record)?))
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::executor::block_on;
    use stowage::MemoryStore;
    use stowage::testing::{MockStore, StoreOp};

    use super::*;

    fn entry(value: &str, created: u64, ttl_secs: u64) -> CacheEntry<String> {
        CacheEntry::new(value.to_owned(), Timestamp::from_millis(created), Duration::from_secs(ttl_secs), 0).unwrap()
    }

    #[test]
    fn reopen_rebuilds_index() {
        block_on(async {
            let store = MemoryStore::new();
            let tier = PersistentTier::<String, _>::open(store.clone(), TierBudget::unlimited()).await.unwrap();
            tier.insert(CacheKey::from("a"), &entry("one", 0, 10)).await.unwrap();
            tier.insert(CacheKey::from("b"), &entry("two", 0, 10)).await.unwrap();
            drop(tier);

            let reopened = PersistentTier::<String, _>::open(store, TierBudget::unlimited()).await.unwrap();
            assert_eq!(reopened.len(), 2);
            let found = reopened.get(&CacheKey::from("b"), Timestamp::from_millis(1)).await.unwrap();
            assert_eq!(found.map(CacheEntry::into_value), Some("two".to_owned()));
        });
    }

    #[test]
    fn reopen_drops_corrupt_records_and_enforces_budget() {
        block_on(async {
            let store = MemoryStore::new();
            let tier = PersistentTier::<String, _>::open(store.clone(), TierBudget::unlimited()).await.unwrap();
            tier.insert(CacheKey::from("old"), &entry("1", 0, 10)).await.unwrap();
            tier.insert(CacheKey::from("new"), &entry("2", 5, 10)).await.unwrap();
            store
                .write(&CacheKey::from("bad").to_hex(), Bytes::from_static(b"not json"))
                .await
                .unwrap();
            store.write("zz-not-hex", Bytes::from_static(b"{}")).await.unwrap();
            drop(tier);

            let reopened = PersistentTier::<String, _>::open(store.clone(), TierBudget::unlimited().with_max_entries(1))
                .await
                .unwrap();

            assert_eq!(reopened.len(), 1);
            assert_eq!(store.keys(), vec![CacheKey::from("new").to_hex()]);
        });
    }

    #[test]
    fn expired_record_is_deleted_on_get() {
        block_on(async {
            let store = MemoryStore::new();
            let tier = PersistentTier::<String, _>::open(store.clone(), TierBudget::unlimited()).await.unwrap();
            tier.insert(CacheKey::from("k"), &entry("v", 0, 5)).await.unwrap();

            assert!(tier.get(&CacheKey::from("k"), Timestamp::from_millis(5_000)).await.unwrap().is_none());
            assert!(store.is_empty());
            assert!(tier.is_empty());
        });
    }

    #[test]
    fn eviction_deletes_from_store() {
        block_on(async {
            let store = MemoryStore::new();
            let tier = PersistentTier::<String, _>::open(store.clone(), TierBudget::unlimited().with_max_entries(2))
                .await
                .unwrap();
            for name in ["a", "b", "c"] {
                tier.insert(CacheKey::from(name), &entry(name, 0, 60)).await.unwrap();
            }

            assert_eq!(tier.len(), 2);
            assert_eq!(store.len(), 2);
            assert!(store.read(&CacheKey::from("a").to_hex()).await.unwrap().is_none());
        });
    }

    #[test]
    fn stale_delete_leaves_a_rewritten_record() {
        block_on(async {
            let store = MemoryStore::new();
            let tier = PersistentTier::<String, _>::open(store.clone(), TierBudget::unlimited()).await.unwrap();
            let key = CacheKey::from("k");
            tier.insert(key.clone(), &entry("one", 0, 10)).await.unwrap();
            let first = tier.index.lock().peek(&key).unwrap().generation;
            tier.insert(key.clone(), &entry("two", 1, 10)).await.unwrap();

            tier.delete_unless_rewritten(&key, first).await.unwrap();
            assert!(!tier.unindex(&key, first));

            let found = tier.get(&key, Timestamp::from_millis(2)).await.unwrap();
            assert_eq!(found.map(CacheEntry::into_value), Some("two".to_owned()));
            assert_eq!(store.len(), 1);
        });
    }

    #[test]
    fn failed_write_does_not_index() {
        block_on(async {
            let store = MockStore::new();
            store.fail_when(|op| matches!(op, StoreOp::Write(..)));
            let tier = PersistentTier::<String, _>::open(store, TierBudget::unlimited()).await.unwrap();

            assert!(tier.insert(CacheKey::from("k"), &entry("v", 0, 5)).await.is_err());
            assert!(tier.is_empty());
        });
    }

    #[test]
    fn oversized_record_is_not_admitted() {
        block_on(async {
            let store = MemoryStore::new();
            let tier = PersistentTier::<String, _>::open(store.clone(), TierBudget::unlimited().with_max_bytes(16))
                .await
                .unwrap();

            let admitted = tier.insert(CacheKey::from("k"), &entry("a long value", 0, 5)).await.unwrap();

            assert!(!admitted);
            assert!(store.is_empty());
        });
    }
}
