// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use stowage::DurableStore;
use sundial::Clock;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::persistent::encode;
use crate::telemetry::{self, CacheActivity, Tier};
use crate::{CacheEntry, CacheKey, Error, MemoryTier, PersistentTier, Result, TierBudget};

/// Configuration of a [`TieredCache`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use strata::{TierBudget, TieredCacheOptions};
///
/// let options = TieredCacheOptions::default()
///     .memory(TierBudget::unlimited().with_max_entries(64))
///     .default_ttl(Duration::from_secs(30));
/// assert_eq!(options.memory_budget().max_entries, Some(64));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TieredCacheOptions {
    memory: TierBudget,
    persistent: TierBudget,
    default_ttl: Duration,
}

impl Default for TieredCacheOptions {
    fn default() -> Self {
        Self {
            memory: TierBudget::unlimited().with_max_entries(1_000).with_max_bytes(16 * 1024 * 1024),
            persistent: TierBudget::unlimited()
                .with_max_entries(10_000)
                .with_max_bytes(256 * 1024 * 1024),
            default_ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl TieredCacheOptions {
    /// Sets the memory tier budget.
    #[must_use]
    pub fn memory(mut self, budget: TierBudget) -> Self {
        self.memory = budget;
        self
    }

    /// Sets the persistent tier budget.
    #[must_use]
    pub fn persistent(mut self, budget: TierBudget) -> Self {
        self.persistent = budget;
        self
    }

    /// Sets the time-to-live used by [`TieredCache::set_default`].
    #[must_use]
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Returns the memory tier budget.
    #[must_use]
    pub fn memory_budget(&self) -> TierBudget {
        self.memory
    }

    /// Returns the persistent tier budget.
    #[must_use]
    pub fn persistent_budget(&self) -> TierBudget {
        self.persistent
    }

    /// Returns the default time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.default_ttl
    }
}

/// How many entries a sweep removed from each tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepStats {
    /// Entries removed from the memory tier.
    pub memory: usize,
    /// Entries removed from the persistent tier.
    pub persistent: usize,
}

/// A two-tier cache: a bounded memory tier in front of a bounded durable tier.
///
/// - `get` checks memory, then the persistent tier; persistent hits are copied into memory.
/// - `set` writes memory first, then the persistent tier, so a reader racing the writer
///   never sees a persistent-only value. The memory write is synchronous with respect to the
///   caller, which gives read-your-writes.
/// - Each tier evicts least recently used entries against its own budget.
/// - Expiry is computed from the injected [`Clock`]; expired entries are removed lazily on
///   lookup and optionally by a periodic sweeper.
///
/// Cloning is cheap and clones share the same tiers.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use stowage::MemoryStore;
/// use strata::{CacheKey, TieredCache, TieredCacheOptions};
/// use sundial::Clock;
///
/// # futures::executor::block_on(async {
/// let cache = TieredCache::<String, _>::open(Clock::new_system(), MemoryStore::new(), TieredCacheOptions::default()).await?;
///
/// let key = CacheKey::from("post:42");
/// cache.set(key.clone(), "hello".to_owned(), Duration::from_secs(5)).await?;
/// assert_eq!(cache.get(&key).await.as_deref(), Some("hello"));
/// # Ok::<(), strata::Error>(())
/// # }).unwrap();
/// ```
#[derive(Debug)]
pub struct TieredCache<V, S> {
    inner: Arc<Inner<V, S>>,
}

#[derive(Debug)]
struct Inner<V, S> {
    clock: Clock,
    memory: MemoryTier<V>,
    persistent: PersistentTier<V, S>,
    default_ttl: Duration,
}

impl<V, S> Clone for TieredCache<V, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V, S> TieredCache<V, S>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync,
    S: DurableStore,
{
    /// Opens the cache, rebuilding the persistent tier from `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be enumerated.
    pub async fn open(clock: Clock, store: S, options: TieredCacheOptions) -> Result<Self> {
        let persistent = PersistentTier::open(store, options.persistent).await?;
        Ok(Self {
            inner: Arc::new(Inner {
                clock,
                memory: MemoryTier::new(options.memory),
                persistent,
                default_ttl: options.default_ttl,
            }),
        })
    }

    /// Returns the live value for `key`, if any.
    pub async fn get(&self, key: &CacheKey) -> Option<V> {
        self.get_entry(key).await.map(CacheEntry::into_value)
    }

    /// Returns the live entry for `key` together with its timestamps.
    ///
    /// A persistent-tier failure is logged and reported as a miss.
    pub async fn get_entry(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let now = self.inner.clock.now();

        if let Some(entry) = self.inner.memory.get(key, now) {
            return Some(entry);
        }

        // Taken before the read: a write racing with it must not be shadowed by this value.
        let stamp = self.inner.memory.write_stamp();
        match self.inner.persistent.get(key, now).await {
            Ok(Some(entry)) => {
                if self.inner.memory.promote(key.clone(), entry.clone(), stamp) {
                    telemetry::record(Tier::Memory, CacheActivity::Promoted, key);
                }
                Some(entry)
            }
            Ok(None) => None,
            Err(error) => {
                telemetry::storage_failure("get", Some(key), &error);
                None
            }
        }
    }

    /// Stores `value` under `key` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTtl`] for a zero `ttl`, [`Error::Codec`] if the value cannot be
    /// encoded, and [`Error::Storage`] if the persistent write fails. On a storage failure the
    /// memory tier still holds the new value.
    pub async fn set(&self, key: CacheKey, value: V, ttl: Duration) -> Result<()> {
        let now = self.inner.clock.now();
        let entry = CacheEntry::new(value, now, ttl, 0).ok_or(Error::InvalidTtl(ttl))?;
        let bytes = encode(&entry)?;
        let expires_at = entry.expires_at();

        self.inner
            .memory
            .insert(key.clone(), entry.with_size(bytes.len() as u64));

        match self.inner.persistent.insert_encoded(key.clone(), expires_at, bytes).await {
            Ok(_) => Ok(()),
            Err(error) => {
                telemetry::storage_failure("set", Some(&key), &error);
                Err(error)
            }
        }
    }

    /// Stores `value` under `key` for the configured default time-to-live.
    ///
    /// # Errors
    ///
    /// See [`set`][Self::set].
    pub async fn set_default(&self, key: CacheKey, value: V) -> Result<()> {
        self.set(key, value, self.inner.default_ttl).await
    }

    /// Removes `key` from both tiers.
    ///
    /// # Errors
    ///
    /// Returns an error if the persistent delete fails; the memory tier is cleared regardless.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        self.inner.memory.invalidate(key);
        self.inner.persistent.invalidate(key).await.map(|_| ())
    }

    /// Removes every entry from both tiers.
    ///
    /// # Errors
    ///
    /// Returns the first persistent delete failure.
    pub async fn clear(&self) -> Result<()> {
        self.inner.memory.clear();
        self.inner.persistent.clear().await
    }

    /// Removes every expired entry from both tiers.
    ///
    /// # Errors
    ///
    /// Returns the first persistent delete failure.
    pub async fn sweep_expired(&self) -> Result<SweepStats> {
        let now = self.inner.clock.now();
        let memory = self.inner.memory.remove_expired(now);
        let persistent = self.inner.persistent.remove_expired(now).await?;
        Ok(SweepStats { memory, persistent })
    }

    /// Returns the memory tier.
    #[must_use]
    pub fn memory(&self) -> &MemoryTier<V> {
        &self.inner.memory
    }

    /// Returns the persistent tier.
    #[must_use]
    pub fn persistent(&self) -> &PersistentTier<V, S> {
        &self.inner.persistent
    }

    /// Returns the clock used for expiry.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Returns the default time-to-live.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }
}

impl<V, S> TieredCache<V, S>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: DurableStore + 'static,
{
    /// Starts a background task that sweeps expired entries every `interval`.
    ///
    /// The task runs until [`SweeperHandle::stop`] is awaited; dropping the handle aborts it.
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn_sweeper(&self, interval: Duration) -> SweeperHandle {
        let cache = self.clone();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    () = cache.inner.clock.delay(interval) => {
                        match cache.sweep_expired().await {
                            Ok(stats) => tracing::event!(
                                name: "strata.sweep",
                                tracing::Level::DEBUG,
                                cache.swept.memory = stats.memory,
                                cache.swept.persistent = stats.persistent,
                            ),
                            Err(error) => telemetry::storage_failure("sweep", None, &error),
                        }
                    }
                }
            }
        });

        SweeperHandle {
            stop: Some(stop_tx),
            task: Some(task),
        }
    }
}

/// Controls a sweeper started by [`TieredCache::spawn_sweeper`].
#[derive(Debug)]
pub struct SweeperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for it to finish its current pass.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
