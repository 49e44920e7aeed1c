// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A two-tier cache for clients that must keep working with stale-but-usable data.
//!
//! [`TieredCache`] composes a volatile [`MemoryTier`] with a [`PersistentTier`] that lives in
//! a [`stowage::DurableStore`] and survives restarts. Both tiers are bounded by a
//! [`TierBudget`] and evict least recently used entries independently.
//!
//! Time-to-live is given as a [`Duration`](std::time::Duration) and turned into an absolute
//! expiry with the injected [`sundial::Clock`] at the moment of `set`, so every expiry decision
//! is made against one time source and tests can move time instead of sleeping.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use stowage::MemoryStore;
//! use strata::{CacheKey, TieredCache, TieredCacheOptions};
//! use sundial::ClockControl;
//!
//! # futures::executor::block_on(async {
//! let control = ClockControl::new();
//! let cache = TieredCache::open(control.to_clock(), MemoryStore::new(), TieredCacheOptions::default()).await?;
//!
//! let key = CacheKey::from("post:42");
//! cache.set(key.clone(), "v1".to_owned(), Duration::from_secs(5)).await?;
//!
//! control.advance(Duration::from_secs(3));
//! assert_eq!(cache.get(&key).await.as_deref(), Some("v1"));
//!
//! control.advance(Duration::from_secs(3));
//! assert_eq!(cache.get(&key).await, None);
//! # Ok::<(), strata::Error>(())
//! # }).unwrap();
//! ```

mod budget;
mod cache;
mod entry;
mod error;
mod key;
mod lru;
mod memory;
mod persistent;
mod telemetry;

pub use budget::TierBudget;
pub use cache::{SweepStats, SweeperHandle, TieredCache, TieredCacheOptions};
pub use entry::CacheEntry;
pub use error::{Error, Result};
pub use key::CacheKey;
pub use memory::{MemoryTier, WriteStamp};
pub use persistent::PersistentTier;
