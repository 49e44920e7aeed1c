// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! The durable key-value boundary used by persistent cache tiers and offline queues.
//!
//! A [`DurableStore`] is the smallest storage contract that can survive a process restart:
//! enumerate everything, read one key, write one key, delete one key. Each individual write
//! is assumed to be crash-consistent; nothing stronger (transactions, ordering across keys)
//! is required by the components built on top.
//!
//! # Implementations
//!
//! - [`MemoryStore`]: a shared in-memory map. Clones observe the same data, so re-opening a
//!   component over a clone simulates a restart in tests.
//! - [`FileStore`]: one file per key, written through a temporary file and an atomic rename.
//! - [`Namespaced`]: prefixes keys so several components can share one underlying store.
//! - `MockStore` (with the `test-util` feature): records operations and injects failures.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use stowage::{DurableStore, MemoryStore, Namespaced};
//!
//! # futures::executor::block_on(async {
//! let store = MemoryStore::new();
//! let queue = Namespaced::new(store.clone(), "queue/");
//!
//! queue.write("m-1", Bytes::from_static(b"payload")).await?;
//!
//! assert_eq!(store.read("queue/m-1").await?, Some(Bytes::from_static(b"payload")));
//! assert_eq!(queue.read_all().await?.len(), 1);
//! # Ok::<(), stowage::Error>(())
//! # }).unwrap();
//! ```

mod error;
mod file;
mod memory;
mod namespaced;
mod store;
#[cfg(any(feature = "test-util", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod testing;

pub use error::{Error, Result};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use namespaced::Namespaced;
pub use store::DurableStore;
