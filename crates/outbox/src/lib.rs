// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A durable queue of writes made while offline.
//!
//! Applications that must keep working without a network record their writes as
//! [`Mutation`]s on an [`OfflineQueue`]. The queue persists each mutation to a
//! [`stowage::DurableStore`] before acknowledging it, so nothing is lost when the process is
//! killed, and replays mutations in priority order once the device is back online.
//!
//! - Mutations carrying the same dedupe key collapse: toggling a like twice while offline sends
//!   only the final state.
//! - Failed sends are rescheduled with an [`airbag::Backoff`] schedule; a mutation that runs out of
//!   attempts or is rejected by the server is removed and reported as a
//!   [`QueueExhaustedError`], never dropped silently.
//! - [`OfflineQueue::spawn_drainer`] replays the queue automatically when a
//!   [`ConnectivitySignal`] reports that the device is connected again.
//!
//! # Example
//!
//! ```
//! use airbag::NetworkErrorKind;
//! use outbox::{Connectivity, ConnectivitySignal, Mutation, OfflineQueue, OfflineQueueOptions, QueuedMutation};
//! use stowage::MemoryStore;
//! use sundial::Clock;
//!
//! # async fn example() -> Result<(), outbox::Error> {
//! let queue = OfflineQueue::open(MemoryStore::new(), Clock::new_system(), OfflineQueueOptions::default()).await?;
//! queue.enqueue(Mutation::new("{\"liked\":true}").dedupe_key("like:42")).await?;
//!
//! let signal = ConnectivitySignal::new(Connectivity::Disconnected);
//! let sender = |mutation: &QueuedMutation| {
//!     let payload = mutation.payload().clone();
//!     async move {
//!         // Hand `payload` to the transport here.
//!         let _ = payload;
//!         Ok::<(), NetworkErrorKind>(())
//!     }
//! };
//! let drainer = queue.spawn_drainer(sender, signal.subscribe());
//!
//! signal.set(Connectivity::Connected);
//! // ...
//! drainer.stop().await;
//! # Ok(())
//! # }
//! ```

mod connectivity;
mod drain;
mod error;
mod mutation;
mod queue;

pub use connectivity::{Connectivity, ConnectivitySignal};
pub use drain::{DrainReport, DrainerHandle, MutationSender};
pub use error::{Error, FailureCause, QueueExhaustedError, Result};
pub use mutation::{Mutation, Priority, QueuedMutation};
pub use queue::{NackOutcome, OfflineQueue, OfflineQueueOptions, QueueEvent};
