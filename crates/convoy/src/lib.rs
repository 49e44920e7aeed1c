// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Coalesces concurrent fetches for the same key into a single execution.
//!
//! [`FetchCoordinator::fetch_or_join`] starts the producer for a key that has no fetch in
//! flight, or joins the one that does. Every caller that joins before the fetch resolves
//! receives a clone of the same outcome, success or failure, and the producer runs exactly
//! once.
//!
//! # Example
//!
//! ```
//! use convoy::FetchCoordinator;
//!
//! # async fn example() {
//! let coordinator: FetchCoordinator<&str, Result<String, String>> = FetchCoordinator::new();
//!
//! let first = coordinator.fetch_or_join("user:123", || async { Ok("alice".to_owned()) });
//! let second = coordinator.fetch_or_join("user:123", || async { Ok("bob".to_owned()) });
//!
//! assert!(second.is_coalesced());
//! assert_eq!(first.await, second.await);
//! assert_eq!(coordinator.in_flight(), 0);
//! # }
//! ```
//!
//! # Lifecycle
//!
//! - The producer runs on its own Tokio task. Dropping a [`Flight`] only detaches that
//!   observer; the fetch keeps running for everyone else, including when the first caller
//!   gives up.
//! - The in-flight record is removed *before* the outcome is delivered, so a fetch started
//!   from a joiner's continuation is a fresh, independent fetch.
//! - A producer that panics resolves every joiner with [`ProducerLost`] and frees the key.

mod coordinator;
mod flight;

pub use coordinator::FetchCoordinator;
pub use flight::{Flight, ProducerLost};
