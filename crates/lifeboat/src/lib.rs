// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Resilient, tiered data access for clients on unreliable networks.
//!
//! A [`Lifeboat`] sits between application code and a remote data source. Reads go through a
//! two-tier cache ([`strata`]), concurrent misses share a single fetch ([`convoy`]), fetches are
//! retried with backoff and gated by per-endpoint circuit breakers ([`airbag`]), and writes
//! made while offline are queued durably and replayed once connectivity returns ([`outbox`]).
//!
//! # Reads
//!
//! Every read names a [`CachePolicy`]:
//!
//! | Policy | Behavior |
//! |---|---|
//! | [`CacheOnly`][CachePolicy::CacheOnly] | Cache or [`Error::NotFound`]. |
//! | [`NetworkOnly`][CachePolicy::NetworkOnly] | Always fetch. |
//! | [`CacheFirst`][CachePolicy::CacheFirst] | Cache, fetch on a miss. |
//! | [`NetworkFirst`][CachePolicy::NetworkFirst] | Fetch, fall back to the cache when the network is down. |
//! | [`StaleWhileRevalidate`][CachePolicy::StaleWhileRevalidate] | Recent cache value now, refresh in the background. |
//!
//! Falling back to cached data only happens for failures that retrying could have fixed
//! (timeouts, lost connections, retryable server errors) and for open circuits. An
//! unauthorized or malformed response is always surfaced, never masked by stale data.
//!
//! # Writes
//!
//! [`Lifeboat::mutate`] applies a write to the cache optimistically, sends it right away when
//! the device is online and otherwise queues it. The caller learns whether the write was
//! [applied][MutationOutcome::Applied] or [queued][MutationOutcome::Queued]; a queued write that
//! eventually fails for good is reported as [`Event::MutationFailed`].
//!
//! # Example
//!
//! ```
//! use airbag::NetworkErrorKind;
//! use bytes::Bytes;
//! use lifeboat::{CachePolicy, Lifeboat, MutationRequest, ReadRequest};
//! use outbox::{Connectivity, ConnectivitySignal};
//! use stowage::MemoryStore;
//! use sundial::Clock;
//!
//! # async fn example() -> Result<(), lifeboat::Error> {
//! let connectivity = ConnectivitySignal::new(Connectivity::Connected);
//! let transport = |endpoint: &str, payload: Bytes| {
//!     // Hand the payload to the HTTP client here.
//!     let _ = (endpoint.to_owned(), payload);
//!     async { Ok::<(), NetworkErrorKind>(()) }
//! };
//!
//! let lifeboat: Lifeboat<String, _, _> =
//!     Lifeboat::builder(Clock::new_system(), MemoryStore::new(), transport, connectivity.clone())
//!         .build()
//!         .await?;
//!
//! let request = ReadRequest::new("api.example.com", "post:42");
//! let post = lifeboat
//!     .get(&request, CachePolicy::CacheFirst, || async {
//!         Ok::<_, NetworkErrorKind>("hello".to_owned())
//!     })
//!     .await?;
//! assert_eq!(post.value(), "hello");
//!
//! lifeboat
//!     .mutate(
//!         MutationRequest::new("api.example.com", r#"{"liked":true}"#)
//!             .dedupe_key("like:42")
//!             .optimistic(request.key(), "hello (liked)".to_owned()),
//!     )
//!     .await?;
//!
//! lifeboat.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Logging
//!
//! The crate emits [`tracing`] events (`lifeboat.read`, `lifeboat.fallback`, `lifeboat.mutate`,
//! ...) and never installs a subscriber.

mod builder;
mod error;
mod event;
mod options;
mod orchestrator;
mod read;
mod request;
mod transport;
mod write;

pub use builder::LifeboatBuilder;
pub use error::{Error, Result};
pub use event::Event;
pub use options::LifeboatOptions;
pub use orchestrator::Lifeboat;
pub use request::{CachePolicy, MutationOutcome, MutationRequest, ReadRequest, Response, Source};
pub use transport::Transport;
