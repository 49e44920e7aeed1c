// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Retries and circuit breaking for calls to remote endpoints.
//!
//! The crate provides the two resilience layers that sit between an application and a flaky
//! network:
//!
//! - [`RetryExecutor`] runs an operation again after transient failures, waiting according to
//!   a [`RetryPolicy`] (fixed, exponential or exponential with jitter). A classifier decides
//!   which failures are [`Classification::Retryable`].
//! - [`CircuitBreaker`] stops calling an endpoint that keeps failing and probes it again after
//!   a cool-down. [`CircuitBreakers`] keeps one breaker per endpoint.
//!
//! Both take a [`sundial::Clock`], so their timing can be driven deterministically in tests.
//!
//! # Putting the layers together
//!
//! The breaker observes the outcome of the whole retry sequence, so one logical call counts
//! as one success or failure:
//!
//! ```
//! use std::time::Duration;
//!
//! use airbag::{BreakerOptions, CircuitBreakers, NetworkErrorKind, RetryExecutor, RetryPolicy, RetryableStatuses};
//! use sundial::ClockControl;
//!
//! # futures::executor::block_on(async {
//! let clock = ClockControl::new().auto_advance_timers(true).to_clock();
//! let statuses = RetryableStatuses::default();
//! let retry = RetryExecutor::new(
//!     clock.clone(),
//!     RetryPolicy::Fixed {
//!         delay: Duration::from_millis(100),
//!         max_attempts: 3,
//!     },
//! );
//! let breakers = CircuitBreakers::new(clock, BreakerOptions::default());
//!
//! let result = breakers
//!     .get("api.example.com")
//!     .execute(
//!         |error| statuses.outcome(*error),
//!         || retry.execute(|| async { Ok::<_, NetworkErrorKind>("payload") }, |error| statuses.classify(*error)),
//!     )
//!     .await;
//!
//! assert_eq!(result.ok(), Some("payload"));
//! # });
//! ```
//!
//! # Telemetry
//!
//! Retries are logged as `airbag.retry` events at `WARN`. Circuit transitions are logged as
//! `airbag.circuit` events, at `WARN` when a circuit opens and at `INFO` otherwise.

mod backoff;
mod breaker;
mod cancellation;
mod classify;
mod error;
mod network;
mod policy;
mod registry;
mod retry;
mod rnd;

pub use backoff::Backoff;
pub use breaker::{BreakerOptions, CircuitBreaker, CircuitSnapshot, CircuitState, CircuitTransition, Outcome, Permit};
pub use cancellation::Cancellation;
pub use classify::{Classification, Classify};
pub use error::{BreakerError, CircuitOpenError, RetryError};
pub use network::{NetworkErrorKind, RetryableStatuses};
pub use policy::RetryPolicy;
pub use registry::CircuitBreakers;
pub use retry::{RetryExecutor, RetryNotice};
