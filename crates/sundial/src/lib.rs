// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! An injectable time source for code that must reason about expiry, backoff and timeouts.
//!
//! Everything in the workspace that needs "now" or "wait for a while" takes a [`Clock`]
//! instead of calling [`std::time::SystemTime::now`] or `tokio::time::sleep` directly. In
//! production the clock reads the wall clock; in tests it is driven by a [`ClockControl`]
//! so TTLs, circuit breaker timeouts and retry delays can be exercised without sleeping.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use sundial::Clock;
//!
//! # async fn example() {
//! let clock = Clock::new_system();
//! let started = clock.now();
//! clock.delay(Duration::from_millis(50)).await;
//! assert!(clock.now().saturating_duration_since(started) >= Duration::from_millis(50));
//! # }
//! ```
//!
//! # Monotonic absolute time
//!
//! [`Clock::now`] returns a [`Timestamp`] (milliseconds since the Unix epoch) so values can be
//! persisted and compared after a restart. The system clock never hands out a timestamp lower
//! than one it returned before; a wall clock that jumps backwards simply stalls until it
//! catches up. Expiry computations therefore never move backwards inside a process.
//!
//! # Testing
//!
//! With the `test-util` feature, [`ClockControl`] freezes time and lets the test advance it:
//!
//! ```
//! # #[cfg(feature = "test-util")]
//! # {
//! use std::time::Duration;
//! use sundial::ClockControl;
//!
//! let control = ClockControl::new();
//! let clock = control.to_clock();
//! let before = clock.now();
//!
//! control.advance(Duration::from_secs(30));
//! assert_eq!(clock.now().saturating_duration_since(before), Duration::from_secs(30));
//! # }
//! ```
//!
//! > **Important:** Never enable the `test-util` feature for production code. Only use it in
//! > your `dev-dependencies`.

mod clock;
#[cfg(any(feature = "test-util", test))]
mod clock_control;
mod delay;
mod stopwatch;
mod timestamp;

pub use clock::Clock;
#[cfg(any(feature = "test-util", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub use clock_control::ClockControl;
pub use delay::Delay;
pub use stopwatch::Stopwatch;
pub use timestamp::Timestamp;
