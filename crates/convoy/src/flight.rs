// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::Shared;
use tokio::sync::oneshot;

/// The producer of a fetch panicked or was aborted before delivering an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the producer of this fetch terminated without an outcome")]
pub struct ProducerLost;

pub(crate) type SharedOutcome<T> = Shared<oneshot::Receiver<T>>;

/// Bookkeeping for one in-flight fetch.
#[derive(Debug)]
pub(crate) struct FlightState<T> {
    pub(crate) outcome: SharedOutcome<T>,
    pub(crate) joiners: AtomicU32,
}

impl<T: Clone> FlightState<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<T>) -> Self {
        Self {
            outcome: receiver.shared(),
            joiners: AtomicU32::new(0),
        }
    }
}

/// An observer of an in-flight fetch.
///
/// Resolves to the producer's outcome, or [`ProducerLost`] if the producer never delivered
/// one. Dropping a flight detaches it without affecting the fetch or other observers.
#[must_use = "a flight does nothing unless awaited"]
pub struct Flight<T> {
    outcome: SharedOutcome<T>,
    state: Arc<FlightState<T>>,
    coalesced: bool,
}

impl<T: Clone> Flight<T> {
    pub(crate) fn attach(state: &Arc<FlightState<T>>, coalesced: bool) -> Self {
        state.joiners.fetch_add(1, Ordering::AcqRel);
        Self {
            outcome: state.outcome.clone(),
            state: Arc::clone(state),
            coalesced,
        }
    }

    /// Returns `true` if this flight joined a fetch started by another caller.
    #[must_use]
    pub fn is_coalesced(&self) -> bool {
        self.coalesced
    }
}

impl<T: Clone> Future for Flight<T> {
    type Output = Result<T, ProducerLost>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.outcome
            .poll_unpin(cx)
            .map(|outcome| outcome.map_err(|_closed| ProducerLost))
    }
}

impl<T> Drop for Flight<T> {
    fn drop(&mut self) {
        self.state.joiners.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<T> Debug for Flight<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flight")
            .field("coalesced", &self.coalesced)
            .field("joiners", &self.state.joiners.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
