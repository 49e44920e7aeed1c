// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A scripted transport, a scripted origin and a harness that wires them into a [`Lifeboat`].

// Each test binary uses a different subset of the helpers.
#![allow(dead_code, reason = "shared between test binaries")]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use airbag::{NetworkErrorKind, RetryPolicy};
use bytes::Bytes;
use futures::future::BoxFuture;
use lifeboat::{Lifeboat, LifeboatOptions, Transport};
use outbox::{Connectivity, ConnectivitySignal};
use parking_lot::Mutex;
use stowage::MemoryStore;
use sundial::ClockControl;
use tokio::sync::{Semaphore, broadcast};

pub type TestLifeboat = Lifeboat<String, MemoryStore, RecordingTransport>;

/// Records every payload it is asked to send and answers from a script.
///
/// Once the script runs out every send succeeds.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<(String, Bytes)>>>,
    responses: Arc<Mutex<VecDeque<Result<(), NetworkErrorKind>>>>,
}

impl RecordingTransport {
    pub fn respond_with(&self, responses: impl IntoIterator<Item = Result<(), NetworkErrorKind>>) {
        self.responses.lock().extend(responses);
    }

    pub fn sent(&self) -> Vec<(String, Bytes)> {
        self.sent.lock().clone()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, endpoint: &str, payload: Bytes) -> impl Future<Output = Result<(), NetworkErrorKind>> + Send {
        self.sent.lock().push((endpoint.to_owned(), payload));
        let response = self.responses.lock().pop_front().unwrap_or(Ok(()));
        std::future::ready(response)
    }
}

/// A remote data source answering reads from a script, optionally held back by a gate.
///
/// Once the script runs out every fetch returns `"fresh"`.
#[derive(Debug, Clone, Default)]
pub struct Origin {
    calls: Arc<AtomicU32>,
    responses: Arc<Mutex<VecDeque<Result<String, NetworkErrorKind>>>>,
    gate: Option<Arc<Semaphore>>,
}

impl Origin {
    pub fn new() -> Self {
        Self::default()
    }

    /// An origin whose fetches stay pending until [`release`][Self::release] is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn respond_with(&self, responses: impl IntoIterator<Item = Result<String, NetworkErrorKind>>) {
        self.responses.lock().extend(responses);
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.close();
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fetcher(&self) -> impl Fn() -> BoxFuture<'static, Result<String, NetworkErrorKind>> + Send + Sync + 'static {
        let origin = self.clone();
        move || {
            origin.calls.fetch_add(1, Ordering::SeqCst);
            let response = origin.responses.lock().pop_front().unwrap_or_else(|| Ok("fresh".to_owned()));
            let gate = origin.gate.clone();
            Box::pin(async move {
                if let Some(gate) = gate {
                    // A closed gate lets every waiter through.
                    let _ = gate.acquire().await;
                }
                response
            })
        }
    }
}

pub struct Harness {
    pub control: ClockControl,
    pub store: MemoryStore,
    pub connectivity: ConnectivitySignal,
    pub transport: RecordingTransport,
}

impl Harness {
    pub fn new(connectivity: Connectivity) -> Self {
        Self {
            control: ClockControl::new(),
            store: MemoryStore::new(),
            connectivity: ConnectivitySignal::new(connectivity),
            transport: RecordingTransport::default(),
        }
    }

    /// A harness whose clock jumps straight to the deadline of every delay.
    pub fn auto_advancing(connectivity: Connectivity) -> Self {
        Self {
            control: ClockControl::new().auto_advance_timers(true),
            ..Self::new(connectivity)
        }
    }

    pub async fn build(&self, options: LifeboatOptions) -> TestLifeboat {
        Lifeboat::builder(
            self.control.to_clock(),
            self.store.clone(),
            self.transport.clone(),
            self.connectivity.clone(),
        )
        .options(options)
        .build()
        .await
        .unwrap()
    }
}

/// Options without retries so every fetch is a single attempt.
pub fn single_attempt() -> LifeboatOptions {
    LifeboatOptions::default().retry(RetryPolicy::None)
}

/// Waits for the next item matching `predicate`, skipping the rest.
pub async fn next_matching<T: Clone>(receiver: &mut broadcast::Receiver<T>, predicate: impl Fn(&T) -> bool) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let item = receiver.recv().await.unwrap();
            if predicate(&item) {
                return item;
            }
        }
    })
    .await
    .unwrap()
}

/// Yields to other tasks until `condition` holds.
pub async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}
