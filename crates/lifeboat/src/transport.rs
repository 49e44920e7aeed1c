// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use airbag::{BreakerError, CircuitBreakers, Classification, Classify, NetworkErrorKind, RetryableStatuses};
use bytes::Bytes;
use outbox::{MutationSender, QueuedMutation};

/// Sends mutation payloads to an endpoint.
///
/// The transport is the only piece of the write path that touches the network. It reports
/// failures as [`NetworkErrorKind`]s so the caller can decide between retrying, queueing and
/// giving up.
///
/// Any `Fn(&str, Bytes) -> impl Future<Output = Result<(), NetworkErrorKind>>` closure is a
/// transport.
pub trait Transport: Send + Sync {
    /// Sends `payload` to `endpoint`.
    fn send(&self, endpoint: &str, payload: Bytes) -> impl Future<Output = Result<(), NetworkErrorKind>> + Send;
}

impl<F, Fut> Transport for F
where
    F: Fn(&str, Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), NetworkErrorKind>> + Send,
{
    fn send(&self, endpoint: &str, payload: Bytes) -> impl Future<Output = Result<(), NetworkErrorKind>> + Send {
        self(endpoint, payload)
    }
}

/// Replays queued mutations through the endpoint's circuit breaker.
#[derive(Debug)]
pub(crate) struct QueueSender<T> {
    transport: Arc<T>,
    breakers: CircuitBreakers,
    statuses: RetryableStatuses,
}

impl<T> QueueSender<T> {
    pub(crate) const fn new(transport: Arc<T>, breakers: CircuitBreakers, statuses: RetryableStatuses) -> Self {
        Self {
            transport,
            breakers,
            statuses,
        }
    }
}

impl<T: Transport> MutationSender for QueueSender<T> {
    type Error = SendFailure;

    async fn send(&self, mutation: &QueuedMutation) -> Result<(), SendFailure> {
        let Some(endpoint) = mutation.endpoint() else {
            // Nothing to route to; retrying cannot help.
            return Err(SendFailure::new(BreakerError::Inner(NetworkErrorKind::Malformed), &self.statuses));
        };

        let breaker = self.breakers.get(endpoint);
        let payload = mutation.payload().clone();

        breaker
            .execute(
                |kind: &NetworkErrorKind| self.statuses.outcome(*kind),
                || self.transport.send(endpoint, payload),
            )
            .await
            .map_err(|error| SendFailure::new(error, &self.statuses))
    }
}

/// A failed replay, classified with the configured retryable statuses.
///
/// An open circuit is retryable: the mutation waits for the endpoint to recover.
#[derive(Debug)]
pub(crate) struct SendFailure {
    error: BreakerError<NetworkErrorKind>,
    classification: Classification,
}

impl SendFailure {
    fn new(error: BreakerError<NetworkErrorKind>, statuses: &RetryableStatuses) -> Self {
        let classification = match &error {
            BreakerError::Open(_) => Classification::Retryable,
            BreakerError::Inner(kind) => statuses.classify(*kind),
        };
        Self { error, classification }
    }
}

impl Display for SendFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.error, f)
    }
}

impl Classify for SendFailure {
    fn classify(&self) -> Classification {
        self.classification
    }
}
