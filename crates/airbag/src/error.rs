// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use crate::{Classification, Classify};

/// A request was rejected because the endpoint's circuit is open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit for endpoint '{endpoint}' is open, retry after {retry_after:?}")]
pub struct CircuitOpenError {
    endpoint: Arc<str>,
    retry_after: Duration,
}

impl CircuitOpenError {
    pub(crate) fn new(endpoint: Arc<str>, retry_after: Duration) -> Self {
        Self { endpoint, retry_after }
    }

    /// Returns the endpoint whose circuit rejected the request.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns how long until the circuit lets a probe through.
    ///
    /// Zero when the circuit is half-open and every probe slot is taken.
    #[must_use]
    pub const fn retry_after(&self) -> Duration {
        self.retry_after
    }
}

/// The failure of an operation run by
/// [`RetryExecutor::execute_with_cancellation`][crate::RetryExecutor::execute_with_cancellation].
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The last attempt failed with this error.
    #[error(transparent)]
    Operation(E),

    /// The caller cancelled the operation.
    #[error("operation was cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// Returns the operation error, or `None` if the operation was cancelled.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(error) => Some(error),
            Self::Cancelled => None,
        }
    }
}

/// The failure of an operation run through [`CircuitBreaker::execute`][crate::CircuitBreaker::execute].
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The circuit rejected the call; the operation was not started.
    #[error(transparent)]
    Open(CircuitOpenError),

    /// The operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Returns the operation error, or `None` if the circuit rejected the call.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Open(_) => None,
            Self::Inner(error) => Some(error),
        }
    }
}

impl<E: Classify> Classify for BreakerError<E> {
    /// An open circuit is worth retrying later; an operation failure keeps its own classification.
    fn classify(&self) -> Classification {
        match self {
            Self::Open(_) => Classification::Retryable,
            Self::Inner(error) => error.classify(),
        }
    }
}

impl<E> From<CircuitOpenError> for BreakerError<E> {
    fn from(error: CircuitOpenError) -> Self {
        Self::Open(error)
    }
}
