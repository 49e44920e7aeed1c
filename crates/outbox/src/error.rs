// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt::{Display, Formatter};

use uuid::Uuid;

/// An error from a queue operation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The durable store failed; the in-memory queue was left unchanged.
    #[error(transparent)]
    Storage(#[from] stowage::Error),

    /// A mutation record could not be encoded.
    #[error("queue record codec failure: {0}")]
    Codec(#[from] serde_json::Error),

    /// No pending mutation has this id.
    #[error("no queued mutation with id {0}")]
    UnknownMutation(Uuid),
}

/// A specialized [`Result`] type for queue operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a mutation left the queue without being acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// Every allowed attempt failed with a retryable error.
    AttemptsExhausted,

    /// The server rejected the mutation with a terminal error.
    Rejected,
}

impl Display for FailureCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AttemptsExhausted => f.write_str("ran out of retries"),
            Self::Rejected => f.write_str("was rejected"),
        }
    }
}

/// A queued mutation failed for good and was removed from the queue.
///
/// Failed mutations are never dropped silently: this error is returned from the call that
/// removed the mutation and broadcast as [`QueueEvent::Failed`][crate::QueueEvent::Failed].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mutation {id} {cause} after {attempts} attempt(s)")]
pub struct QueueExhaustedError {
    id: Uuid,
    attempts: u32,
    cause: FailureCause,
    dedupe_key: Option<String>,
    endpoint: Option<String>,
}

impl QueueExhaustedError {
    pub(crate) fn new(mutation: &crate::QueuedMutation, attempts: u32, cause: FailureCause) -> Self {
        Self {
            id: mutation.id(),
            attempts,
            cause,
            dedupe_key: mutation.dedupe_key().map(ToOwned::to_owned),
            endpoint: mutation.endpoint().map(ToOwned::to_owned),
        }
    }

    /// Returns the id of the failed mutation.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns how many times the mutation was attempted.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns why the mutation failed.
    #[must_use]
    pub const fn cause(&self) -> FailureCause {
        self.cause
    }

    /// Returns the mutation's dedupe key.
    #[must_use]
    pub fn dedupe_key(&self) -> Option<&str> {
        self.dedupe_key.as_deref()
    }

    /// Returns the endpoint the mutation targeted.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}
