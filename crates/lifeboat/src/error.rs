// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use airbag::{CircuitOpenError, NetworkErrorKind};
use outbox::QueueExhaustedError;

/// An error from a [`Lifeboat`][crate::Lifeboat] read or write.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A cache-only read found no usable value.
    ///
    /// Distinguishes "there is no data" from "the data could not be fetched".
    #[error("no cached value for the requested resource")]
    NotFound,

    /// The remote operation failed and no fallback applied.
    #[error(transparent)]
    Network(#[from] NetworkErrorKind),

    /// The endpoint's circuit is open and no fallback applied.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// A queued mutation failed for good.
    #[error(transparent)]
    QueueExhausted(#[from] QueueExhaustedError),

    /// The cache could not store or remove a value.
    #[error("cache operation failed")]
    Cache(#[from] strata::Error),

    /// The offline queue could not persist or settle a mutation.
    #[error("offline queue operation failed")]
    Queue(#[from] outbox::Error),

    /// The task running a shared fetch went away before producing a result.
    #[error("the fetch was abandoned before it produced a result")]
    FetchAbandoned,

    /// Options could not be parsed.
    #[error("invalid configuration")]
    Config(#[from] serde_json::Error),
}

/// A specialized [`Result`][std::result::Result] for [`Lifeboat`][crate::Lifeboat] operations.
pub type Result<T> = std::result::Result<T, Error>;
