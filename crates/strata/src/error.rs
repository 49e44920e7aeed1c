// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache operations.

use std::time::Duration;

/// An error from a cache operation.
///
/// Cache misses are not errors; lookups return `None`. Errors only describe invalid input and
/// failures of the persistent tier.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A time-to-live of zero was supplied.
    #[error("invalid time-to-live {0:?}: must be greater than zero")]
    InvalidTtl(Duration),

    /// The durable store backing the persistent tier failed.
    #[error(transparent)]
    Storage(#[from] stowage::Error),

    /// A value could not be encoded or a stored record could not be decoded.
    #[error("cache record codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A specialized [`Result`] type for cache operations.
pub type Result<T> = std::result::Result<T, Error>;
