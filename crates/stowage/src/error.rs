// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for durable store operations.

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error from a durable store operation.
///
/// This is an opaque error type that can wrap any underlying error from a store
/// implementation. Use [`std::error::Error::source()`] to access the underlying
/// cause if needed.
///
/// # Example
///
/// ```
/// use stowage::Error;
///
/// let error = Error::from_message("disk full");
/// assert!(error.to_string().contains("disk full"));
/// ```
#[derive(Debug, thiserror::Error)]
#[error("durable store operation failed: {message}")]
pub struct Error {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    /// Creates an error that only carries a message.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error wrapping an underlying cause.
    pub fn caused_by(cause: impl Into<BoxError>) -> Self {
        let source = cause.into();
        Self {
            message: source.to_string(),
            source: Some(source),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::caused_by(error)
    }
}

/// A specialized [`Result`] type for durable store operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    static_assertions::assert_impl_all!(Error: Send, Sync, std::error::Error);

    #[test]
    fn message_only_has_no_source() {
        let error = Error::from_message("nope");
        assert_eq!(error.to_string(), "durable store operation failed: nope");
        assert!(error.source().is_none());
    }

    #[test]
    fn io_error_is_kept_as_source() {
        let error = Error::from(std::io::Error::other("broken pipe"));
        assert!(error.to_string().contains("broken pipe"));
        assert!(error.source().is_some());
    }
}
