// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeSet;

use crate::{Classification, Classify, Outcome};

/// The failure reported by a remote operation.
///
/// Transport implementations map their own errors onto these kinds; everything above the
/// transport (retry, circuit breaking, stale fallback) only ever looks at the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum NetworkErrorKind {
    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The connection dropped or could not be established.
    #[error("connection lost")]
    ConnectionLost,

    /// The server answered with an error status.
    #[error("server error with status {0}")]
    ServerError(u16),

    /// The caller is not authorized to perform the request.
    #[error("unauthorized")]
    Unauthorized,

    /// The request or the response could not be understood.
    #[error("malformed request or response")]
    Malformed,
}

impl NetworkErrorKind {
    /// Returns `true` for kinds that prove the endpoint is reachable and healthy even though
    /// the request failed.
    ///
    /// A circuit breaker records these as neutral observations.
    #[must_use]
    pub const fn is_endpoint_healthy(self) -> bool {
        matches!(self, Self::Unauthorized | Self::Malformed)
    }
}

impl Classify for NetworkErrorKind {
    fn classify(&self) -> Classification {
        RetryableStatuses::default().classify(*self)
    }
}

/// The set of server status codes that are worth retrying.
///
/// Defaults to `{408, 425, 429, 500, 502, 503, 504}`. Timeouts and lost connections are always
/// retryable and authorization or validation failures never are, regardless of this set.
///
/// # Examples
///
/// ```
/// use airbag::{Classification, NetworkErrorKind, RetryableStatuses};
///
/// let statuses = RetryableStatuses::default();
/// assert_eq!(statuses.classify(NetworkErrorKind::ServerError(503)), Classification::Retryable);
/// assert_eq!(statuses.classify(NetworkErrorKind::ServerError(501)), Classification::Terminal);
///
/// let statuses = statuses.with_status(501);
/// assert_eq!(statuses.classify(NetworkErrorKind::ServerError(501)), Classification::Retryable);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryableStatuses {
    codes: BTreeSet<u16>,
}

impl Default for RetryableStatuses {
    fn default() -> Self {
        Self::from_codes([408, 425, 429, 500, 502, 503, 504])
    }
}

impl RetryableStatuses {
    /// Creates a set containing exactly `codes`.
    pub fn from_codes(codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            codes: codes.into_iter().collect(),
        }
    }

    /// Adds `code` to the set.
    #[must_use]
    pub fn with_status(mut self, code: u16) -> Self {
        self.codes.insert(code);
        self
    }

    /// Returns `true` if `code` is retryable.
    #[must_use]
    pub fn contains(&self, code: u16) -> bool {
        self.codes.contains(&code)
    }

    /// Iterates over the codes in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.codes.iter().copied()
    }

    /// Classifies a network failure for the retry executor.
    #[must_use]
    pub fn classify(&self, kind: NetworkErrorKind) -> Classification {
        match kind {
            NetworkErrorKind::Timeout | NetworkErrorKind::ConnectionLost => Classification::Retryable,
            NetworkErrorKind::ServerError(code) if self.contains(code) => Classification::Retryable,
            NetworkErrorKind::ServerError(_) | NetworkErrorKind::Unauthorized | NetworkErrorKind::Malformed => {
                Classification::Terminal
            }
        }
    }

    /// Maps a network failure to a circuit breaker observation.
    ///
    /// Authorization and validation failures are neutral, and so are client errors (status
    /// below 500) outside the retryable set. Everything else counts against the endpoint.
    #[must_use]
    pub fn outcome(&self, kind: NetworkErrorKind) -> Outcome {
        match kind {
            _ if kind.is_endpoint_healthy() => Outcome::Neutral,
            NetworkErrorKind::ServerError(code) if code < 500 && !self.contains(code) => Outcome::Neutral,
            _ => Outcome::Failure,
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(NetworkErrorKind::Timeout, Classification::Retryable)]
    #[case(NetworkErrorKind::ConnectionLost, Classification::Retryable)]
    #[case(NetworkErrorKind::ServerError(408), Classification::Retryable)]
    #[case(NetworkErrorKind::ServerError(425), Classification::Retryable)]
    #[case(NetworkErrorKind::ServerError(429), Classification::Retryable)]
    #[case(NetworkErrorKind::ServerError(500), Classification::Retryable)]
    #[case(NetworkErrorKind::ServerError(503), Classification::Retryable)]
    #[case(NetworkErrorKind::ServerError(404), Classification::Terminal)]
    #[case(NetworkErrorKind::ServerError(501), Classification::Terminal)]
    #[case(NetworkErrorKind::Unauthorized, Classification::Terminal)]
    #[case(NetworkErrorKind::Malformed, Classification::Terminal)]
    fn default_classification(#[case] kind: NetworkErrorKind, #[case] expected: Classification) {
        assert_eq!(kind.classify(), expected);
    }

    #[test]
    fn custom_set_replaces_defaults() {
        let statuses = RetryableStatuses::from_codes([599]);
        assert_eq!(statuses.classify(NetworkErrorKind::ServerError(503)), Classification::Terminal);
        assert_eq!(statuses.classify(NetworkErrorKind::ServerError(599)), Classification::Retryable);
        assert_eq!(statuses.iter().collect::<Vec<_>>(), vec![599]);
    }

    #[test]
    fn breaker_outcome() {
        let statuses = RetryableStatuses::default();
        assert_eq!(statuses.outcome(NetworkErrorKind::Unauthorized), Outcome::Neutral);
        assert_eq!(statuses.outcome(NetworkErrorKind::Malformed), Outcome::Neutral);
        assert_eq!(statuses.outcome(NetworkErrorKind::ServerError(404)), Outcome::Neutral);
        assert_eq!(statuses.outcome(NetworkErrorKind::ServerError(429)), Outcome::Failure);
        assert_eq!(statuses.outcome(NetworkErrorKind::ServerError(501)), Outcome::Failure);
        assert_eq!(statuses.outcome(NetworkErrorKind::Timeout), Outcome::Failure);
    }

    #[test]
    fn display() {
        assert_eq!(NetworkErrorKind::ServerError(503).to_string(), "server error with status 503");
        assert_eq!(NetworkErrorKind::Timeout.to_string(), "request timed out");
    }
}
