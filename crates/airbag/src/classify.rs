// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// Whether a failure warrants another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// The failure is transient; trying again may succeed.
    Retryable,

    /// The failure is permanent; trying again would produce the same result.
    Terminal,
}

impl Classification {
    /// Returns `true` for [`Classification::Retryable`].
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable)
    }
}

/// Types that know whether they represent a transient failure.
///
/// Errors implementing this trait can be handed to
/// [`RetryExecutor::execute`][crate::RetryExecutor::execute] through
/// [`Classify::classify`] directly:
///
/// ```
/// use airbag::{Classification, Classify};
///
/// #[derive(Debug)]
/// struct Busy;
///
/// impl Classify for Busy {
///     fn classify(&self) -> Classification {
///         Classification::Retryable
///     }
/// }
///
/// assert!(Busy.classify().is_retryable());
/// ```
pub trait Classify {
    /// Returns the classification of this failure.
    fn classify(&self) -> Classification;
}
