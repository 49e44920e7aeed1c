// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use tokio::sync::watch;

/// A clonable signal that asks in-progress work to stop.
///
/// Every clone observes the same signal. Cancelling is permanent.
///
/// # Examples
///
/// ```
/// use airbag::Cancellation;
///
/// # futures::executor::block_on(async {
/// let token = Cancellation::new();
/// let observer = token.clone();
///
/// token.cancel();
/// observer.cancelled().await;
/// assert!(observer.is_cancelled());
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Cancellation {
    state: Arc<watch::Sender<bool>>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Cancels the token and wakes everyone waiting in [`cancelled`][Self::cancelled].
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    /// Returns `true` once [`cancel`][Self::cancel] has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Completes once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;

    static_assertions::assert_impl_all!(Cancellation: Send, Sync, Clone);

    #[test]
    fn pending_until_cancelled() {
        let token = Cancellation::new();
        let mut waiting = Box::pin(token.cancelled());

        assert!((&mut waiting).now_or_never().is_none());
        assert!(!token.is_cancelled());

        token.clone().cancel();
        assert!(token.is_cancelled());
        assert!(waiting.now_or_never().is_some());
    }

    #[test]
    fn cancel_is_idempotent() {
        let token = Cancellation::default();
        token.cancel();
        token.cancel();
        assert!(token.cancelled().now_or_never().is_some());
    }
}
