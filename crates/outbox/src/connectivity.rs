// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use tokio::sync::watch;

/// Whether the device can reach the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Connectivity {
    /// The network is reachable.
    Connected,
    /// The network is unreachable.
    #[default]
    Disconnected,
}

impl Connectivity {
    /// Returns `true` for [`Connectivity::Connected`].
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Publishes connectivity changes reported by the platform.
///
/// The queue does not detect link state on its own; whoever owns the platform integration
/// calls [`set`][Self::set] and every subscriber sees the latest value. Clones publish to the
/// same subscribers.
///
/// # Examples
///
/// ```
/// use outbox::{Connectivity, ConnectivitySignal};
///
/// let signal = ConnectivitySignal::new(Connectivity::Disconnected);
/// let receiver = signal.subscribe();
///
/// signal.set(Connectivity::Connected);
/// assert_eq!(*receiver.borrow(), Connectivity::Connected);
/// ```
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    sender: Arc<watch::Sender<Connectivity>>,
}

impl ConnectivitySignal {
    /// Creates a signal starting at `initial`.
    #[must_use]
    pub fn new(initial: Connectivity) -> Self {
        Self {
            sender: Arc::new(watch::Sender::new(initial)),
        }
    }

    /// Publishes `connectivity`. Subscribers are only woken if the value changed.
    pub fn set(&self, connectivity: Connectivity) {
        self.sender.send_if_modified(|current| {
            let changed = *current != connectivity;
            *current = connectivity;
            changed
        });
    }

    /// Returns the latest value.
    #[must_use]
    pub fn current(&self) -> Connectivity {
        *self.sender.borrow()
    }

    /// Returns a receiver that observes every change from now on.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.sender.subscribe()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(ConnectivitySignal: Send, Sync, Clone);

    #[test]
    fn repeated_values_do_not_notify() {
        let signal = ConnectivitySignal::new(Connectivity::Disconnected);
        let mut receiver = signal.subscribe();

        signal.set(Connectivity::Disconnected);
        assert!(!receiver.has_changed().unwrap());

        signal.clone().set(Connectivity::Connected);
        assert!(receiver.has_changed().unwrap());
        assert_eq!(*receiver.borrow_and_update(), Connectivity::Connected);
        assert!(signal.current().is_connected());
    }
}
