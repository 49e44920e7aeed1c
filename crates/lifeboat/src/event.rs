// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use airbag::{CircuitState, CircuitTransition};
use outbox::{QueueEvent, QueueExhaustedError};
use strata::CacheKey;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Something observable that happened inside a [`Lifeboat`][crate::Lifeboat].
///
/// Events are delivered through [`Lifeboat::subscribe`][crate::Lifeboat::subscribe]. Nothing
/// depends on them being consumed; a subscriber that falls behind misses events.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Event {
    /// A read was answered from the cache.
    CacheHit {
        /// The key that was found.
        key: CacheKey,
    },

    /// A read found nothing usable in the cache.
    CacheMiss {
        /// The key that was looked up.
        key: CacheKey,
    },

    /// A read joined a fetch that was already in flight instead of starting one.
    FetchCoalesced {
        /// The key being fetched.
        key: CacheKey,
    },

    /// An endpoint's circuit opened.
    CircuitOpened {
        /// The endpoint.
        endpoint: Arc<str>,
    },

    /// An endpoint's circuit closed after recovering.
    CircuitClosed {
        /// The endpoint.
        endpoint: Arc<str>,
    },

    /// A fetch failed and is about to be retried.
    RetryAttempted {
        /// The endpoint being fetched from.
        endpoint: Arc<str>,
        /// 0-indexed number of the attempt that failed.
        attempt: u32,
        /// How long until the next attempt.
        delay: Duration,
    },

    /// A mutation was written to the offline queue.
    MutationQueued {
        /// The queued mutation.
        id: Uuid,
    },

    /// A queued mutation failed for good and was removed.
    MutationFailed(QueueExhaustedError),
}

impl Event {
    fn from_transition(transition: &CircuitTransition) -> Option<Self> {
        match transition.to {
            CircuitState::Open { .. } => Some(Self::CircuitOpened {
                endpoint: Arc::clone(&transition.endpoint),
            }),
            CircuitState::Closed => Some(Self::CircuitClosed {
                endpoint: Arc::clone(&transition.endpoint),
            }),
            CircuitState::HalfOpen => None,
        }
    }

    fn from_queue(event: QueueEvent) -> Option<Self> {
        match event {
            QueueEvent::Queued { id, .. } => Some(Self::MutationQueued { id }),
            QueueEvent::Failed(error) => Some(Self::MutationFailed(error)),
            _ => None,
        }
    }
}

/// Republishes circuit transitions and queue events as [`Event`]s until both sources close.
pub(crate) fn spawn_forwarder(
    mut transitions: broadcast::Receiver<CircuitTransition>,
    mut queue: broadcast::Receiver<QueueEvent>,
    events: broadcast::Sender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                transition = transitions.recv() => match transition {
                    Ok(transition) => Event::from_transition(&transition),
                    Err(RecvError::Lagged(skipped)) => {
                        lagged("circuit", skipped);
                        None
                    }
                    Err(RecvError::Closed) => break,
                },
                queued = queue.recv() => match queued {
                    Ok(event) => Event::from_queue(event),
                    Err(RecvError::Lagged(skipped)) => {
                        lagged("queue", skipped);
                        None
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            if let Some(event) = event {
                // No subscribers is fine.
                let _ = events.send(event);
            }
        }
    })
}

fn lagged(source: &'static str, skipped: u64) {
    tracing::event!(
        name: "lifeboat.events",
        tracing::Level::WARN,
        events.source = source,
        events.skipped = skipped,
        "event forwarder fell behind",
    );
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use sundial::Timestamp;

    use super::*;

    static_assertions::assert_impl_all!(Event: Send, Sync, Clone);

    // `CircuitTransition` is non-exhaustive, so take a real one from a breaker and reshape it.
    fn transition(from: CircuitState, to: CircuitState) -> CircuitTransition {
        let control = sundial::ClockControl::new();
        let breakers = airbag::CircuitBreakers::new(control.to_clock(), airbag::BreakerOptions::default().failure_threshold(1));
        let mut receiver = breakers.subscribe();
        breakers.get("api").enter().unwrap().record(airbag::Outcome::Failure);

        let mut transition = receiver.try_recv().unwrap();
        transition.from = from;
        transition.to = to;
        transition
    }

    #[test]
    fn opening_and_closing_map_to_events() {
        let opened = transition(
            CircuitState::Closed,
            CircuitState::Open {
                opened_at: Timestamp::UNIX_EPOCH,
            },
        );
        assert_eq!(
            Event::from_transition(&opened),
            Some(Event::CircuitOpened { endpoint: "api".into() })
        );

        let closed = transition(CircuitState::HalfOpen, CircuitState::Closed);
        assert_eq!(
            Event::from_transition(&closed),
            Some(Event::CircuitClosed { endpoint: "api".into() })
        );
    }

    #[test]
    fn half_open_is_not_reported() {
        let probing = transition(
            CircuitState::Open {
                opened_at: Timestamp::UNIX_EPOCH,
            },
            CircuitState::HalfOpen,
        );
        assert_eq!(Event::from_transition(&probing), None);
    }

    #[test]
    fn only_queued_and_failed_queue_events_are_forwarded() {
        let id = Uuid::new_v4();
        assert_eq!(
            Event::from_queue(QueueEvent::Queued {
                id,
                superseded: Vec::new()
            }),
            Some(Event::MutationQueued { id })
        );
        assert_eq!(Event::from_queue(QueueEvent::Acked { id }), None);
    }
}
