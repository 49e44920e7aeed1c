// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use airbag::Backoff;
use bytes::Bytes;
use parking_lot::Mutex;
use stowage::DurableStore;
use sundial::{Clock, Timestamp};
use tokio::sync::{Notify, broadcast};
use uuid::Uuid;

use crate::mutation::OrderKey;
use crate::{Error, FailureCause, Mutation, QueueExhaustedError, QueuedMutation, Result};

const EVENT_CAPACITY: usize = 256;

/// Limits and schedule of an [`OfflineQueue`].
///
/// Defaults: 8 attempts per mutation, exponential backoff from 1 second up to 5 minutes and
/// batches of 16 mutations per replay round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfflineQueueOptions {
    max_attempts: u32,
    backoff: Backoff,
    batch_size: usize,
}

impl Default for OfflineQueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff: Backoff::exponential(Duration::from_secs(1), Duration::from_secs(300)),
            batch_size: 16,
        }
    }
}

impl OfflineQueueOptions {
    /// Sets how many attempts a mutation gets before it fails for good.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the delay schedule between attempts.
    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets how many mutations are taken per replay round.
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Returns the attempt limit.
    #[must_use]
    pub const fn get_max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay schedule.
    #[must_use]
    pub const fn get_backoff(&self) -> Backoff {
        self.backoff
    }

    /// Returns the batch size.
    #[must_use]
    pub const fn get_batch_size(&self) -> usize {
        self.batch_size
    }
}

/// What happened to a mutation after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NackOutcome {
    /// The mutation stays queued and becomes ready again at `retry_at`.
    Rescheduled {
        /// Number of failed attempts so far.
        attempt: u32,
        /// When the mutation becomes ready again.
        retry_at: Timestamp,
    },

    /// The mutation ran out of attempts and was removed.
    Exhausted(QueueExhaustedError),
}

/// A change to the queue, broadcast to [`OfflineQueue::subscribe`]rs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QueueEvent {
    /// A mutation was persisted. `superseded` lists pending mutations it replaced.
    Queued {
        /// The new mutation.
        id: Uuid,
        /// Mutations removed because they shared the dedupe key.
        superseded: Vec<Uuid>,
    },

    /// A mutation was confirmed by the server and removed.
    Acked {
        /// The acknowledged mutation.
        id: Uuid,
    },

    /// A failed mutation was scheduled for another attempt.
    Rescheduled {
        /// The mutation.
        id: Uuid,
        /// Number of failed attempts so far.
        attempt: u32,
        /// When the mutation becomes ready again.
        retry_at: Timestamp,
    },

    /// A mutation failed for good and was removed.
    Failed(QueueExhaustedError),
}

/// A durable queue of mutations waiting to be sent.
///
/// Every mutation is written to the durable store before [`enqueue`][Self::enqueue] returns;
/// the in-memory state is only an index over the store and is rebuilt by
/// [`open`][Self::open]. Mutations are handed out by [`dequeue_ready`][Self::dequeue_ready]
/// in `(priority desc, created_at asc)` order and stay in the queue until they are
/// [acknowledged][Self::ack], [failed][Self::fail] or exhaust their attempts through
/// [`nack`][Self::nack].
///
/// Clones share the same queue.
///
/// # Examples
///
/// ```
/// use outbox::{Mutation, OfflineQueue, OfflineQueueOptions};
/// use stowage::MemoryStore;
/// use sundial::Clock;
///
/// # futures::executor::block_on(async {
/// let store = MemoryStore::new();
/// let queue = OfflineQueue::open(store.clone(), Clock::new_system(), OfflineQueueOptions::default()).await?;
/// let id = queue.enqueue(Mutation::new("like post 42").dedupe_key("like:42")).await?;
///
/// // A fresh queue over the same store sees the pending mutation.
/// let reopened = OfflineQueue::open(store, Clock::new_system(), OfflineQueueOptions::default()).await?;
/// let ready = reopened.dequeue_ready(10);
/// assert_eq!(ready[0].id(), id);
///
/// reopened.ack(id).await?;
/// assert!(reopened.is_empty());
/// # Ok::<(), outbox::Error>(())
/// # }).unwrap();
/// ```
#[derive(Debug)]
pub struct OfflineQueue<S> {
    pub(crate) inner: Arc<Inner<S>>,
}

impl<S> Clone for OfflineQueue<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Inner<S> {
    store: S,
    pub(crate) clock: Clock,
    pub(crate) options: OfflineQueueOptions,
    state: Mutex<State>,
    events: broadcast::Sender<QueueEvent>,
    pub(crate) wakeup: Notify,
}

#[derive(Debug, Default)]
struct State {
    mutations: HashMap<Uuid, QueuedMutation>,
    order: BTreeMap<OrderKey, Uuid>,
    in_flight: HashSet<Uuid>,
    next_sequence: u64,
}

impl State {
    fn insert(&mut self, mutation: QueuedMutation) {
        self.order.insert(mutation.order_key(), mutation.id());
        self.next_sequence = self.next_sequence.max(mutation.sequence().saturating_add(1));
        self.mutations.insert(mutation.id(), mutation);
    }

    fn remove(&mut self, id: Uuid) -> Option<QueuedMutation> {
        let mutation = self.mutations.remove(&id)?;
        self.order.remove(&mutation.order_key());
        self.in_flight.remove(&id);
        Some(mutation)
    }

    /// Pending mutations sharing `dedupe_key` that have not been handed out.
    fn replaceable(&self, dedupe_key: &str) -> Vec<Uuid> {
        self.mutations
            .values()
            .filter(|m| m.dedupe_key() == Some(dedupe_key) && !self.in_flight.contains(&m.id()))
            .map(QueuedMutation::id)
            .collect()
    }

    /// Removes every mutation that a newer one with the same dedupe key replaces.
    fn collapse_duplicates(&mut self) -> Vec<Uuid> {
        let mut newest: HashMap<&str, &QueuedMutation> = HashMap::new();
        let mut superseded = Vec::new();

        for mutation in self.mutations.values() {
            let Some(key) = mutation.dedupe_key() else { continue };
            match newest.get(key) {
                Some(current) if current.sequence() > mutation.sequence() => superseded.push(mutation.id()),
                Some(current) => {
                    superseded.push(current.id());
                    newest.insert(key, mutation);
                }
                None => {
                    newest.insert(key, mutation);
                }
            }
        }

        for id in &superseded {
            self.remove(*id);
        }
        superseded
    }
}

impl<S: DurableStore> OfflineQueue<S> {
    /// Opens the queue, loading every mutation persisted in `store`.
    ///
    /// Records that cannot be decoded are deleted and logged. If several records share a
    /// dedupe key only the newest one is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or a record cannot be deleted.
    pub async fn open(store: S, clock: Clock, options: OfflineQueueOptions) -> Result<Self> {
        let mut state = State::default();
        let mut corrupt = Vec::new();

        for (key, bytes) in store.read_all().await? {
            match serde_json::from_slice::<QueuedMutation>(&bytes) {
                Ok(mutation) if mutation.id().to_string() == key => state.insert(mutation),
                Ok(_) => corrupt.push((key, "record id does not match its key".to_owned())),
                Err(error) => corrupt.push((key, error.to_string())),
            }
        }

        let superseded = state.collapse_duplicates();

        for (key, reason) in corrupt {
            tracing::event!(
                name: "outbox.storage",
                tracing::Level::ERROR,
                queue.key = %key,
                error = %reason,
                "discarding unreadable queue record",
            );
            store.delete(&key).await?;
        }
        for id in superseded {
            store.delete(&id.to_string()).await?;
        }

        tracing::event!(
            name: "outbox.open",
            tracing::Level::DEBUG,
            queue.pending = state.mutations.len(),
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                clock,
                options,
                state: Mutex::new(state),
                events,
                wakeup: Notify::new(),
            }),
        })
    }

    /// Persists `mutation` and returns its id.
    ///
    /// Pending mutations with the same dedupe key that have not been handed out yet are
    /// replaced: the new payload wins and the old records are deleted. A mutation that is
    /// currently being sent is never replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the mutation cannot be written; the queue is unchanged in that case.
    pub async fn enqueue(&self, mutation: Mutation) -> Result<Uuid> {
        let now = self.inner.clock.now();
        let queued = {
            let mut state = self.inner.state.lock();
            let sequence = state.next_sequence;
            state.next_sequence = sequence.saturating_add(1);
            mutation.into_queued(Uuid::new_v4(), now, sequence)
        };
        let id = queued.id();

        self.persist(&queued).await?;

        let superseded = {
            let mut state = self.inner.state.lock();
            let replaced = queued.dedupe_key().map(|key| state.replaceable(key)).unwrap_or_default();
            for old in &replaced {
                state.remove(*old);
            }
            state.insert(queued);
            replaced
        };

        for old in &superseded {
            // A leftover record is collapsed on the next open.
            if let Err(error) = self.inner.store.delete(&old.to_string()).await {
                tracing::event!(
                    name: "outbox.storage",
                    tracing::Level::ERROR,
                    queue.mutation = %old,
                    error = %error,
                    "failed to delete superseded mutation",
                );
            }
        }

        tracing::event!(
            name: "outbox.enqueue",
            tracing::Level::DEBUG,
            queue.mutation = %id,
            queue.superseded = superseded.len(),
        );
        self.emit(QueueEvent::Queued { id, superseded });
        self.inner.wakeup.notify_one();
        Ok(id)
    }

    /// Hands out up to `limit` mutations that are ready to be sent.
    ///
    /// Returned mutations are marked in flight and are not handed out again until they are
    /// nacked or released. A mutation is skipped while another mutation with the same dedupe
    /// key is in flight, and while its retry time lies in the future.
    pub fn dequeue_ready(&self, limit: usize) -> Vec<QueuedMutation> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();

        let mut busy: HashSet<&str> = state
            .in_flight
            .iter()
            .filter_map(|id| state.mutations.get(id)?.dedupe_key())
            .collect();

        let mut ready = Vec::new();
        for id in state.order.values() {
            if ready.len() >= limit {
                break;
            }
            if state.in_flight.contains(id) {
                continue;
            }
            let Some(mutation) = state.mutations.get(id) else { continue };
            if mutation.not_before() > now {
                continue;
            }
            if mutation.dedupe_key().is_some_and(|key| !busy.insert(key)) {
                continue;
            }
            ready.push(mutation.clone());
        }
        drop(busy);

        state.in_flight.extend(ready.iter().map(QueuedMutation::id));
        ready
    }

    /// Removes a mutation the server confirmed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMutation`] if the id is not queued, or a storage error if the
    /// record cannot be deleted (the mutation then stays queued).
    pub async fn ack(&self, id: Uuid) -> Result<()> {
        self.require(id)?;
        self.inner.store.delete(&id.to_string()).await?;
        self.inner.state.lock().remove(id);

        tracing::event!(name: "outbox.ack", tracing::Level::DEBUG, queue.mutation = %id);
        self.emit(QueueEvent::Acked { id });
        Ok(())
    }

    /// Records a failed attempt.
    ///
    /// The mutation is rescheduled with the configured backoff, or removed and reported as
    /// exhausted once it has used every attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMutation`] if the id is not queued, or a storage error if the
    /// updated record cannot be written.
    pub async fn nack(&self, id: Uuid) -> Result<NackOutcome> {
        let current = self.require(id)?;
        let attempt = current.attempt().saturating_add(1);

        if attempt >= self.inner.options.max_attempts {
            let error = QueueExhaustedError::new(&current, attempt, FailureCause::AttemptsExhausted);
            self.remove_failed(&error).await?;
            return Ok(NackOutcome::Exhausted(error));
        }

        let delay = self.inner.options.backoff.delay_for(current.attempt());
        let retry_at = self.inner.clock.now().saturating_add(delay);
        let updated = current.rescheduled(attempt, retry_at);
        self.persist(&updated).await?;

        {
            let mut state = self.inner.state.lock();
            if state.mutations.contains_key(&id) {
                state.in_flight.remove(&id);
                state.mutations.insert(id, updated);
            }
        }

        tracing::event!(
            name: "outbox.nack",
            tracing::Level::WARN,
            queue.mutation = %id,
            resilience.attempt.index = attempt,
            resilience.retry.delay = delay.as_secs_f32(),
            "mutation failed, rescheduled",
        );
        self.emit(QueueEvent::Rescheduled { id, attempt, retry_at });
        self.inner.wakeup.notify_one();
        Ok(NackOutcome::Rescheduled { attempt, retry_at })
    }

    /// Removes a mutation the server rejected for good and reports it as failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMutation`] if the id is not queued, or a storage error if the
    /// record cannot be deleted.
    pub async fn fail(&self, id: Uuid) -> Result<QueueExhaustedError> {
        let current = self.require(id)?;
        let error = QueueExhaustedError::new(&current, current.attempt().saturating_add(1), FailureCause::Rejected);
        self.remove_failed(&error).await?;
        Ok(error)
    }

    /// Puts an in-flight mutation back without counting an attempt.
    ///
    /// Returns `false` if the mutation was not in flight.
    pub fn release(&self, id: Uuid) -> bool {
        let released = self.inner.state.lock().in_flight.remove(&id);
        if released {
            self.inner.wakeup.notify_one();
        }
        released
    }

    async fn remove_failed(&self, error: &QueueExhaustedError) -> Result<()> {
        self.inner.store.delete(&error.id().to_string()).await?;
        self.inner.state.lock().remove(error.id());

        tracing::event!(
            name: "outbox.failed",
            tracing::Level::ERROR,
            queue.mutation = %error.id(),
            queue.endpoint = error.endpoint(),
            resilience.attempt.index = error.attempts(),
            error = %error,
            "mutation removed from the queue",
        );
        self.emit(QueueEvent::Failed(error.clone()));
        Ok(())
    }

    async fn persist(&self, mutation: &QueuedMutation) -> Result<()> {
        let bytes = Bytes::from(serde_json::to_vec(mutation)?);
        self.inner.store.write(&mutation.id().to_string(), bytes).await?;
        Ok(())
    }

    fn require(&self, id: Uuid) -> Result<QueuedMutation> {
        self.inner.state.lock().mutations.get(&id).cloned().ok_or(Error::UnknownMutation(id))
    }
}

impl<S> OfflineQueue<S> {
    /// Returns the mutation with `id`, if queued.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<QueuedMutation> {
        self.inner.state.lock().mutations.get(&id).cloned()
    }

    /// Returns every queued mutation in replay order, including those in flight.
    #[must_use]
    pub fn pending(&self) -> Vec<QueuedMutation> {
        let state = self.inner.state.lock();
        state.order.values().filter_map(|id| state.mutations.get(id).cloned()).collect()
    }

    /// Returns the number of queued mutations, including those in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().mutations.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().mutations.is_empty()
    }

    /// Returns the number of mutations handed out and not yet settled.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    /// Returns the earliest retry time among mutations that are not in flight.
    #[must_use]
    pub fn next_ready_at(&self) -> Option<Timestamp> {
        let state = self.inner.state.lock();
        state
            .mutations
            .values()
            .filter(|m| !state.in_flight.contains(&m.id()))
            .map(QueuedMutation::not_before)
            .min()
    }

    /// Subscribes to queue events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> &OfflineQueueOptions {
        &self.inner.options
    }

    fn emit(&self, event: QueueEvent) {
        // Events are advisory; nobody listening is fine.
        let _ = self.inner.events.send(event);
    }
}
