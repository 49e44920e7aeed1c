// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::Reverse;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sundial::Timestamp;
use uuid::Uuid;

/// How urgently a mutation should be replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work that can wait.
    Low,
    /// The default.
    #[default]
    Normal,
    /// User-visible actions.
    High,
    /// Replayed before anything else.
    Critical,
}

/// A mutation to put on the queue.
///
/// # Examples
///
/// ```
/// use outbox::{Mutation, Priority};
///
/// let mutation = Mutation::new(&b"{\"liked\":true}"[..])
///     .priority(Priority::High)
///     .dedupe_key("like:42")
///     .endpoint("api.example.com");
///
/// assert_eq!(mutation.get_priority(), Priority::High);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    payload: Bytes,
    priority: Priority,
    dedupe_key: Option<String>,
    endpoint: Option<String>,
}

impl Mutation {
    /// Creates a normal-priority mutation carrying `payload`.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            priority: Priority::Normal,
            dedupe_key: None,
            endpoint: None,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the dedupe key. A newer pending mutation with the same key replaces an older one.
    #[must_use]
    pub fn dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    /// Sets the endpoint the mutation is sent to.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the priority.
    #[must_use]
    pub const fn get_priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn into_queued(self, id: Uuid, created_at: Timestamp, sequence: u64) -> QueuedMutation {
        QueuedMutation {
            id,
            priority: self.priority,
            payload: self.payload,
            dedupe_key: self.dedupe_key,
            endpoint: self.endpoint,
            created_at,
            attempt: 0,
            not_before: created_at,
            sequence,
        }
    }
}

/// A mutation owned by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMutation {
    id: Uuid,
    priority: Priority,
    #[serde(with = "hex_payload")]
    payload: Bytes,
    dedupe_key: Option<String>,
    endpoint: Option<String>,
    created_at: Timestamp,
    attempt: u32,
    not_before: Timestamp,
    sequence: u64,
}

impl QueuedMutation {
    /// Returns the id assigned at enqueue time.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Returns the payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Returns the dedupe key.
    #[must_use]
    pub fn dedupe_key(&self) -> Option<&str> {
        self.dedupe_key.as_deref()
    }

    /// Returns the endpoint.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Returns when the mutation was enqueued.
    #[must_use]
    pub const fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Returns how many attempts have failed so far.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the earliest time the mutation may be replayed.
    #[must_use]
    pub const fn not_before(&self) -> Timestamp {
        self.not_before
    }

    pub(crate) const fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn order_key(&self) -> OrderKey {
        (Reverse(self.priority), self.created_at, self.sequence)
    }

    pub(crate) fn rescheduled(&self, attempt: u32, not_before: Timestamp) -> Self {
        Self {
            attempt,
            not_before,
            ..self.clone()
        }
    }
}

/// Replay order: highest priority first, then oldest first, then enqueue order.
pub(crate) type OrderKey = (Reverse<Priority>, Timestamp, u64);

mod hex_payload {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(payload: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(payload))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map(Bytes::from).map_err(serde::de::Error::custom)
    }
}
