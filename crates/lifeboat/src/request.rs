// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use outbox::Priority;
use strata::{CacheEntry, CacheKey};
use sundial::Timestamp;
use uuid::Uuid;

/// Identifies a resource to read and where to fetch it from.
///
/// The cache key is derived from the resource and its variant parameters only, so two
/// requests for the same resource with the same variants (in any order) share a cache entry
/// and an in-flight fetch. The endpoint selects the circuit breaker guarding the fetch.
///
/// # Examples
///
/// ```
/// use lifeboat::ReadRequest;
///
/// let first = ReadRequest::new("api.example.com", "feed")
///     .variant("page", "2")
///     .variant("lang", "en");
/// let second = ReadRequest::new("api.example.com", "feed")
///     .variant("lang", "en")
///     .variant("page", "2");
///
/// assert_eq!(first.key(), second.key());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    endpoint: Arc<str>,
    resource: String,
    variants: Vec<(String, String)>,
    ttl: Option<Duration>,
}

impl ReadRequest {
    /// Creates a request for `resource` served by `endpoint`.
    pub fn new(endpoint: impl Into<Arc<str>>, resource: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            resource: resource.into(),
            variants: Vec::new(),
            ttl: None,
        }
    }

    /// Adds a variant parameter that distinguishes representations of the resource.
    #[must_use]
    pub fn variant(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variants.push((name.into(), value.into()));
        self
    }

    /// Sets how long a freshly fetched value stays in the cache.
    ///
    /// Defaults to the configured default time-to-live.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Returns the endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the resource identifier.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Returns the cache key of this request.
    #[must_use]
    pub fn key(&self) -> CacheKey {
        CacheKey::from_parts(
            &self.resource,
            self.variants.iter().map(|(name, value)| (name.as_str(), value.as_str())),
        )
    }

    pub(crate) fn shared_endpoint(&self) -> Arc<str> {
        Arc::clone(&self.endpoint)
    }

    pub(crate) const fn get_ttl(&self) -> Option<Duration> {
        self.ttl
    }
}

/// How a read combines the cache and the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Answer from the cache only; a miss is [`Error::NotFound`][crate::Error::NotFound].
    CacheOnly,

    /// Always fetch; the cache is only written.
    NetworkOnly,

    /// Answer from the cache if possible, fetch on a miss.
    #[default]
    CacheFirst,

    /// Fetch first; if the fetch fails with a retryable error or an open circuit, fall back to
    /// the cached value.
    NetworkFirst,

    /// Answer from the cache if the value is at most this old and refresh it in the
    /// background; otherwise fetch like [`CachePolicy::NetworkFirst`].
    StaleWhileRevalidate(Duration),
}

/// Where the value of a [`Response`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The cache answered.
    Cache,

    /// A fetch answered.
    Network,

    /// The fetch failed and the cache answered instead.
    StaleFallback,
}

/// The answer to a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<V> {
    value: V,
    source: Source,
    created_at: Timestamp,
}

impl<V> Response<V> {
    pub(crate) const fn fetched(value: V, fetched_at: Timestamp) -> Self {
        Self {
            value,
            source: Source::Network,
            created_at: fetched_at,
        }
    }

    pub(crate) fn cached(entry: CacheEntry<V>, source: Source) -> Self {
        let created_at = entry.created_at();
        Self {
            value: entry.into_value(),
            source,
            created_at,
        }
    }

    /// Returns the value.
    #[must_use]
    pub const fn value(&self) -> &V {
        &self.value
    }

    /// Consumes the response and returns the value.
    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }

    /// Returns where the value came from.
    #[must_use]
    pub const fn source(&self) -> Source {
        self.source
    }

    /// Returns when the value was fetched from the network.
    #[must_use]
    pub const fn created_at(&self) -> Timestamp {
        self.created_at
    }
}

/// A write to send to an endpoint.
///
/// The optional optimistic value is written to the cache before the mutation is sent, so
/// reads observe the intended state immediately.
#[derive(Debug, Clone)]
pub struct MutationRequest<V> {
    pub(crate) endpoint: String,
    pub(crate) payload: Bytes,
    pub(crate) priority: Priority,
    pub(crate) dedupe_key: Option<String>,
    pub(crate) optimistic: Option<(CacheKey, V)>,
    pub(crate) ttl: Option<Duration>,
}

impl<V> MutationRequest<V> {
    /// Creates a mutation of `payload` addressed to `endpoint`.
    pub fn new(endpoint: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            endpoint: endpoint.into(),
            payload: payload.into(),
            priority: Priority::default(),
            dedupe_key: None,
            optimistic: None,
            ttl: None,
        }
    }

    /// Sets the replay priority used if the mutation has to be queued.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the key under which queued mutations collapse to the latest one.
    #[must_use]
    pub fn dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }

    /// Writes `value` under `key` to the cache before sending.
    ///
    /// The value is removed again if the endpoint rejects the mutation outright.
    #[must_use]
    pub fn optimistic(mut self, key: impl Into<CacheKey>, value: V) -> Self {
        self.optimistic = Some((key.into(), value));
        self
    }

    /// Sets how long the optimistic value stays in the cache.
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// What happened to a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The endpoint accepted the mutation.
    Applied,

    /// The mutation was queued and will be replayed when possible.
    Queued(Uuid),
}
