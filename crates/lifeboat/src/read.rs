// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::Duration;

use airbag::{BreakerError, CircuitOpenError, Classification, NetworkErrorKind, RetryExecutor};
use convoy::Flight;
use serde::Serialize;
use serde::de::DeserializeOwned;
use stowage::DurableStore;
use strata::{CacheEntry, CacheKey};
use sundial::Timestamp;

use crate::orchestrator::Inner;
use crate::{CachePolicy, Error, Event, Lifeboat, ReadRequest, Response, Result, Source, Transport};

/// The shared outcome of one fetch, fanned out to every reader that joined it.
pub(crate) type FetchResult<V> = std::result::Result<Fetched<V>, FetchFailure>;

#[derive(Debug, Clone)]
pub(crate) struct Fetched<V> {
    value: V,
    fetched_at: Timestamp,
}

#[derive(Debug, Clone)]
pub(crate) enum FetchFailure {
    Network(NetworkErrorKind),
    CircuitOpen(CircuitOpenError),
}

impl From<FetchFailure> for Error {
    fn from(failure: FetchFailure) -> Self {
        match failure {
            FetchFailure::Network(kind) => Self::Network(kind),
            FetchFailure::CircuitOpen(error) => Self::CircuitOpen(error),
        }
    }
}

impl<V, S, T> Lifeboat<V, S, T>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: DurableStore + Clone + 'static,
    T: Transport + 'static,
{
    /// Reads a resource according to `policy`.
    ///
    /// `fetch` is the remote operation. It is only invoked when the policy calls for a fetch
    /// and no fetch for the same cache key is already in flight; concurrent readers of the same
    /// resource join that fetch and observe its outcome. Fetches run through the endpoint's
    /// circuit breaker, are retried according to the configured retry policy, and successful
    /// results are written to the cache.
    ///
    /// Falling back to a cached value (with [`CachePolicy::NetworkFirst`] and
    /// [`CachePolicy::StaleWhileRevalidate`]) happens only when the fetch ran out of retries on
    /// a retryable failure or the circuit was open. Unauthorized and malformed responses are
    /// always returned as errors.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] for a [`CachePolicy::CacheOnly`] miss.
    /// - [`Error::Network`] or [`Error::CircuitOpen`] if the fetch failed and no fallback
    ///   applied.
    /// - [`Error::FetchAbandoned`] if the task running the fetch went away.
    pub async fn get<F, Fut>(&self, request: &ReadRequest, policy: CachePolicy, fetch: F) -> Result<Response<V>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, NetworkErrorKind>> + Send + 'static,
    {
        let key = request.key();

        match policy {
            CachePolicy::CacheOnly => self
                .lookup(&key)
                .await
                .map(|entry| Response::cached(entry, Source::Cache))
                .ok_or(Error::NotFound),
            CachePolicy::NetworkOnly => self.fetch(request, key, fetch).await,
            CachePolicy::CacheFirst => match self.lookup(&key).await {
                Some(entry) => Ok(Response::cached(entry, Source::Cache)),
                None => self.fetch(request, key, fetch).await,
            },
            CachePolicy::NetworkFirst => match self.fetch(request, key.clone(), fetch).await {
                Err(error) if self.permits_fallback(&error) => self.fall_back(&key, error).await,
                result => result,
            },
            CachePolicy::StaleWhileRevalidate(max_stale) => self.stale_while_revalidate(request, key, max_stale, fetch).await,
        }
    }

    async fn stale_while_revalidate<F, Fut>(
        &self,
        request: &ReadRequest,
        key: CacheKey,
        max_stale: Duration,
        fetch: F,
    ) -> Result<Response<V>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, NetworkErrorKind>> + Send + 'static,
    {
        let entry = self.lookup(&key).await;

        if let Some(entry) = entry.filter(|entry| entry.age(self.inner.clock.now()) <= max_stale) {
            // The revalidation keeps running on its own task after the flight is dropped.
            drop(self.start_fetch(request, key, fetch));
            return Ok(Response::cached(entry, Source::Cache));
        }

        match self.fetch(request, key.clone(), fetch).await {
            Err(error) if self.permits_fallback(&error) => self.fall_back(&key, error).await,
            result => result,
        }
    }

    /// Looks `key` up in the cache and reports the hit or miss.
    async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        let entry = self.inner.cache.get_entry(key).await;

        tracing::event!(
            name: "lifeboat.read",
            tracing::Level::DEBUG,
            cache.key = %key,
            cache.hit = entry.is_some(),
        );
        self.emit(match entry {
            Some(_) => Event::CacheHit { key: key.clone() },
            None => Event::CacheMiss { key: key.clone() },
        });

        entry
    }

    async fn fall_back(&self, key: &CacheKey, error: Error) -> Result<Response<V>> {
        match self.lookup(key).await {
            Some(entry) => {
                tracing::event!(
                    name: "lifeboat.fallback",
                    tracing::Level::WARN,
                    cache.key = %key,
                    error = %error,
                    "serving cached value after failed fetch",
                );
                Ok(Response::cached(entry, Source::StaleFallback))
            }
            None => Err(error),
        }
    }

    fn permits_fallback(&self, error: &Error) -> bool {
        match error {
            Error::CircuitOpen(_) => true,
            Error::Network(kind) => self.inner.statuses.classify(*kind) == Classification::Retryable,
            _ => false,
        }
    }

    async fn fetch<F, Fut>(&self, request: &ReadRequest, key: CacheKey, fetch: F) -> Result<Response<V>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, NetworkErrorKind>> + Send + 'static,
    {
        match self.start_fetch(request, key, fetch).await {
            Ok(Ok(fetched)) => Ok(Response::fetched(fetched.value, fetched.fetched_at)),
            Ok(Err(failure)) => Err(failure.into()),
            Err(_lost) => Err(Error::FetchAbandoned),
        }
    }

    /// Joins the fetch in flight for `key` or starts a new one.
    fn start_fetch<F, Fut>(&self, request: &ReadRequest, key: CacheKey, fetch: F) -> Flight<FetchResult<V>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, NetworkErrorKind>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let endpoint = request.shared_endpoint();
        let ttl = request.get_ttl();
        let produced_key = key.clone();

        let flight = self
            .inner
            .coordinator
            .fetch_or_join(key.clone(), move || produce(inner, endpoint, produced_key, ttl, fetch));

        if flight.is_coalesced() {
            self.emit(Event::FetchCoalesced { key });
        }

        flight
    }
}

/// Runs one logical fetch: retries inside the circuit breaker, then caches the value.
///
/// The breaker observes the retry sequence as a whole, so a fetch that exhausts its retries
/// counts as a single failure.
async fn produce<V, S, T, F, Fut>(
    inner: Arc<Inner<V, S, T>>,
    endpoint: Arc<str>,
    key: CacheKey,
    ttl: Option<Duration>,
    fetch: F,
) -> FetchResult<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: DurableStore + Clone + 'static,
    T: Transport + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<V, NetworkErrorKind>> + Send + 'static,
{
    let events = inner.events.clone();
    let retried_endpoint = Arc::clone(&endpoint);
    let retry = RetryExecutor::new(inner.clock.clone(), inner.retry_policy).on_retry(move |notice| {
        let _ = events.send(Event::RetryAttempted {
            endpoint: Arc::clone(&retried_endpoint),
            attempt: notice.attempt,
            delay: notice.delay,
        });
    });

    let statuses = &inner.statuses;
    let stopwatch = inner.clock.stopwatch();
    let result = inner
        .breakers
        .get(&endpoint)
        .execute(
            |kind: &NetworkErrorKind| statuses.outcome(*kind),
            || retry.execute(&fetch, |kind: &NetworkErrorKind| statuses.classify(*kind)),
        )
        .await;

    let elapsed = stopwatch.elapsed();

    match result {
        Ok(value) => {
            tracing::event!(
                name: "lifeboat.fetch",
                tracing::Level::DEBUG,
                fetch.endpoint = %endpoint,
                fetch.duration = ?elapsed,
                cache.key = %key,
                "fetch succeeded",
            );
            let fetched_at = inner.clock.now();
            let ttl = ttl.unwrap_or_else(|| inner.cache.default_ttl());
            if let Err(error) = inner.cache.set(key.clone(), value.clone(), ttl).await {
                tracing::event!(
                    name: "lifeboat.read",
                    tracing::Level::WARN,
                    cache.key = %key,
                    error = %error,
                    "fetched value could not be fully cached",
                );
            }
            Ok(Fetched { value, fetched_at })
        }
        Err(BreakerError::Open(error)) => Err(FetchFailure::CircuitOpen(error)),
        Err(BreakerError::Inner(kind)) => {
            tracing::event!(
                name: "lifeboat.fetch",
                tracing::Level::DEBUG,
                fetch.endpoint = %endpoint,
                fetch.duration = ?elapsed,
                cache.key = %key,
                error = %kind,
                "fetch failed",
            );
            Err(FetchFailure::Network(kind))
        }
    }
}
