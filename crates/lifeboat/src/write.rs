// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use airbag::{BreakerError, Classification, NetworkErrorKind};
use outbox::Mutation;
use serde::Serialize;
use serde::de::DeserializeOwned;
use stowage::DurableStore;
use strata::CacheKey;

use crate::{Error, Lifeboat, MutationOutcome, MutationRequest, Result, Transport};

impl<V, S, T> Lifeboat<V, S, T>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: DurableStore + Clone + 'static,
    T: Transport + 'static,
{
    /// Applies a write.
    ///
    /// The optimistic value, if any, is written to the cache first. When the device is online
    /// the mutation is sent once through the endpoint's circuit breaker; an accepted mutation
    /// is [`MutationOutcome::Applied`]. When the device is offline, the circuit is open or the
    /// send fails with a retryable error, the mutation is queued durably and replayed later:
    /// the result is [`MutationOutcome::Queued`]. A mutation whose dedupe key already has a
    /// queued mutation is queued behind it instead of being sent, so the latest intent wins.
    ///
    /// A write is never dropped silently. If a queued mutation later runs out of attempts it
    /// is reported as [`Event::MutationFailed`][crate::Event::MutationFailed].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the endpoint rejected the mutation with a failure that
    /// retrying cannot fix; the optimistic value is removed from the cache again. Returns
    /// [`Error::Queue`] if the mutation could not be persisted.
    pub async fn mutate(&self, request: MutationRequest<V>) -> Result<MutationOutcome> {
        let MutationRequest {
            endpoint,
            payload,
            priority,
            dedupe_key,
            optimistic,
            ttl,
        } = request;

        let optimistic_key = match optimistic {
            Some((key, value)) => {
                let ttl = ttl.unwrap_or_else(|| self.inner.cache.default_ttl());
                if let Err(error) = self.inner.cache.set(key.clone(), value, ttl).await {
                    // The memory tier holds the value even when persisting it failed.
                    tracing::event!(
                        name: "lifeboat.mutate",
                        tracing::Level::WARN,
                        cache.key = %key,
                        error = %error,
                        "optimistic value could not be fully cached",
                    );
                }
                Some(key)
            }
            None => None,
        };

        if self.inner.connectivity.current().is_connected() && !self.has_pending(dedupe_key.as_deref()) {
            let breaker = self.inner.breakers.get(&endpoint);
            let statuses = &self.inner.statuses;
            let sent = breaker
                .execute(
                    |kind: &NetworkErrorKind| statuses.outcome(*kind),
                    || self.inner.transport.send(&endpoint, payload.clone()),
                )
                .await;

            match sent {
                Ok(()) => {
                    tracing::event!(
                        name: "lifeboat.mutate",
                        tracing::Level::DEBUG,
                        mutation.endpoint = %endpoint,
                        "mutation applied",
                    );
                    return Ok(MutationOutcome::Applied);
                }
                Err(BreakerError::Inner(kind)) if statuses.classify(kind) == Classification::Terminal => {
                    self.revert(optimistic_key.as_ref()).await;
                    tracing::event!(
                        name: "lifeboat.mutate",
                        tracing::Level::WARN,
                        mutation.endpoint = %endpoint,
                        error = %kind,
                        "mutation rejected",
                    );
                    return Err(Error::Network(kind));
                }
                Err(error) => tracing::event!(
                    name: "lifeboat.mutate",
                    tracing::Level::DEBUG,
                    mutation.endpoint = %endpoint,
                    error = %error,
                    "mutation not delivered, queueing",
                ),
            }
        }

        let mut mutation = Mutation::new(payload).priority(priority).endpoint(endpoint);
        if let Some(dedupe_key) = dedupe_key {
            mutation = mutation.dedupe_key(dedupe_key);
        }

        let id = self.inner.queue.enqueue(mutation).await?;
        Ok(MutationOutcome::Queued(id))
    }

    fn has_pending(&self, dedupe_key: Option<&str>) -> bool {
        dedupe_key.is_some_and(|dedupe_key| {
            self.inner
                .queue
                .pending()
                .iter()
                .any(|queued| queued.dedupe_key() == Some(dedupe_key))
        })
    }

    async fn revert(&self, key: Option<&CacheKey>) {
        let Some(key) = key else {
            return;
        };

        if let Err(error) = self.inner.cache.invalidate(key).await {
            tracing::event!(
                name: "lifeboat.mutate",
                tracing::Level::ERROR,
                cache.key = %key,
                error = %error,
                "optimistic value could not be removed",
            );
        }
    }
}
