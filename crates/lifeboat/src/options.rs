// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use airbag::{Backoff, BreakerOptions, RetryPolicy, RetryableStatuses};
use outbox::OfflineQueueOptions;
use serde::{Deserialize, Serialize};
use strata::{TierBudget, TieredCacheOptions};

use crate::Result;

/// Configuration of every component a [`Lifeboat`][crate::Lifeboat] wires together.
///
/// Options are built in code with the setters below or loaded from JSON with
/// [`from_json`][Self::from_json]. In the serialized form durations are whole milliseconds
/// (`*_ms` fields) and every field is optional; missing fields keep their defaults.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use lifeboat::LifeboatOptions;
///
/// let options = LifeboatOptions::from_json(
///     r#"{
///         "default_ttl_ms": 60000,
///         "retry": { "kind": "fixed", "delay_ms": 250, "max_attempts": 3 },
///         "breaker": { "failure_threshold": 3 }
///     }"#,
/// )?;
///
/// assert_eq!(options.get_default_ttl(), Duration::from_secs(60));
/// assert_eq!(options.retry_policy().max_attempts(), 3);
/// assert_eq!(options.breaker_options().get_failure_threshold(), 3);
/// # Ok::<(), lifeboat::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LifeboatOptions {
    memory: TierBudget,
    persistent: TierBudget,
    default_ttl_ms: u64,
    sweep_interval_ms: Option<u64>,
    retry: RetrySettings,
    breaker: BreakerSettings,
    queue: QueueSettings,
    retryable_statuses: Vec<u16>,
}

impl Default for LifeboatOptions {
    fn default() -> Self {
        let cache = TieredCacheOptions::default();
        Self {
            memory: cache.memory_budget(),
            persistent: cache.persistent_budget(),
            default_ttl_ms: millis(cache.ttl()),
            sweep_interval_ms: None,
            retry: RetrySettings::default(),
            breaker: BreakerSettings::default(),
            queue: QueueSettings::default(),
            retryable_statuses: RetryableStatuses::default().iter().collect(),
        }
    }
}

impl LifeboatOptions {
    /// Parses options from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`][crate::Error::Config] if the document is not valid JSON, has
    /// unknown fields or values of the wrong type.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the memory tier budget.
    #[must_use]
    pub fn memory(mut self, budget: TierBudget) -> Self {
        self.memory = budget;
        self
    }

    /// Sets the persistent tier budget.
    #[must_use]
    pub fn persistent(mut self, budget: TierBudget) -> Self {
        self.persistent = budget;
        self
    }

    /// Sets the time-to-live of fetched values whose request does not carry one.
    #[must_use]
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_ms = millis(ttl);
        self
    }

    /// Enables a background sweep of expired cache entries every `interval`.
    ///
    /// Disabled by default; expired entries are then removed lazily when they are looked up.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = Some(millis(interval));
        self
    }

    /// Sets the retry policy used for reads.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetrySettings::from(policy);
        self
    }

    /// Sets the options of every endpoint's circuit breaker.
    #[must_use]
    pub fn breaker(mut self, options: BreakerOptions) -> Self {
        self.breaker = BreakerSettings::from(&options);
        self
    }

    /// Sets the offline queue options.
    #[must_use]
    pub fn queue(mut self, options: OfflineQueueOptions) -> Self {
        self.queue = QueueSettings::from(&options);
        self
    }

    /// Sets the server status codes that are worth retrying.
    #[must_use]
    pub fn retryable_statuses(mut self, statuses: &RetryableStatuses) -> Self {
        self.retryable_statuses = statuses.iter().collect();
        self
    }

    /// Returns the time-to-live of fetched values whose request does not carry one.
    #[must_use]
    pub fn get_default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// Returns the sweep interval, if sweeping is enabled.
    #[must_use]
    pub fn get_sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_ms.map(Duration::from_millis)
    }

    /// Returns the cache options.
    #[must_use]
    pub fn cache_options(&self) -> TieredCacheOptions {
        TieredCacheOptions::default()
            .memory(self.memory)
            .persistent(self.persistent)
            .default_ttl(self.get_default_ttl())
    }

    /// Returns the retry policy used for reads.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.into()
    }

    /// Returns the circuit breaker options.
    #[must_use]
    pub fn breaker_options(&self) -> BreakerOptions {
        let settings = &self.breaker;
        let options = BreakerOptions::default()
            .failure_threshold(settings.failure_threshold)
            .reset_timeout(Duration::from_millis(settings.reset_timeout_ms))
            .success_threshold(settings.success_threshold);

        match settings.half_open_max_probes {
            Some(probes) => options.half_open_max_probes(probes),
            None => options,
        }
    }

    /// Returns the offline queue options.
    #[must_use]
    pub fn queue_options(&self) -> OfflineQueueOptions {
        let settings = &self.queue;
        let backoff = if settings.exponential {
            Backoff::exponential(
                Duration::from_millis(settings.base_ms),
                Duration::from_millis(settings.max_delay_ms),
            )
        } else {
            Backoff::fixed(Duration::from_millis(settings.base_ms))
        };
        let backoff = if settings.jitter { backoff.with_jitter() } else { backoff };

        OfflineQueueOptions::default()
            .max_attempts(settings.max_attempts)
            .backoff(backoff)
            .batch_size(settings.batch_size)
    }

    /// Returns the server status codes that are worth retrying.
    #[must_use]
    pub fn statuses(&self) -> RetryableStatuses {
        RetryableStatuses::from_codes(self.retryable_statuses.iter().copied())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RetrySettings {
    None,
    Fixed {
        delay_ms: u64,
        max_attempts: u32,
    },
    Exponential {
        base_ms: u64,
        max_delay_ms: u64,
        max_attempts: u32,
    },
    ExponentialWithJitter {
        base_ms: u64,
        max_delay_ms: u64,
        max_attempts: u32,
    },
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetryPolicy::default().into()
    }
}

impl From<RetryPolicy> for RetrySettings {
    fn from(policy: RetryPolicy) -> Self {
        match policy {
            RetryPolicy::None => Self::None,
            RetryPolicy::Fixed { delay, max_attempts } => Self::Fixed {
                delay_ms: millis(delay),
                max_attempts,
            },
            RetryPolicy::Exponential {
                base,
                max_delay,
                max_attempts,
            } => Self::Exponential {
                base_ms: millis(base),
                max_delay_ms: millis(max_delay),
                max_attempts,
            },
            RetryPolicy::ExponentialWithJitter {
                base,
                max_delay,
                max_attempts,
            } => Self::ExponentialWithJitter {
                base_ms: millis(base),
                max_delay_ms: millis(max_delay),
                max_attempts,
            },
        }
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        match settings {
            RetrySettings::None => Self::None,
            RetrySettings::Fixed { delay_ms, max_attempts } => Self::Fixed {
                delay: Duration::from_millis(delay_ms),
                max_attempts,
            },
            RetrySettings::Exponential {
                base_ms,
                max_delay_ms,
                max_attempts,
            } => Self::Exponential {
                base: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_delay_ms),
                max_attempts,
            },
            RetrySettings::ExponentialWithJitter {
                base_ms,
                max_delay_ms,
                max_attempts,
            } => Self::ExponentialWithJitter {
                base: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_delay_ms),
                max_attempts,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BreakerSettings {
    failure_threshold: u32,
    reset_timeout_ms: u64,
    success_threshold: u32,
    half_open_max_probes: Option<u32>,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let defaults = BreakerOptions::default();
        Self {
            failure_threshold: defaults.get_failure_threshold(),
            reset_timeout_ms: millis(defaults.get_reset_timeout()),
            success_threshold: defaults.get_success_threshold(),
            half_open_max_probes: None,
        }
    }
}

impl From<&BreakerOptions> for BreakerSettings {
    fn from(options: &BreakerOptions) -> Self {
        Self {
            failure_threshold: options.get_failure_threshold(),
            reset_timeout_ms: millis(options.get_reset_timeout()),
            success_threshold: options.get_success_threshold(),
            half_open_max_probes: Some(options.get_half_open_max_probes()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct QueueSettings {
    max_attempts: u32,
    base_ms: u64,
    max_delay_ms: u64,
    exponential: bool,
    jitter: bool,
    batch_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&OfflineQueueOptions::default())
    }
}

impl From<&OfflineQueueOptions> for QueueSettings {
    fn from(options: &OfflineQueueOptions) -> Self {
        let backoff = options.get_backoff();
        Self {
            max_attempts: options.get_max_attempts(),
            base_ms: millis(backoff.base()),
            max_delay_ms: millis(backoff.max_delay()),
            exponential: backoff.is_exponential(),
            jitter: backoff.has_jitter(),
            batch_size: options.get_batch_size(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    static_assertions::assert_impl_all!(LifeboatOptions: Send, Sync, Clone, Default);

    #[test]
    fn defaults_match_components() {
        let options = LifeboatOptions::default();

        assert_eq!(options.cache_options(), TieredCacheOptions::default());
        assert_eq!(options.retry_policy(), RetryPolicy::default());
        assert_eq!(options.breaker_options(), BreakerOptions::default());
        assert_eq!(options.queue_options(), OfflineQueueOptions::default());
        assert_eq!(options.statuses(), RetryableStatuses::default());
        assert_eq!(options.get_sweep_interval(), None);
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(LifeboatOptions::from_json("{}").unwrap(), LifeboatOptions::default());
    }

    #[test]
    fn serialized_defaults_load_back() {
        let json = serde_json::to_string(&LifeboatOptions::default()).unwrap();
        assert!(json.contains("\"default_ttl_ms\":300000"), "{json}");
        assert!(json.contains("\"kind\":\"exponential_with_jitter\""), "{json}");
        assert_eq!(LifeboatOptions::from_json(&json).unwrap(), LifeboatOptions::default());
    }

    #[rstest]
    #[case(r#"{"kind":"none"}"#, RetryPolicy::None)]
    #[case(
        r#"{"kind":"fixed","delay_ms":100,"max_attempts":2}"#,
        RetryPolicy::Fixed { delay: Duration::from_millis(100), max_attempts: 2 }
    )]
    #[case(
        r#"{"kind":"exponential","base_ms":50,"max_delay_ms":800,"max_attempts":6}"#,
        RetryPolicy::Exponential { base: Duration::from_millis(50), max_delay: Duration::from_millis(800), max_attempts: 6 }
    )]
    fn retry_kinds_parse(#[case] retry: &str, #[case] expected: RetryPolicy) {
        let options = LifeboatOptions::from_json(&format!(r#"{{"retry":{retry}}}"#)).unwrap();
        assert_eq!(options.retry_policy(), expected);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let options = LifeboatOptions::from_json(
            r#"{
                "memory": { "max_entries": 10 },
                "breaker": { "reset_timeout_ms": 5000 },
                "queue": { "batch_size": 4, "jitter": true },
                "retryable_statuses": [503],
                "sweep_interval_ms": 60000
            }"#,
        )
        .unwrap();

        assert_eq!(options.cache_options().memory_budget(), TierBudget::unlimited().with_max_entries(10));
        assert_eq!(options.breaker_options().get_reset_timeout(), Duration::from_secs(5));
        assert_eq!(options.breaker_options().get_failure_threshold(), 5);
        assert_eq!(options.queue_options().get_batch_size(), 4);
        assert!(options.queue_options().get_backoff().has_jitter());
        assert_eq!(options.queue_options().get_max_attempts(), 8);
        assert_eq!(options.statuses(), RetryableStatuses::from_codes([503]));
        assert_eq!(options.get_sweep_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = LifeboatOptions::from_json(r#"{"ttl": 5}"#).unwrap_err();
        assert!(matches!(error, crate::Error::Config(_)));
    }

    #[test]
    fn setters_round_trip_through_components() {
        let breaker = BreakerOptions::default().failure_threshold(3).half_open_max_probes(1);
        let queue = OfflineQueueOptions::default().backoff(Backoff::fixed(Duration::from_secs(2)));
        let options = LifeboatOptions::default()
            .default_ttl(Duration::from_secs(5))
            .retry(RetryPolicy::None)
            .breaker(breaker)
            .queue(queue)
            .sweep_interval(Duration::from_secs(30));

        assert_eq!(options.get_default_ttl(), Duration::from_secs(5));
        assert_eq!(options.retry_policy(), RetryPolicy::None);
        assert_eq!(options.breaker_options(), breaker);
        assert_eq!(options.queue_options(), queue);
        assert_eq!(options.get_sweep_interval(), Some(Duration::from_secs(30)));
    }
}
