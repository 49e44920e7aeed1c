// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured log events emitted by the cache.

use crate::CacheKey;

/// Which tier an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tier {
    Memory,
    Persistent,
}

impl Tier {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Persistent => "persistent",
        }
    }
}

/// What happened to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheActivity {
    Hit,
    Miss,
    Expired,
    Evicted,
    Rejected,
    Promoted,
    Superseded,
}

impl CacheActivity {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Expired => "expired",
            Self::Evicted => "evicted",
            Self::Rejected => "rejected",
            Self::Promoted => "promoted",
            Self::Superseded => "superseded",
        }
    }
}

pub(crate) fn record(tier: Tier, activity: CacheActivity, key: &CacheKey) {
    match activity {
        CacheActivity::Evicted | CacheActivity::Rejected => tracing::event!(
            name: "strata.evict",
            tracing::Level::DEBUG,
            cache.tier = tier.as_str(),
            cache.activity = activity.as_str(),
            cache.key = %key,
        ),
        _ => tracing::event!(
            name: "strata.access",
            tracing::Level::DEBUG,
            cache.tier = tier.as_str(),
            cache.activity = activity.as_str(),
            cache.key = %key,
        ),
    }
}

pub(crate) fn storage_failure(operation: &'static str, key: Option<&CacheKey>, error: &dyn std::error::Error) {
    tracing::event!(
        name: "strata.storage",
        tracing::Level::ERROR,
        cache.tier = Tier::Persistent.as_str(),
        cache.operation = operation,
        cache.key = key.map(tracing::field::display),
        error = %error,
        "persistent tier operation failed",
    );
}
