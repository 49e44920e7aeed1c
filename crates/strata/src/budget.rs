// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use serde::{Deserialize, Serialize};

/// The residency limits of a single cache tier.
///
/// A `None` limit is unbounded. After every insert the tier evicts least-recently-used entries
/// until both limits hold again.
///
/// # Examples
///
/// ```
/// use strata::TierBudget;
///
/// let budget = TierBudget::unlimited().with_max_entries(100).with_max_bytes(1 << 20);
/// assert!(budget.is_exceeded(101, 0));
/// assert!(!budget.admits(2 << 20));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TierBudget {
    /// Maximum number of entries.
    #[serde(default)]
    pub max_entries: Option<u64>,
    /// Maximum accounted bytes.
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

impl TierBudget {
    /// A budget with no limits.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_entries: None,
            max_bytes: None,
        }
    }

    /// Sets the entry limit.
    #[must_use]
    pub const fn with_max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Sets the byte limit.
    #[must_use]
    pub const fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Returns `true` if a tier holding `entries` entries totalling `bytes` is over budget.
    #[must_use]
    pub fn is_exceeded(&self, entries: u64, bytes: u64) -> bool {
        self.max_entries.is_some_and(|max| entries > max) || self.max_bytes.is_some_and(|max| bytes > max)
    }

    /// Returns `true` if a single entry of `size_bytes` can ever fit.
    #[must_use]
    pub fn admits(&self, size_bytes: u64) -> bool {
        self.max_entries != Some(0) && self.max_bytes.is_none_or(|max| size_bytes <= max)
    }
}
