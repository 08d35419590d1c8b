//! Health policies applied when rolling children up into a parent.
//!
//! Policies travel with each query; nothing here is stored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{EntityKind, HealthState};

/// Thresholds for one group of children (all children of one kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildThreshold {
    /// Largest tolerated percentage of Error children before the parent
    /// becomes Error. 0 means a single Error child escalates.
    pub max_percent_unhealthy: u8,
    /// Largest tolerated percentage of Warning-or-Error children before the
    /// parent becomes Warning.
    pub max_percent_warning: u8,
    /// Groups with fewer evaluated children than this are ignored.
    pub ignore_below: u32,
}

impl ChildThreshold {
    pub fn with_max_percent_unhealthy(percent: u8) -> Self {
        Self {
            max_percent_unhealthy: percent,
            ..Self::default()
        }
    }

    /// Roll up one group of child states.
    ///
    /// Returns `None` when the group is ignored (empty, or smaller than
    /// `ignore_below`). Unknown children are expected to be filtered out by
    /// the caller unless the policy counts them.
    pub fn evaluate(&self, errors: usize, warnings: usize, total: usize) -> Option<HealthState> {
        if total == 0 || total < self.ignore_below as usize {
            return None;
        }
        if errors > 0 && percent_of(errors, total) > u32::from(self.max_percent_unhealthy) {
            return Some(HealthState::Error);
        }
        let unhealthy = errors + warnings;
        if unhealthy > 0 && percent_of(unhealthy, total) > u32::from(self.max_percent_warning) {
            return Some(HealthState::Warning);
        }
        Some(HealthState::Ok)
    }
}

/// `ceil(100 * count / total)`; 0 when `total` is 0.
pub fn percent_of(count: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    let scaled = (count as u128) * 100;
    let total = total as u128;
    scaled.div_ceil(total).min(u128::from(u32::MAX)) as u32
}

/// Policy controlling how reports and children are aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthPolicy {
    /// Treat Warning reports as Error.
    pub consider_warning_as_error: bool,
    /// Include Unknown children in percentage denominators.
    pub count_unknown_children: bool,
    /// Threshold used for child kinds without an explicit entry.
    pub default_threshold: ChildThreshold,
    /// Per child kind thresholds, e.g. `Node` under the cluster.
    pub thresholds: BTreeMap<EntityKind, ChildThreshold>,
}

impl HealthPolicy {
    pub fn with_threshold(mut self, kind: EntityKind, threshold: ChildThreshold) -> Self {
        self.thresholds.insert(kind, threshold);
        self
    }

    pub fn consider_warning_as_error(mut self, enabled: bool) -> Self {
        self.consider_warning_as_error = enabled;
        self
    }

    pub fn threshold_for(&self, kind: EntityKind) -> ChildThreshold {
        self.thresholds
            .get(&kind)
            .copied()
            .unwrap_or(self.default_threshold)
    }

    pub fn validate(&self) -> crate::HealthResult<()> {
        let all = std::iter::once(&self.default_threshold).chain(self.thresholds.values());
        for t in all {
            if t.max_percent_unhealthy > 100 || t.max_percent_warning > 100 {
                return Err(crate::HealthError::InvalidArgument(
                    "percent thresholds must be within 0..=100".to_string(),
                ));
            }
        }
        Ok(())
    }
}
