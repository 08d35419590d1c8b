//! Filters deciding which reports, children, and chunk nodes a query
//! returns. Filters never change what is aggregated.

use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::error::{HealthError, HealthResult};
use crate::types::{EntityKind, EntityRef, HealthState};

/// Bit set over health states. `DEFAULT` (no bits) matches everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthStateFilter(u32);

impl HealthStateFilter {
    pub const DEFAULT: Self = Self(0);
    pub const NONE: Self = Self(0x1);
    pub const OK: Self = Self(0x2);
    pub const WARNING: Self = Self(0x4);
    pub const ERROR: Self = Self(0x8);
    pub const UNKNOWN: Self = Self(0x10);
    pub const ALL: Self = Self(0xFFFF);

    /// Warning and Error.
    pub const UNHEALTHY: Self = Self(0x4 | 0x8);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn matches(&self, state: HealthState) -> bool {
        if self.0 == 0 {
            return true;
        }
        let bit = match state {
            HealthState::Ok => Self::OK.0,
            HealthState::Warning => Self::WARNING.0,
            HealthState::Error => Self::ERROR.0,
            HealthState::Unknown => Self::UNKNOWN.0,
        };
        self.0 & bit != 0
    }
}

impl BitOr for HealthStateFilter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Selects which children of a chunk node are materialized.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkFilter {
    /// Child kind this filter applies to; `None` applies to every kind.
    pub kind: Option<EntityKind>,
    /// Exact identity (see [`EntityRef::filter_key`]); `None` is generic.
    pub name: Option<String>,
    pub state_filter: HealthStateFilter,
    /// Filters for the grandchildren of matched children.
    pub child_filters: Vec<ChunkFilter>,
}

impl ChunkFilter {
    pub fn for_kind(kind: EntityKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn named(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_state(mut self, filter: HealthStateFilter) -> Self {
        self.state_filter = filter;
        self
    }

    pub fn with_children(mut self, filters: Vec<ChunkFilter>) -> Self {
        self.child_filters = filters;
        self
    }

    fn applies_to(&self, entity: &EntityRef) -> bool {
        self.kind.is_none_or(|k| k == entity.kind())
    }

    /// Pick the filter governing `entity`: an exact name match wins over a
    /// generic filter of the same kind.
    pub fn select<'a>(filters: &'a [ChunkFilter], entity: &EntityRef) -> Option<&'a ChunkFilter> {
        let key = entity.filter_key();
        let mut generic = None;
        for filter in filters.iter().filter(|f| f.applies_to(entity)) {
            match &filter.name {
                Some(name) if *name == key => return Some(filter),
                Some(_) => {}
                None => {
                    if generic.is_none() {
                        generic = Some(filter);
                    }
                }
            }
        }
        generic
    }

    /// Reject malformed filter trees.
    pub fn validate_all(filters: &[ChunkFilter], depth_limit: usize) -> HealthResult<()> {
        Self::validate_level(filters, 1, depth_limit)
    }

    fn validate_level(filters: &[ChunkFilter], depth: usize, depth_limit: usize) -> HealthResult<()> {
        if filters.is_empty() {
            return Ok(());
        }
        if depth > depth_limit {
            return Err(HealthError::InvalidArgument(format!(
                "chunk filters nested deeper than {depth_limit} levels"
            )));
        }
        for filter in filters {
            match (&filter.kind, &filter.name) {
                (_, Some(name)) if name.is_empty() => {
                    return Err(HealthError::InvalidArgument(
                        "chunk filter name is empty".to_string(),
                    ));
                }
                (None, Some(name)) => {
                    return Err(HealthError::InvalidArgument(format!(
                        "chunk filter '{name}' names an entity without a kind"
                    )));
                }
                (Some(EntityKind::Cluster), _) => {
                    return Err(HealthError::InvalidArgument(
                        "the cluster is never a child".to_string(),
                    ));
                }
                _ => {}
            }
            Self::validate_level(&filter.child_filters, depth + 1, depth_limit)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_everything() {
        for state in [
            HealthState::Unknown,
            HealthState::Ok,
            HealthState::Warning,
            HealthState::Error,
        ] {
            assert!(HealthStateFilter::DEFAULT.matches(state));
            assert!(HealthStateFilter::ALL.matches(state));
            assert!(!HealthStateFilter::NONE.matches(state));
        }
    }

    #[test]
    fn combined_bits() {
        let f = HealthStateFilter::OK | HealthStateFilter::ERROR;
        assert!(f.matches(HealthState::Ok));
        assert!(f.matches(HealthState::Error));
        assert!(!f.matches(HealthState::Warning));
        assert!(!f.matches(HealthState::Unknown));
        assert!(HealthStateFilter::UNHEALTHY.matches(HealthState::Warning));
    }

    #[test]
    fn serializes_as_bits() {
        assert_eq!(serde_json::to_string(&HealthStateFilter::ERROR).unwrap(), "8");
        let f: HealthStateFilter = serde_json::from_str("12").unwrap();
        assert_eq!(f, HealthStateFilter::UNHEALTHY);
    }

    #[test]
    fn exact_name_wins_over_generic() {
        let filters = vec![
            ChunkFilter::for_kind(EntityKind::Node).with_state(HealthStateFilter::ERROR),
            ChunkFilter::named(EntityKind::Node, "n2").with_state(HealthStateFilter::ALL),
        ];
        let picked = ChunkFilter::select(&filters, &EntityRef::node("n2")).unwrap();
        assert_eq!(picked.name.as_deref(), Some("n2"));

        let picked = ChunkFilter::select(&filters, &EntityRef::node("n1")).unwrap();
        assert_eq!(picked.name, None);

        assert!(ChunkFilter::select(&filters, &EntityRef::application("app")).is_none());
    }

    #[test]
    fn kindless_filter_applies_to_any_child() {
        let filters = vec![ChunkFilter::default()];
        assert!(ChunkFilter::select(&filters, &EntityRef::application("app")).is_some());
    }

    #[test]
    fn validation() {
        let bad_name = vec![ChunkFilter::named(EntityKind::Node, "")];
        assert!(ChunkFilter::validate_all(&bad_name, 8).is_err());

        let kindless_name = vec![ChunkFilter {
            name: Some("n1".to_string()),
            ..ChunkFilter::default()
        }];
        assert!(ChunkFilter::validate_all(&kindless_name, 8).is_err());

        let cluster = vec![ChunkFilter::for_kind(EntityKind::Cluster)];
        assert!(ChunkFilter::validate_all(&cluster, 8).is_err());

        let nested = vec![ChunkFilter::for_kind(EntityKind::Application).with_children(vec![
            ChunkFilter::for_kind(EntityKind::Service)
                .with_children(vec![ChunkFilter::for_kind(EntityKind::Partition)]),
        ])];
        assert!(ChunkFilter::validate_all(&nested, 3).is_ok());
        assert!(ChunkFilter::validate_all(&nested, 2).is_err());
    }
}
