//! Query descriptions and the result shapes the query engine returns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filter::{ChunkFilter, HealthStateFilter};
use crate::policy::HealthPolicy;
use crate::types::{EntityKind, EntityRef, HealthState, LedgerEntry};

// ── Queries ───────────────────────────────────────────────────────

/// "Get health of X". Optional parts are named fields instead of
/// overloads; `None`/`DEFAULT` mean "use the engine default".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityHealthQuery {
    pub entity: EntityRef,
    #[serde(default)]
    pub policy: Option<HealthPolicy>,
    /// Which of the entity's own reports are returned.
    #[serde(default)]
    pub events_filter: HealthStateFilter,
    /// Which direct children are listed.
    #[serde(default)]
    pub children_filter: HealthStateFilter,
    #[serde(default)]
    pub include_statistics: bool,
}

impl EntityHealthQuery {
    pub fn new(entity: EntityRef) -> Self {
        Self {
            entity,
            policy: None,
            events_filter: HealthStateFilter::DEFAULT,
            children_filter: HealthStateFilter::DEFAULT,
            include_statistics: false,
        }
    }

    pub fn cluster() -> Self {
        Self::new(EntityRef::Cluster)
    }

    pub fn node(node_name: impl Into<String>) -> Self {
        Self::new(EntityRef::node(node_name))
    }

    pub fn application(application_name: impl Into<String>) -> Self {
        Self::new(EntityRef::application(application_name))
    }

    pub fn service(service_name: impl Into<String>) -> Self {
        Self::new(EntityRef::service(service_name))
    }

    pub fn partition(partition_id: Uuid) -> Self {
        Self::new(EntityRef::partition(partition_id))
    }

    pub fn replica(partition_id: Uuid, replica_id: i64) -> Self {
        Self::new(EntityRef::replica(partition_id, replica_id))
    }

    pub fn deployed_application(
        application_name: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Self {
        Self::new(EntityRef::deployed_application(application_name, node_name))
    }

    pub fn deployed_service_package(
        application_name: impl Into<String>,
        service_manifest_name: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Self {
        Self::new(EntityRef::deployed_service_package(
            application_name,
            service_manifest_name,
            node_name,
        ))
    }

    pub fn with_policy(mut self, policy: HealthPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_events_filter(mut self, filter: HealthStateFilter) -> Self {
        self.events_filter = filter;
        self
    }

    pub fn with_children_filter(mut self, filter: HealthStateFilter) -> Self {
        self.children_filter = filter;
        self
    }

    pub fn with_statistics(mut self) -> Self {
        self.include_statistics = true;
        self
    }
}

/// "Get health chunk": aggregate the whole subtree of `root`, return only
/// the nodes the filters select.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthChunkQuery {
    pub root: EntityRef,
    #[serde(default)]
    pub policy: Option<HealthPolicy>,
    /// Children of the root are materialized only when the root state
    /// matches this filter.
    #[serde(default)]
    pub root_filter: HealthStateFilter,
    #[serde(default)]
    pub child_filters: Vec<ChunkFilter>,
}

impl HealthChunkQuery {
    pub fn new(root: EntityRef) -> Self {
        Self {
            root,
            policy: None,
            root_filter: HealthStateFilter::DEFAULT,
            child_filters: Vec::new(),
        }
    }

    pub fn cluster() -> Self {
        Self::new(EntityRef::Cluster)
    }

    pub fn with_policy(mut self, policy: HealthPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_root_filter(mut self, filter: HealthStateFilter) -> Self {
        self.root_filter = filter;
        self
    }

    pub fn with_child_filter(mut self, filter: ChunkFilter) -> Self {
        self.child_filters.push(filter);
        self
    }
}

// ── Evaluations ───────────────────────────────────────────────────

/// What a [`HealthEvaluation`] node explains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvaluationKind {
    /// The entity's own reports; children are `Report` nodes.
    Reports { entity: EntityRef },
    /// One report that pushed the entity above Ok.
    Report { source_id: String, property: String },
    /// Rollup of one kind of children; children are `Entity` nodes.
    Children {
        kind: EntityKind,
        total: usize,
        unhealthy: usize,
        max_percent_unhealthy: u8,
    },
    /// One unhealthy child; children explain why.
    Entity { entity: EntityRef },
}

/// A node of the explanation tree produced by aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthEvaluation {
    pub kind: EvaluationKind,
    pub aggregated_state: HealthState,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HealthEvaluation>,
}

impl HealthEvaluation {
    /// Depth-first walk over this node and all its descendants.
    pub fn walk(&self) -> Vec<&HealthEvaluation> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        out
    }
}

// ── Results ───────────────────────────────────────────────────────

/// Entity plus its aggregated state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityHealthState {
    pub entity: EntityRef,
    pub aggregated_state: HealthState,
}

/// Per-state counts for one entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HealthStateCount {
    pub ok: u64,
    pub warning: u64,
    pub error: u64,
    pub unknown: u64,
}

impl HealthStateCount {
    pub fn add(&mut self, state: HealthState) {
        match state {
            HealthState::Ok => self.ok += 1,
            HealthState::Warning => self.warning += 1,
            HealthState::Error => self.error += 1,
            HealthState::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.ok + self.warning + self.error + self.unknown
    }
}

/// Counts of descendants by kind and state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HealthStatistics {
    pub counts: BTreeMap<EntityKind, HealthStateCount>,
}

impl HealthStatistics {
    pub fn add(&mut self, kind: EntityKind, state: HealthState) {
        self.counts.entry(kind).or_default().add(state);
    }

    pub fn count(&self, kind: EntityKind) -> HealthStateCount {
        self.counts.get(&kind).copied().unwrap_or_default()
    }
}

/// Answer to an [`EntityHealthQuery`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityHealth {
    pub entity: EntityRef,
    pub aggregated_state: HealthState,
    /// Own reports, expired non-removable ones included and flagged.
    pub reports: Vec<LedgerEntry>,
    /// Direct children only.
    pub children: Vec<EntityHealthState>,
    pub unhealthy_evaluations: Vec<HealthEvaluation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<HealthStatistics>,
}

/// A partial, filtered materialization of the entity hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthChunk {
    pub entity: EntityRef,
    pub aggregated_state: HealthState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HealthChunk>,
}

impl HealthChunk {
    /// Find a materialized descendant (or self).
    pub fn find(&self, entity: &EntityRef) -> Option<&HealthChunk> {
        if &self.entity == entity {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(entity))
    }

    /// Number of materialized nodes, root included.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(HealthChunk::node_count).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_constructors_set_identity() {
        let pid = Uuid::from_u128(7);
        assert_eq!(EntityHealthQuery::partition(pid).entity, EntityRef::partition(pid));
        assert_eq!(
            EntityHealthQuery::deployed_application("app", "n1").entity,
            EntityRef::deployed_application("app", "n1")
        );
        let q = EntityHealthQuery::cluster().with_statistics();
        assert!(q.include_statistics);
        assert_eq!(q.events_filter, HealthStateFilter::DEFAULT);
    }

    #[test]
    fn query_deserializes_with_defaults() {
        let q: EntityHealthQuery =
            serde_json::from_str(r#"{"entity":{"kind":"node","node_name":"n1"}}"#).unwrap();
        assert_eq!(q, EntityHealthQuery::node("n1"));

        let q: HealthChunkQuery = serde_json::from_str(r#"{"root":{"kind":"cluster"}}"#).unwrap();
        assert!(q.child_filters.is_empty());
    }

    #[test]
    fn statistics_count_by_kind() {
        let mut stats = HealthStatistics::default();
        stats.add(EntityKind::Node, HealthState::Ok);
        stats.add(EntityKind::Node, HealthState::Error);
        stats.add(EntityKind::Application, HealthState::Warning);

        let nodes = stats.count(EntityKind::Node);
        assert_eq!((nodes.ok, nodes.error, nodes.total()), (1, 1, 2));
        assert_eq!(stats.count(EntityKind::Replica).total(), 0);
    }

    #[test]
    fn chunk_find_and_len() {
        let chunk = HealthChunk {
            entity: EntityRef::Cluster,
            aggregated_state: HealthState::Warning,
            children: vec![HealthChunk {
                entity: EntityRef::node("n1"),
                aggregated_state: HealthState::Warning,
                children: vec![],
            }],
        };
        assert_eq!(chunk.node_count(), 2);
        assert!(chunk.find(&EntityRef::node("n1")).is_some());
        assert!(chunk.find(&EntityRef::node("n2")).is_none());
    }

    #[test]
    fn evaluation_walk_visits_all_nodes() {
        let eval = HealthEvaluation {
            kind: EvaluationKind::Reports {
                entity: EntityRef::node("n1"),
            },
            aggregated_state: HealthState::Error,
            description: String::new(),
            children: vec![HealthEvaluation {
                kind: EvaluationKind::Report {
                    source_id: "S".to_string(),
                    property: "P".to_string(),
                },
                aggregated_state: HealthState::Error,
                description: String::new(),
                children: vec![],
            }],
        };
        assert_eq!(eval.walk().len(), 2);
    }
}
