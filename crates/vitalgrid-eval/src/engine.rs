//! QueryEngine: answers entity health and health chunk queries.
//!
//! Both queries aggregate the full subtree below their target. Filters only
//! decide what is returned, so a filtered query reports the same aggregated
//! states as an unfiltered one over the same data.

use std::sync::Arc;

use tracing::debug;
use vitalgrid_catalog::EntityGraph;
use vitalgrid_core::{
    ChunkFilter, EntityHealth, EntityHealthQuery, EntityHealthState, EntityRef, HealthChunk,
    HealthChunkQuery, HealthError, HealthPolicy, HealthResult, QueryConfig,
};
use vitalgrid_ledger::HealthLedger;

use crate::evaluator::Evaluator;

#[derive(Clone)]
pub struct QueryEngine {
    ledger: Arc<HealthLedger>,
    graph: Arc<dyn EntityGraph>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(ledger: Arc<HealthLedger>, graph: Arc<dyn EntityGraph>, config: QueryConfig) -> Self {
        Self {
            ledger,
            graph,
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<HealthLedger> {
        &self.ledger
    }

    pub fn graph(&self) -> &Arc<dyn EntityGraph> {
        &self.graph
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Health of one entity: its own reports, its direct children's states
    /// and the evaluations explaining its aggregated state.
    pub fn get_health(&self, query: &EntityHealthQuery) -> HealthResult<EntityHealth> {
        let policy = self.prepare(&query.entity, query.policy.as_ref())?;
        let mut evaluator =
            Evaluator::new(&self.ledger, self.graph.as_ref(), &policy, self.config.depth_limit);
        let evaluated = evaluator.evaluate(&query.entity)?;

        let reports = evaluated
            .reports
            .iter()
            .filter(|e| query.events_filter.matches(e.report.state))
            .cloned()
            .collect();
        let children = evaluated
            .children
            .iter()
            .filter_map(|child| evaluator.get(child))
            .filter(|c| query.children_filter.matches(c.aggregated_state))
            .map(|c| EntityHealthState {
                entity: c.entity.clone(),
                aggregated_state: c.aggregated_state,
            })
            .collect();
        let statistics = query
            .include_statistics
            .then(|| evaluator.statistics(&query.entity));

        debug!(entity = %query.entity, state = %evaluated.aggregated_state, "entity health evaluated");
        Ok(EntityHealth {
            entity: query.entity.clone(),
            aggregated_state: evaluated.aggregated_state,
            reports,
            children,
            unhealthy_evaluations: evaluated.unhealthy_evaluations.clone(),
            statistics,
        })
    }

    /// A filtered view of the subtree below `query.root`.
    pub fn get_health_chunk(&self, query: &HealthChunkQuery) -> HealthResult<HealthChunk> {
        ChunkFilter::validate_all(&query.child_filters, self.config.depth_limit)?;
        let policy = self.prepare(&query.root, query.policy.as_ref())?;
        let mut evaluator =
            Evaluator::new(&self.ledger, self.graph.as_ref(), &policy, self.config.depth_limit);
        let root = evaluator.evaluate(&query.root)?;

        let children = if query.root_filter.matches(root.aggregated_state) {
            materialize(&evaluator, &root.children, &query.child_filters)
        } else {
            Vec::new()
        };
        debug!(root = %query.root, state = %root.aggregated_state, "health chunk evaluated");
        Ok(HealthChunk {
            entity: query.root.clone(),
            aggregated_state: root.aggregated_state,
            children,
        })
    }

    /// Validate the target and policy, and check the target exists.
    fn prepare(&self, entity: &EntityRef, policy: Option<&HealthPolicy>) -> HealthResult<HealthPolicy> {
        entity.validate()?;
        let policy = policy.cloned().unwrap_or_default();
        policy.validate()?;
        if !self.exists(entity) {
            return Err(HealthError::EntityNotFound(entity.to_string()));
        }
        Ok(policy)
    }

    /// Known to the catalog or holding reports. The cluster always exists.
    pub fn exists(&self, entity: &EntityRef) -> bool {
        *entity == EntityRef::Cluster || self.graph.contains(entity) || self.ledger.has_entity(entity)
    }
}

/// Children selected by `filters`, recursively. No filters, no children.
fn materialize(
    evaluator: &Evaluator<'_>,
    children: &[EntityRef],
    filters: &[ChunkFilter],
) -> Vec<HealthChunk> {
    if filters.is_empty() {
        return Vec::new();
    }
    children
        .iter()
        .filter_map(|child| {
            let evaluated = evaluator.get(child)?;
            let filter = ChunkFilter::select(filters, child)?;
            filter
                .state_filter
                .matches(evaluated.aggregated_state)
                .then(|| HealthChunk {
                    entity: child.clone(),
                    aggregated_state: evaluated.aggregated_state,
                    children: materialize(evaluator, &evaluated.children, &filter.child_filters),
                })
        })
        .collect()
}
