//! Aggregation: own reports first, then children rolled up per kind.
//!
//! An [`Evaluator`] lives for one query. It memoizes every entity it
//! evaluates, so an entity reached twice is evaluated once and the whole
//! query sees a single state per entity.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::trace;
use vitalgrid_catalog::EntityGraph;
use vitalgrid_core::{
    EntityKind, EntityRef, EvaluationKind, HealthError, HealthEvaluation, HealthPolicy,
    HealthResult, HealthState, HealthStatistics, LedgerEntry, percent_of,
};
use vitalgrid_ledger::HealthLedger;

/// Everything known about one entity after evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluated {
    pub entity: EntityRef,
    /// Worst non-expired report, `Unknown` without reports.
    pub own_state: HealthState,
    pub aggregated_state: HealthState,
    /// Ledger entries after expiry resolution, expired ones flagged.
    pub reports: Vec<LedgerEntry>,
    /// Catalog children, in catalog order.
    pub children: Vec<EntityRef>,
    /// Evaluations that produced `aggregated_state`; empty when Ok or
    /// Unknown.
    pub unhealthy_evaluations: Vec<HealthEvaluation>,
}

pub struct Evaluator<'a> {
    ledger: &'a HealthLedger,
    graph: &'a dyn EntityGraph,
    policy: &'a HealthPolicy,
    depth_limit: usize,
    memo: HashMap<EntityRef, Arc<Evaluated>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        ledger: &'a HealthLedger,
        graph: &'a dyn EntityGraph,
        policy: &'a HealthPolicy,
        depth_limit: usize,
    ) -> Self {
        Self {
            ledger,
            graph,
            policy,
            depth_limit,
            memo: HashMap::new(),
        }
    }

    /// Evaluate `entity` and its whole subtree.
    pub fn evaluate(&mut self, entity: &EntityRef) -> HealthResult<Arc<Evaluated>> {
        self.evaluate_at(entity, 0)
    }

    /// An entity already evaluated by this query.
    pub fn get(&self, entity: &EntityRef) -> Option<&Arc<Evaluated>> {
        self.memo.get(entity)
    }

    /// Per-kind state counts over everything evaluated below `root`.
    pub fn statistics(&self, root: &EntityRef) -> HealthStatistics {
        let mut stats = HealthStatistics::default();
        let mut pending: Vec<&EntityRef> = self
            .memo
            .get(root)
            .map(|e| e.children.iter().collect())
            .unwrap_or_default();
        while let Some(entity) = pending.pop() {
            if let Some(e) = self.memo.get(entity) {
                stats.add(entity.kind(), e.aggregated_state);
                pending.extend(e.children.iter());
            }
        }
        stats
    }

    fn evaluate_at(&mut self, entity: &EntityRef, depth: usize) -> HealthResult<Arc<Evaluated>> {
        if let Some(done) = self.memo.get(entity) {
            return Ok(Arc::clone(done));
        }
        if depth > self.depth_limit {
            return Err(HealthError::EntityGraphTooDeep {
                entity: entity.to_string(),
                limit: self.depth_limit,
            });
        }

        let reports = self.ledger.entries(entity);
        let (own_state, own_eval) = self.own_state(entity, &reports);

        let children = self.graph.children(entity);
        let mut groups: BTreeMap<EntityKind, Vec<Arc<Evaluated>>> = BTreeMap::new();
        for child in &children {
            let evaluated = self.evaluate_at(child, depth + 1)?;
            groups.entry(child.kind()).or_default().push(evaluated);
        }

        let mut candidates: Vec<HealthEvaluation> = own_eval.into_iter().collect();
        let mut aggregated_state = own_state;
        for (kind, members) in &groups {
            if let Some((state, eval)) = self.roll_up(*kind, members) {
                aggregated_state = aggregated_state.max(state);
                candidates.extend(eval);
            }
        }

        let unhealthy_evaluations = if aggregated_state.is_unhealthy() {
            candidates
                .into_iter()
                .filter(|e| e.aggregated_state == aggregated_state)
                .collect()
        } else {
            Vec::new()
        };

        trace!(%entity, %own_state, %aggregated_state, "entity evaluated");
        let evaluated = Arc::new(Evaluated {
            entity: entity.clone(),
            own_state,
            aggregated_state,
            reports,
            children,
            unhealthy_evaluations,
        });
        self.memo.insert(entity.clone(), Arc::clone(&evaluated));
        Ok(evaluated)
    }

    /// Worst non-expired report, plus a `Reports` node citing the reports
    /// that hold the entity at that state when it is above Ok.
    fn own_state(
        &self,
        entity: &EntityRef,
        reports: &[LedgerEntry],
    ) -> (HealthState, Option<HealthEvaluation>) {
        let cwae = self.policy.consider_warning_as_error;
        let live: Vec<&LedgerEntry> = reports.iter().filter(|e| !e.is_expired).collect();
        let state = live
            .iter()
            .map(|e| e.evaluated_state(cwae))
            .max()
            .unwrap_or(HealthState::Unknown);
        if !state.is_unhealthy() {
            return (state, None);
        }

        let causes: Vec<HealthEvaluation> = live
            .iter()
            .filter(|e| e.evaluated_state(cwae) == state)
            .map(|e| HealthEvaluation {
                kind: EvaluationKind::Report {
                    source_id: e.report.source_id.clone(),
                    property: e.report.property.clone(),
                },
                aggregated_state: state,
                description: report_description(e),
                children: Vec::new(),
            })
            .collect();
        let eval = HealthEvaluation {
            kind: EvaluationKind::Reports {
                entity: entity.clone(),
            },
            aggregated_state: state,
            description: format!(
                "{} of {} reports on {entity} are {state}",
                causes.len(),
                live.len()
            ),
            children: causes,
        };
        (state, Some(eval))
    }

    /// Apply the policy threshold to one group of children. `None` when the
    /// group is excluded from aggregation.
    fn roll_up(
        &self,
        kind: EntityKind,
        members: &[Arc<Evaluated>],
    ) -> Option<(HealthState, Option<HealthEvaluation>)> {
        let threshold = self.policy.threshold_for(kind);
        let mut errors = 0;
        let mut warnings = 0;
        let mut unknown = 0;
        for m in members {
            match m.aggregated_state {
                HealthState::Error => errors += 1,
                HealthState::Warning => warnings += 1,
                HealthState::Unknown => unknown += 1,
                HealthState::Ok => {}
            }
        }
        // A group where nothing was evaluated says nothing about the parent,
        // even when its Unknown members widen the denominator.
        if unknown == members.len() {
            return None;
        }
        let total = if self.policy.count_unknown_children {
            members.len()
        } else {
            members.len() - unknown
        };

        let state = threshold.evaluate(errors, warnings, total)?;
        if !state.is_unhealthy() {
            return Some((state, None));
        }

        let cited: Vec<HealthEvaluation> = members
            .iter()
            .filter(|m| match state {
                HealthState::Error => m.aggregated_state == HealthState::Error,
                _ => m.aggregated_state.is_unhealthy(),
            })
            .map(|m| HealthEvaluation {
                kind: EvaluationKind::Entity {
                    entity: m.entity.clone(),
                },
                aggregated_state: m.aggregated_state,
                description: format!("{} is {}", m.entity, m.aggregated_state),
                children: m.unhealthy_evaluations.clone(),
            })
            .collect();

        let unhealthy = errors + warnings;
        let (counted, limit) = match state {
            HealthState::Error => (errors, threshold.max_percent_unhealthy),
            _ => (unhealthy, threshold.max_percent_warning),
        };
        let eval = HealthEvaluation {
            kind: EvaluationKind::Children {
                kind,
                total,
                unhealthy,
                max_percent_unhealthy: threshold.max_percent_unhealthy,
            },
            aggregated_state: state,
            description: format!(
                "{counted} of {total} {kind} children unhealthy ({}% > {limit}%)",
                percent_of(counted, total)
            ),
            children: cited,
        };
        Some((state, Some(eval)))
    }
}

fn report_description(entry: &LedgerEntry) -> String {
    let r = &entry.report;
    if r.description.is_empty() {
        format!("{}/{} reported {}", r.source_id, r.property, r.state)
    } else {
        format!("{}/{} reported {}: {}", r.source_id, r.property, r.state, r.description)
    }
}

/// Evaluate one entity with a fresh memo: its aggregated state and the
/// evaluations explaining it.
pub fn evaluate(
    ledger: &HealthLedger,
    graph: &dyn EntityGraph,
    entity: &EntityRef,
    policy: &HealthPolicy,
    depth_limit: usize,
) -> HealthResult<(HealthState, Vec<HealthEvaluation>)> {
    let evaluated = Evaluator::new(ledger, graph, policy, depth_limit).evaluate(entity)?;
    Ok((
        evaluated.aggregated_state,
        evaluated.unhealthy_evaluations.clone(),
    ))
}
