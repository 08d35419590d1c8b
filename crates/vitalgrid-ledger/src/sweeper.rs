//! Background expiry sweep.
//!
//! Reads already resolve expiry for the entities they touch, so the sweeper
//! is optional. It bounds ledger growth by purging expired entries nobody
//! reads, and reports of entities that left the catalog.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use vitalgrid_catalog::EntityGraph;
use vitalgrid_core::{EntityRef, SweeperConfig};

use crate::ledger::HealthLedger;

/// Result of one sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SweepStats {
    pub entities_scanned: usize,
    pub expired_removed: usize,
    pub orphans_removed: usize,
}

impl SweepStats {
    fn add(&mut self, other: SweepStats) {
        self.entities_scanned += other.entities_scanned;
        self.expired_removed += other.expired_removed;
        self.orphans_removed += other.orphans_removed;
    }
}

fn sweep_batch(
    ledger: &HealthLedger,
    graph: Option<&dyn EntityGraph>,
    grace: Option<Duration>,
    batch: &[EntityRef],
) -> SweepStats {
    let mut stats = SweepStats::default();
    for entity in batch {
        stats.entities_scanned += 1;
        stats.expired_removed += ledger.resolve_expiry(entity);

        // Orphans: gone from the catalog and untouched for the grace period.
        let (Some(graph), Some(grace)) = (graph, grace) else {
            continue;
        };
        if graph.contains(entity) {
            continue;
        }
        let Some(cutoff) = chrono::Duration::from_std(grace)
            .ok()
            .and_then(|g| ledger.now().checked_sub_signed(g))
        else {
            continue;
        };
        match ledger.remove_entity_if_older(entity, cutoff) {
            Ok(0) => {}
            Ok(n) => {
                stats.orphans_removed += n;
                debug!(%entity, removed = n, "orphaned reports purged");
            }
            Err(e) => warn!(%entity, error = %e, "failed to purge orphaned reports"),
        }
    }
    stats
}

pub struct ExpirySweeper {
    ledger: Arc<HealthLedger>,
    graph: Option<Arc<dyn EntityGraph>>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(ledger: Arc<HealthLedger>, config: SweeperConfig) -> Self {
        Self {
            ledger,
            graph: None,
            config,
        }
    }

    /// Enable orphan purging against `graph` (needs `orphan_grace`).
    pub fn with_graph(mut self, graph: Arc<dyn EntityGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// One pass over a snapshot of the ledger's entities, in batches.
    /// Each batch runs on the blocking pool since store deletes and retry
    /// backoff block; locks are taken per entity.
    pub async fn sweep_once(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let entities = self.ledger.entity_keys();
        let batch_size = self.config.batch_size.max(1);
        let grace = self.config.orphan_grace();

        for batch in entities.chunks(batch_size) {
            let ledger = Arc::clone(&self.ledger);
            let graph = self.graph.clone();
            let batch = batch.to_vec();
            let swept = tokio::task::spawn_blocking(move || {
                sweep_batch(&ledger, graph.as_deref(), grace, &batch)
            })
            .await;
            match swept {
                Ok(batch_stats) => stats.add(batch_stats),
                Err(e) => warn!(error = %e, "sweep batch failed"),
            }
        }
        stats
    }

    /// Sweep every `interval` until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.interval();
        info!(?interval, batch_size = self.config.batch_size, "expiry sweeper starting");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let stats = self.sweep_once().await;
                    if stats.expired_removed > 0 || stats.orphans_removed > 0 {
                        info!(
                            scanned = stats.entities_scanned,
                            expired = stats.expired_removed,
                            orphans = stats.orphans_removed,
                            "sweep complete"
                        );
                    } else {
                        debug!(scanned = stats.entities_scanned, "sweep complete");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("expiry sweeper shutting down");
                    break;
                }
            }
        }
    }
}
