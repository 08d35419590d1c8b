//! HealthLedger: the accepted reports, one per (entity, source, property).
//!
//! Every entity owns a bucket behind its own mutex. A write locks only the
//! bucket of its entity, so the compare-and-replace on sequence numbers is
//! atomic per key without any ledger-wide lock. Changes are written through
//! the [`ReportStore`] before they become visible in memory; a failed
//! persist leaves the ledger untouched.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};
use vitalgrid_core::{
    Clock, EntityRef, HealthError, HealthReport, HealthResult, LedgerConfig, LedgerEntry,
    SystemClock,
};
use vitalgrid_store::{ReportStore, StoreResult};

/// (source_id, property) within one entity.
type SlotKey = (String, String);

#[derive(Debug, Default)]
struct Bucket {
    entries: BTreeMap<SlotKey, LedgerEntry>,
    /// Highest entity incarnation seen.
    instance_id: Option<u64>,
    /// Set once the bucket has been unlinked from the map. Writers that
    /// raced with the unlink must look the entity up again.
    retired: bool,
}

type SharedBucket = Arc<Mutex<Bucket>>;

fn lock(bucket: &SharedBucket) -> MutexGuard<'_, Bucket> {
    bucket.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LedgerStats {
    pub entities: usize,
    pub entries: usize,
}

pub struct HealthLedger {
    buckets: DashMap<EntityRef, SharedBucket>,
    /// Live entries across all buckets. Incremented by reservation before
    /// an insert so concurrent writers never overshoot the global limit.
    total: AtomicUsize,
    store: Option<Arc<dyn ReportStore>>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl HealthLedger {
    /// A memory-only ledger on the system clock.
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            total: AtomicUsize::new(0),
            store: None,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// A ledger writing through `store`, preloaded with everything the
    /// store holds. Persisted receipt times are kept, so expiry carries on
    /// across restarts.
    pub fn open(config: LedgerConfig, store: Arc<dyn ReportStore>) -> HealthResult<Self> {
        let mut ledger = Self::new(config);
        ledger.store = Some(store);
        let entries = ledger.persist("load entries", |s| s.load_entries())?;
        let count = entries.len();
        for entry in entries {
            let bucket = ledger.bucket_for_write(&entry.report.entity);
            let mut guard = lock(&bucket);
            guard.instance_id = guard.instance_id.max(entry.report.instance_id);
            let slot = (entry.report.source_id.clone(), entry.report.property.clone());
            guard.entries.insert(slot, entry);
        }
        ledger.total.store(count, Ordering::SeqCst);
        info!(entries = count, entities = ledger.buckets.len(), "ledger reloaded");
        Ok(ledger)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// The ledger's receipt-time clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Accept or reject one report.
    ///
    /// A report for a new key is inserted unconditionally; a report for an
    /// existing key replaces it only with a strictly greater sequence
    /// number. Rejections leave the ledger unchanged.
    pub fn report(&self, mut report: HealthReport) -> HealthResult<()> {
        report.validate()?;
        if report.truncate_description(self.config.max_description_len) {
            debug!(key = %report.key(), "report description truncated");
        }

        loop {
            let bucket = self.bucket_for_write(&report.entity);
            let mut guard = lock(&bucket);
            if guard.retired {
                continue;
            }
            let now = self.clock.now();
            self.resolve_locked(&mut guard, now);

            let entity = report.entity.clone();
            let result = self.apply_locked(&mut guard, report, now);
            match &result {
                Err(e @ HealthError::StaleReport(_)) => debug!(error = %e, "report rejected"),
                Err(e @ HealthError::MaxReportsReached(_)) => {
                    warn!(error = %e, "report rejected at capacity");
                }
                _ => {}
            }
            if result.is_err() && guard.entries.is_empty() {
                self.retire(&entity, &bucket, &mut guard);
            }
            return result;
        }
    }

    fn apply_locked(
        &self,
        bucket: &mut Bucket,
        report: HealthReport,
        now: DateTime<Utc>,
    ) -> HealthResult<()> {
        let key = report.key();
        if let (Some(incoming), Some(current)) = (report.instance_id, bucket.instance_id) {
            if incoming < current {
                return Err(HealthError::StaleReport(format!(
                    "{key}: instance {incoming} is older than {current}"
                )));
            }
            if incoming > current {
                return self.reset_locked(bucket, report, now);
            }
        }

        let slot = (report.source_id.clone(), report.property.clone());
        let previous = match bucket.entries.get(&slot) {
            Some(existing) if report.sequence_number <= existing.report.sequence_number => {
                return Err(HealthError::StaleReport(format!(
                    "{key}: sequence {} is not greater than {}",
                    report.sequence_number, existing.report.sequence_number
                )));
            }
            other => other,
        };
        let replacing = previous.is_some();

        if !replacing {
            // Expired entries kept for display do not hold a slot.
            let live = bucket.entries.values().filter(|e| !e.is_expired).count();
            if live >= self.config.max_reports_per_entity {
                return Err(HealthError::MaxReportsReached(format!(
                    "{} already has {live} live reports",
                    report.entity
                )));
            }
            self.reserve()?;
        }

        let instance_id = report.instance_id;
        let entry = match previous {
            Some(existing) => existing.replaced_by(report, now),
            None => LedgerEntry::new(report, now),
        };
        if let Err(e) = self.persist("put entry", |s| s.put_entry(&entry)) {
            if !replacing {
                self.total.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(e);
        }
        debug!(%key, seq = entry.report.sequence_number, state = %entry.report.state, "report accepted");
        bucket.entries.insert(slot, entry);
        bucket.instance_id = bucket.instance_id.max(instance_id);
        Ok(())
    }

    /// A newer incarnation of the entity: everything known about the old
    /// one is dropped and the report becomes the only entry.
    fn reset_locked(
        &self,
        bucket: &mut Bucket,
        report: HealthReport,
        now: DateTime<Utc>,
    ) -> HealthResult<()> {
        let previous = bucket.entries.len();
        if previous == 0 {
            self.reserve()?;
        }
        let instance_id = report.instance_id;
        let entry = LedgerEntry::new(report, now);
        if let Err(e) = self.persist("replace entity", |s| s.replace_entity(&entry)) {
            if previous == 0 {
                self.total.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(e);
        }
        if previous > 1 {
            self.total.fetch_sub(previous - 1, Ordering::SeqCst);
        }
        info!(entity = %entry.report.entity, ?instance_id, dropped = previous, "entity incarnation replaced");
        bucket.entries.clear();
        let slot = (entry.report.source_id.clone(), entry.report.property.clone());
        bucket.entries.insert(slot, entry);
        bucket.instance_id = instance_id;
        Ok(())
    }

    fn reserve(&self) -> HealthResult<()> {
        let max = self.config.max_reports_total;
        self.total
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| {
                (t < max).then_some(t + 1)
            })
            .map(|_| ())
            .map_err(|t| {
                HealthError::MaxReportsReached(format!("ledger holds {t} of {max} reports"))
            })
    }

    /// Purge every entry of an entity. Returns the number removed.
    pub fn remove_entity(&self, entity: &EntityRef) -> HealthResult<usize> {
        self.remove_entity_where(entity, |_| true)
    }

    /// Purge every entry of an entity unless one of them was written after
    /// `cutoff`. The age check and the purge share the bucket lock, so a
    /// report accepted concurrently is never dropped.
    pub fn remove_entity_if_older(
        &self,
        entity: &EntityRef,
        cutoff: DateTime<Utc>,
    ) -> HealthResult<usize> {
        self.remove_entity_where(entity, |bucket| {
            bucket.entries.values().all(|e| e.last_modified_utc <= cutoff)
        })
    }

    fn remove_entity_where(
        &self,
        entity: &EntityRef,
        eligible: impl FnOnce(&Bucket) -> bool,
    ) -> HealthResult<usize> {
        let Some(bucket) = self.existing_bucket(entity) else {
            return Ok(0);
        };
        let mut guard = lock(&bucket);
        if guard.retired || !eligible(&*guard) {
            return Ok(0);
        }
        self.persist("delete entity", |s| s.delete_entity(entity))?;
        let count = guard.entries.len();
        guard.entries.clear();
        self.total.fetch_sub(count, Ordering::SeqCst);
        self.retire(entity, &bucket, &mut guard);
        info!(%entity, count, "entity reports removed");
        Ok(count)
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Entries of `entity` after expiry resolution. Expired entries marked
    /// remove-when-expired are gone; other expired entries are returned
    /// with `is_expired` set.
    pub fn entries(&self, entity: &EntityRef) -> Vec<LedgerEntry> {
        let Some(bucket) = self.existing_bucket(entity) else {
            return Vec::new();
        };
        let mut guard = lock(&bucket);
        self.resolve_and_retire(entity, &bucket, &mut guard);
        guard
            .entries
            .values()
            .filter(|e| !(e.is_expired && e.report.remove_when_expired))
            .cloned()
            .collect()
    }

    /// Resolve expiry for one entity. Returns the number of entries
    /// physically removed.
    pub fn resolve_expiry(&self, entity: &EntityRef) -> usize {
        let Some(bucket) = self.existing_bucket(entity) else {
            return 0;
        };
        let mut guard = lock(&bucket);
        self.resolve_and_retire(entity, &bucket, &mut guard)
    }

    /// Whether the ledger holds any visible entry for `entity`.
    pub fn has_entity(&self, entity: &EntityRef) -> bool {
        !self.entries(entity).is_empty()
    }

    /// Snapshot of the entities currently holding entries.
    pub fn entity_keys(&self) -> Vec<EntityRef> {
        self.buckets.iter().map(|b| b.key().clone()).collect()
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            entities: self.buckets.len(),
            entries: self.total.load(Ordering::SeqCst),
        }
    }

    // ── Internals ──────────────────────────────────────────────────

    fn existing_bucket(&self, entity: &EntityRef) -> Option<SharedBucket> {
        self.buckets.get(entity).map(|b| Arc::clone(b.value()))
    }

    fn bucket_for_write(&self, entity: &EntityRef) -> SharedBucket {
        if let Some(bucket) = self.existing_bucket(entity) {
            return bucket;
        }
        Arc::clone(self.buckets.entry(entity.clone()).or_default().value())
    }

    fn resolve_and_retire(
        &self,
        entity: &EntityRef,
        bucket: &SharedBucket,
        guard: &mut Bucket,
    ) -> usize {
        if guard.retired {
            return 0;
        }
        let removed = self.resolve_locked(guard, self.clock.now());
        if guard.entries.is_empty() {
            self.retire(entity, bucket, guard);
        }
        removed
    }

    /// Remove expired remove-when-expired entries and flag the rest. The
    /// bucket lock makes the physical removal happen exactly once.
    fn resolve_locked(&self, bucket: &mut Bucket, now: DateTime<Utc>) -> usize {
        let expired: Vec<SlotKey> = bucket
            .entries
            .iter()
            .filter(|(_, e)| e.report.remove_when_expired && e.is_expired_at(now))
            .map(|(slot, _)| slot.clone())
            .collect();

        let mut removed = 0;
        for slot in expired {
            let Some(key) = bucket.entries.get(&slot).map(LedgerEntry::key) else {
                continue;
            };
            match self.persist("delete expired entry", |s| s.delete_entry(&key)) {
                Ok(_) => {
                    bucket.entries.remove(&slot);
                    self.total.fetch_sub(1, Ordering::SeqCst);
                    removed += 1;
                    debug!(%key, "expired report removed");
                }
                Err(e) => {
                    warn!(%key, error = %e, "failed to remove expired report, will retry");
                }
            }
        }
        for entry in bucket.entries.values_mut() {
            entry.is_expired = entry.is_expired_at(now);
        }
        removed
    }

    /// Unlink an empty bucket. Called with the bucket lock held.
    fn retire(&self, entity: &EntityRef, bucket: &SharedBucket, guard: &mut Bucket) {
        guard.retired = true;
        self.buckets
            .remove_if(entity, |_, current| Arc::ptr_eq(current, bucket));
    }

    /// Run a store operation with bounded retries on transient failures.
    /// Without a store this is a no-op.
    fn persist<T: Default>(
        &self,
        what: &str,
        op: impl Fn(&dyn ReportStore) -> StoreResult<T>,
    ) -> HealthResult<T> {
        let Some(store) = &self.store else {
            return Ok(T::default());
        };
        let mut backoff = self.config.retry_backoff();
        let mut attempt = 0;
        loop {
            match op(store.as_ref()) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.store_retry_attempts => {
                    attempt += 1;
                    warn!(what, attempt, error = %e, "transient store failure, retrying");
                    thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use vitalgrid_core::{ErrorKind, HealthState, ManualClock};
    use vitalgrid_store::{RedbReportStore, StoreError};

    fn config() -> LedgerConfig {
        LedgerConfig {
            store_retry_backoff: "1ms".to_string(),
            ..LedgerConfig::default()
        }
    }

    fn ledger_with_clock() -> (HealthLedger, ManualClock) {
        let clock = ManualClock::default();
        let ledger = HealthLedger::new(config()).with_clock(Arc::new(clock.clone()));
        (ledger, clock)
    }

    fn report(node: &str, source: &str, property: &str, seq: u64) -> HealthReport {
        HealthReport::new(EntityRef::node(node), source, property, HealthState::Warning, seq)
    }

    /// Store that fails the first `failures` writes with a transient error.
    struct FlakyStore {
        inner: RedbReportStore,
        failures: AtomicU32,
        transient: bool,
    }

    impl FlakyStore {
        fn new(failures: u32, transient: bool) -> Self {
            Self {
                inner: RedbReportStore::open_in_memory().unwrap(),
                failures: AtomicU32::new(failures),
                transient,
            }
        }

        fn trip(&self) -> StoreResult<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(());
            }
            self.failures.store(left - 1, Ordering::SeqCst);
            if self.transient {
                Err(StoreError::Unavailable("disk busy".to_string()))
            } else {
                Err(StoreError::Serialize("bad value".to_string()))
            }
        }
    }

    impl ReportStore for FlakyStore {
        fn put_entry(&self, entry: &LedgerEntry) -> StoreResult<()> {
            self.trip()?;
            self.inner.put_entry(entry)
        }
        fn delete_entry(&self, key: &vitalgrid_core::EntryKey) -> StoreResult<bool> {
            self.trip()?;
            self.inner.delete_entry(key)
        }
        fn delete_entity(&self, entity: &EntityRef) -> StoreResult<u32> {
            self.trip()?;
            self.inner.delete_entity(entity)
        }
        fn replace_entity(&self, entry: &LedgerEntry) -> StoreResult<()> {
            self.trip()?;
            self.inner.replace_entity(entry)
        }
        fn load_entries(&self) -> StoreResult<Vec<LedgerEntry>> {
            self.inner.load_entries()
        }
    }

    // ── Sequencing ─────────────────────────────────────────────────

    #[test]
    fn first_report_is_baseline() {
        let (ledger, _) = ledger_with_clock();
        ledger.report(report("n1", "S", "disk", 42)).unwrap();
        let entries = ledger.entries(&EntityRef::node("n1"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].report.sequence_number, 42);
    }

    #[test]
    fn higher_sequence_replaces() {
        let (ledger, _) = ledger_with_clock();
        ledger.report(report("n1", "S", "disk", 1)).unwrap();
        ledger
            .report(report("n1", "S", "disk", 2).with_description("recovered"))
            .unwrap();
        let entries = ledger.entries(&EntityRef::node("n1"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].report.description, "recovered");
        assert_eq!(ledger.stats().entries, 1);
    }

    #[test]
    fn equal_or_lower_sequence_is_stale() {
        let (ledger, _) = ledger_with_clock();
        ledger.report(report("n1", "S", "disk", 5)).unwrap();
        for seq in [5, 3] {
            let err = ledger.report(report("n1", "S", "disk", seq)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::StaleReport);
        }
        assert_eq!(ledger.entries(&EntityRef::node("n1"))[0].report.sequence_number, 5);
    }

    #[test]
    fn sequences_are_per_key() {
        let (ledger, _) = ledger_with_clock();
        ledger.report(report("n1", "S", "disk", 5)).unwrap();
        ledger.report(report("n1", "S", "cpu", 1)).unwrap();
        ledger.report(report("n1", "T", "disk", 1)).unwrap();
        ledger.report(report("n2", "S", "disk", 1)).unwrap();
        assert_eq!(ledger.stats(), LedgerStats { entities: 2, entries: 4 });
    }

    #[test]
    fn receipt_time_comes_from_ledger_clock() {
        let (ledger, clock) = ledger_with_clock();
        let reporter_time = DateTime::<Utc>::from_timestamp(1_000, 0).unwrap();
        ledger
            .report(report("n1", "S", "disk", 1).with_source_timestamp(reporter_time))
            .unwrap();
        let entry = &ledger.entries(&EntityRef::node("n1"))[0];
        assert_eq!(entry.last_modified_utc, clock.now());
        assert_eq!(entry.report.source_utc_timestamp, reporter_time);
    }

    #[test]
    fn malformed_reports_are_invalid() {
        let (ledger, _) = ledger_with_clock();
        let err = ledger.report(report("", "S", "disk", 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = ledger.report(report("n1", "", "disk", 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(ledger.stats(), LedgerStats::default());
    }

    #[test]
    fn long_descriptions_are_truncated() {
        let config = LedgerConfig {
            max_description_len: 32,
            ..config()
        };
        let ledger = HealthLedger::new(config);
        ledger
            .report(report("n1", "S", "disk", 1).with_description("x".repeat(100)))
            .unwrap();
        let entry = &ledger.entries(&EntityRef::node("n1"))[0];
        assert!(entry.report.description.len() <= 32);
        assert!(entry.report.description.ends_with("[Truncated]"));
    }

    // ── Instances ──────────────────────────────────────────────────

    #[test]
    fn newer_instance_replaces_everything() {
        let (ledger, _) = ledger_with_clock();
        ledger.report(report("n1", "S", "disk", 10).with_instance(1)).unwrap();
        ledger.report(report("n1", "T", "cpu", 10).with_instance(1)).unwrap();

        ledger.report(report("n1", "S", "disk", 1).with_instance(2)).unwrap();
        let entries = ledger.entries(&EntityRef::node("n1"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].report.sequence_number, 1);
        assert_eq!(ledger.stats().entries, 1);
    }

    #[test]
    fn older_instance_is_stale() {
        let (ledger, _) = ledger_with_clock();
        ledger.report(report("n1", "S", "disk", 1).with_instance(5)).unwrap();
        let err = ledger
            .report(report("n1", "S", "disk", 99).with_instance(4))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StaleReport);
    }

    // ── Capacity ───────────────────────────────────────────────────

    #[test]
    fn per_entity_limit() {
        let config = LedgerConfig {
            max_reports_per_entity: 2,
            ..config()
        };
        let ledger = HealthLedger::new(config);
        ledger.report(report("n1", "S", "a", 1)).unwrap();
        ledger.report(report("n1", "S", "b", 1)).unwrap();
        let err = ledger.report(report("n1", "S", "c", 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MaxReportsReached);
        // Replacing an existing key is still allowed at the limit.
        ledger.report(report("n1", "S", "a", 2)).unwrap();
        // Other entities are unaffected.
        ledger.report(report("n2", "S", "c", 1)).unwrap();
    }

    #[test]
    fn expired_entries_do_not_hold_a_per_entity_slot() {
        let clock = ManualClock::default();
        let config = LedgerConfig {
            max_reports_per_entity: 1,
            ..config()
        };
        let ledger = HealthLedger::new(config).with_clock(Arc::new(clock.clone()));
        ledger
            .report(report("n1", "S", "a", 1).with_ttl(Duration::from_secs(10)))
            .unwrap();
        clock.advance(Duration::from_secs(11));

        ledger.report(report("n1", "S", "b", 1)).unwrap();
        let err = ledger.report(report("n1", "S", "c", 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MaxReportsReached);

        let entries = ledger.entries(&EntityRef::node("n1"));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.iter().filter(|e| !e.is_expired).count(), 1);
    }

    #[test]
    fn global_limit_and_no_leaked_bucket() {
        let config = LedgerConfig {
            max_reports_total: 2,
            ..config()
        };
        let ledger = HealthLedger::new(config);
        ledger.report(report("n1", "S", "a", 1)).unwrap();
        ledger.report(report("n2", "S", "a", 1)).unwrap();
        let err = ledger.report(report("n3", "S", "a", 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MaxReportsReached);
        assert_eq!(ledger.stats(), LedgerStats { entities: 2, entries: 2 });
    }

    #[test]
    fn concurrent_writers_never_exceed_global_limit() {
        let config = LedgerConfig {
            max_reports_total: 50,
            ..config()
        };
        let ledger = Arc::new(HealthLedger::new(config));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for i in 0..20 {
                        let _ = ledger.report(report(&format!("n{t}"), "S", &format!("p{i}"), 1));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ledger.stats().entries, 50);
    }

    #[test]
    fn racing_writers_on_one_key_accept_each_sequence_once() {
        let ledger = Arc::new(HealthLedger::new(config()));
        let threads = 8u64;
        let per_thread = 50u64;
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    // Thread t submits t+1, t+1+threads, ... so sequences interleave.
                    let mut accepted = Vec::new();
                    for i in 0..per_thread {
                        let seq = 1 + t + i * threads;
                        match ledger.report(report("n1", "S", "disk", seq)) {
                            Ok(()) => accepted.push(seq),
                            Err(e) => assert_eq!(e.kind(), ErrorKind::StaleReport),
                        }
                    }
                    accepted
                })
            })
            .collect();

        let mut accepted: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = accepted.len();
        accepted.sort_unstable();
        accepted.dedup();
        assert_eq!(accepted.len(), total);

        let max = threads * per_thread;
        assert_eq!(accepted.last(), Some(&max));
        let entries = ledger.entries(&EntityRef::node("n1"));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].report.sequence_number, max);
        assert_eq!(ledger.stats().entries, 1);
    }

    // ── Expiry ─────────────────────────────────────────────────────

    #[test]
    fn removable_entries_disappear_after_ttl() {
        let (ledger, clock) = ledger_with_clock();
        ledger
            .report(
                report("n1", "S", "disk", 1)
                    .with_ttl(Duration::from_secs(60))
                    .remove_when_expired(true),
            )
            .unwrap();

        clock.advance(Duration::from_secs(59));
        assert_eq!(ledger.entries(&EntityRef::node("n1")).len(), 1);

        clock.advance(Duration::from_secs(2));
        assert!(ledger.entries(&EntityRef::node("n1")).is_empty());
        assert_eq!(ledger.stats(), LedgerStats::default());
    }

    #[test]
    fn non_removable_entries_are_flagged() {
        let (ledger, clock) = ledger_with_clock();
        ledger
            .report(report("n1", "S", "disk", 1).with_ttl(Duration::from_secs(60)))
            .unwrap();
        clock.advance(Duration::from_secs(61));

        let entries = ledger.entries(&EntityRef::node("n1"));
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_expired);

        // A fresh report revives the key.
        ledger
            .report(report("n1", "S", "disk", 2).with_ttl(Duration::from_secs(60)))
            .unwrap();
        assert!(!ledger.entries(&EntityRef::node("n1"))[0].is_expired);
    }

    #[test]
    fn expired_key_accepts_a_new_baseline() {
        let (ledger, clock) = ledger_with_clock();
        ledger
            .report(
                report("n1", "S", "disk", 9)
                    .with_ttl(Duration::from_secs(5))
                    .remove_when_expired(true),
            )
            .unwrap();
        clock.advance(Duration::from_secs(6));
        ledger.report(report("n1", "S", "disk", 1)).unwrap();
        assert_eq!(ledger.entries(&EntityRef::node("n1"))[0].report.sequence_number, 1);
    }

    #[test]
    fn concurrent_readers_remove_once() {
        let (ledger, clock) = ledger_with_clock();
        let ledger = Arc::new(ledger);
        for i in 0..10 {
            ledger
                .report(
                    report("n1", "S", &format!("p{i}"), 1)
                        .with_ttl(Duration::from_secs(1))
                        .remove_when_expired(true),
                )
                .unwrap();
        }
        clock.advance(Duration::from_secs(2));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || ledger.resolve_expiry(&EntityRef::node("n1")))
            })
            .collect();
        let removed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(removed, 10);
        assert_eq!(ledger.stats().entries, 0);
    }

    // ── Removal ────────────────────────────────────────────────────

    #[test]
    fn remove_entity_purges_all_entries() {
        let (ledger, _) = ledger_with_clock();
        ledger.report(report("n1", "S", "a", 1)).unwrap();
        ledger.report(report("n1", "S", "b", 1)).unwrap();
        ledger.report(report("n2", "S", "a", 1)).unwrap();

        assert_eq!(ledger.remove_entity(&EntityRef::node("n1")).unwrap(), 2);
        assert_eq!(ledger.remove_entity(&EntityRef::node("n1")).unwrap(), 0);
        assert!(!ledger.has_entity(&EntityRef::node("n1")));
        assert_eq!(ledger.stats(), LedgerStats { entities: 1, entries: 1 });

        // The entity can report again afterwards.
        ledger.report(report("n1", "S", "a", 1)).unwrap();
    }

    #[test]
    fn conditional_purge_spares_recent_writes() {
        let (ledger, clock) = ledger_with_clock();
        ledger.report(report("n1", "S", "a", 1)).unwrap();
        clock.advance(Duration::from_secs(120));
        ledger.report(report("n1", "S", "b", 1)).unwrap();

        let cutoff = clock.now() - chrono::Duration::seconds(60);
        assert_eq!(ledger.remove_entity_if_older(&EntityRef::node("n1"), cutoff).unwrap(), 0);
        assert_eq!(ledger.entries(&EntityRef::node("n1")).len(), 2);

        clock.advance(Duration::from_secs(61));
        let cutoff = clock.now() - chrono::Duration::seconds(60);
        assert_eq!(ledger.remove_entity_if_older(&EntityRef::node("n1"), cutoff).unwrap(), 2);
        assert_eq!(ledger.stats(), LedgerStats::default());
    }

    // ── Transitions ────────────────────────────────────────────────

    fn with_state(seq: u64, state: HealthState) -> HealthReport {
        HealthReport::new(EntityRef::node("n1"), "S", "disk", state, seq)
    }

    #[test]
    fn state_change_stamps_transition_time() {
        let (ledger, clock) = ledger_with_clock();
        let t0 = clock.now();
        ledger.report(with_state(1, HealthState::Ok)).unwrap();
        clock.advance(Duration::from_secs(30));
        let t1 = clock.now();
        ledger.report(with_state(2, HealthState::Error)).unwrap();

        let entry = &ledger.entries(&EntityRef::node("n1"))[0];
        assert_eq!(entry.last_ok_transition_utc, Some(t0));
        assert_eq!(entry.last_error_transition_utc, Some(t1));
        assert_eq!(entry.last_warning_transition_utc, None);
    }

    #[test]
    fn same_state_replacement_keeps_transition_time() {
        let (ledger, clock) = ledger_with_clock();
        let t0 = clock.now();
        ledger.report(with_state(1, HealthState::Warning)).unwrap();
        clock.advance(Duration::from_secs(30));
        ledger.report(with_state(2, HealthState::Warning)).unwrap();

        let entry = &ledger.entries(&EntityRef::node("n1"))[0];
        assert_eq!(entry.last_modified_utc, clock.now());
        assert_eq!(entry.last_warning_transition_utc, Some(t0));
    }

    // ── Persistence ────────────────────────────────────────────────

    #[test]
    fn transient_store_failures_are_retried() {
        let store = Arc::new(FlakyStore::new(2, true));
        let ledger = HealthLedger::open(config(), store.clone()).unwrap();
        ledger.report(report("n1", "S", "disk", 1)).unwrap();
        assert_eq!(store.inner.len().unwrap(), 1);
    }

    #[test]
    fn exhausted_retries_surface_transient_without_side_effects() {
        let store = Arc::new(FlakyStore::new(10, true));
        let ledger = HealthLedger::open(config(), store).unwrap();
        let err = ledger.report(report("n1", "S", "disk", 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_retryable());
        assert_eq!(ledger.stats(), LedgerStats::default());
    }

    #[test]
    fn permanent_store_failures_are_not_retried() {
        let store = Arc::new(FlakyStore::new(1, false));
        let ledger = HealthLedger::open(config(), store.clone()).unwrap();
        let err = ledger.report(report("n1", "S", "disk", 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(store.failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reopen_keeps_entries_and_receipt_times() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("health.redb");
        let clock = ManualClock::default();
        {
            let store = Arc::new(RedbReportStore::open(&path).unwrap());
            let ledger = HealthLedger::open(config(), store)
                .unwrap()
                .with_clock(Arc::new(clock.clone()));
            ledger
                .report(
                    report("n1", "S", "disk", 7)
                        .with_ttl(Duration::from_secs(60))
                        .remove_when_expired(true),
                )
                .unwrap();
        }

        let store = Arc::new(RedbReportStore::open(&path).unwrap());
        let ledger = HealthLedger::open(config(), store)
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        assert_eq!(ledger.stats(), LedgerStats { entities: 1, entries: 1 });
        let reloaded = &ledger.entries(&EntityRef::node("n1"))[0];
        assert_eq!(reloaded.last_warning_transition_utc, Some(clock.now()));
        let err = ledger.report(report("n1", "S", "disk", 7)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StaleReport);

        clock.advance(Duration::from_secs(61));
        assert!(ledger.entries(&EntityRef::node("n1")).is_empty());
    }
}
