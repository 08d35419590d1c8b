//! ReportStore: write-through persistence for ledger entries.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use tracing::debug;
use vitalgrid_core::{EntityRef, EntryKey, LedgerEntry};

use crate::error::{StoreError, StoreResult};
use crate::tables::REPORTS;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Durable home of ledger entries. Each call is one atomic transaction.
pub trait ReportStore: Send + Sync {
    /// Insert or replace the entry under its (entity, source, property) key.
    fn put_entry(&self, entry: &LedgerEntry) -> StoreResult<()>;

    /// Remove one entry. Returns true if it existed.
    fn delete_entry(&self, key: &EntryKey) -> StoreResult<bool>;

    /// Remove every entry of an entity. Returns the number removed.
    fn delete_entity(&self, entity: &EntityRef) -> StoreResult<u32>;

    /// Atomically drop every entry of the entry's entity and store `entry`
    /// as its only one.
    fn replace_entity(&self, entry: &LedgerEntry) -> StoreResult<()>;

    /// Every persisted entry, in key order.
    fn load_entries(&self) -> StoreResult<Vec<LedgerEntry>>;
}

/// Thread-safe report store backed by redb.
#[derive(Clone)]
pub struct RedbReportStore {
    db: Arc<Database>,
}

impl RedbReportStore {
    /// Open (or create) a persistent report store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "report store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory report store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory report store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(REPORTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Number of persisted entries.
    pub fn len(&self) -> StoreResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
        table.len().map_err(map_err!(Read))
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Get one entry by key.
    pub fn get_entry(&self, key: &EntryKey) -> StoreResult<Option<LedgerEntry>> {
        let storage_key = key.storage_key();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
        match table.get(storage_key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let entry: LedgerEntry =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Entries of one entity (by key prefix scan).
    pub fn entries_for(&self, entity: &EntityRef) -> StoreResult<Vec<LedgerEntry>> {
        let prefix = EntryKey::entity_prefix(entity);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for item in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = item.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let entry: LedgerEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(entry);
        }
        Ok(results)
    }
}

/// Remove every key under `prefix` inside an open write table.
fn remove_prefix(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    prefix: &str,
) -> StoreResult<u32> {
    let keys: Vec<String> = {
        let mut keys = Vec::new();
        for item in table.range(prefix..).map_err(map_err!(Read))? {
            let (key, _) = item.map_err(map_err!(Read))?;
            let k = key.value();
            if !k.starts_with(prefix) {
                break;
            }
            keys.push(k.to_string());
        }
        keys
    };
    for key in &keys {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    Ok(keys.len() as u32)
}

impl ReportStore for RedbReportStore {
    fn put_entry(&self, entry: &LedgerEntry) -> StoreResult<()> {
        let key = entry.key().storage_key();
        let value = serde_json::to_vec(entry).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(key = %entry.key(), seq = entry.report.sequence_number, "entry stored");
        Ok(())
    }

    fn delete_entry(&self, key: &EntryKey) -> StoreResult<bool> {
        let storage_key = key.storage_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
            existed = table
                .remove(storage_key.as_str())
                .map_err(map_err!(Write))?
                .is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "entry deleted");
        Ok(existed)
    }

    fn delete_entity(&self, entity: &EntityRef) -> StoreResult<u32> {
        let prefix = EntryKey::entity_prefix(entity);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
            count = remove_prefix(&mut table, &prefix)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%entity, count, "entity entries deleted");
        Ok(count)
    }

    fn replace_entity(&self, entry: &LedgerEntry) -> StoreResult<()> {
        let prefix = EntryKey::entity_prefix(&entry.report.entity);
        let key = entry.key().storage_key();
        let value = serde_json::to_vec(entry).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
            remove_prefix(&mut table, &prefix)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(entity = %entry.report.entity, "entity entries replaced");
        Ok(())
    }

    fn load_entries(&self) -> StoreResult<Vec<LedgerEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(REPORTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for item in table.iter().map_err(map_err!(Read))? {
            let (_, value) = item.map_err(map_err!(Read))?;
            let entry: LedgerEntry =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(entry);
        }
        Ok(results)
    }
}
