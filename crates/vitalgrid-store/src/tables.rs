//! redb table definitions for the report store.
//!
//! Keys are `&str`, values are JSON-serialized [`LedgerEntry`] bytes.
//!
//! [`LedgerEntry`]: vitalgrid_core::LedgerEntry

use redb::TableDefinition;

/// Ledger entries keyed by `{entity-json}\u{1f}{source_id}\u{1f}{property}`.
pub const REPORTS: TableDefinition<&str, &[u8]> = TableDefinition::new("reports");
