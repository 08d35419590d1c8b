//! vitalgrid-store: persistence substrate for the health ledger.
//!
//! The ledger keeps its working set in memory and writes every accepted
//! change through a [`ReportStore`] before making it visible. On start-up
//! the ledger reloads from the store, so reports and their receipt
//! timestamps survive restarts.
//!
//! [`RedbReportStore`] is backed by [redb](https://docs.rs/redb) and is
//! `Clone` + `Send` + `Sync` (an `Arc<Database>` inside).

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StoreError, StoreResult};
pub use store::{RedbReportStore, ReportStore};
