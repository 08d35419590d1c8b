//! vitalgrid-ledger: accepted health reports and their lifecycle.
//!
//! [`HealthLedger`] holds one entry per (entity, source, property) and
//! enforces sequencing, entity incarnations and capacity limits. Expiry is
//! resolved lazily on every read; [`ExpirySweeper`] optionally purges
//! expired and orphaned entries in the background so the ledger stays
//! bounded.
//!
//! Locking is per entity: writers and readers of different entities never
//! contend, and there is no ledger-wide lock.

pub mod ledger;
pub mod sweeper;

pub use ledger::{HealthLedger, LedgerStats};
pub use sweeper::{ExpirySweeper, SweepStats};
