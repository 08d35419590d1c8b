//! vitalgrid-core: shared vocabulary of the VitalGrid health engine.
//!
//! Every other crate speaks in these types: entity identities, health
//! reports and the ledger entries wrapping them, aggregation policies,
//! query shapes and their results, plus the error taxonomy.
//!
//! # Architecture
//!
//! ```text
//!  writes: HealthClient ──▶ HealthLedger ──▶ ReportStore (redb)
//!                                │
//!                          ExpirySweeper
//!
//!  reads:  HealthClient ──▶ QueryEngine ──▶ Evaluator ──▶ EntityGraph
//!                                                   └──▶ HealthLedger
//! ```
//!
//! Time is injected through [`Clock`] so expiry is testable without
//! sleeping.

pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod filter;
pub mod policy;
pub mod query;
pub mod types;

pub use cancel::CancelToken;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, LedgerConfig, QueryConfig, SweeperConfig, parse_duration};
pub use error::{ErrorKind, HealthError, HealthResult};
pub use filter::{ChunkFilter, HealthStateFilter};
pub use policy::{ChildThreshold, HealthPolicy, percent_of};
pub use query::*;
pub use types::*;
