//! vitalgrid-eval: turns ledger entries and the entity graph into health.
//!
//! [`Evaluator`] aggregates one subtree under a [`HealthPolicy`]; the
//! [`QueryEngine`] wraps it with validation, existence checks and the
//! filtering the two query shapes need.
//!
//! [`HealthPolicy`]: vitalgrid_core::HealthPolicy

pub mod engine;
pub mod evaluator;

pub use engine::QueryEngine;
pub use evaluator::{Evaluated, Evaluator, evaluate};
