//! vitalgrid-catalog: structural view of the entity hierarchy.
//!
//! The health engine does not own entity existence. It consumes it through
//! the [`EntityGraph`] trait, which maps an entity to its parent and its
//! children. [`InMemoryCatalog`] is the in-process implementation, fed
//! programmatically or from a TOML file.

pub mod catalog;
pub mod graph;

pub use catalog::InMemoryCatalog;
pub use graph::EntityGraph;
