//! vitalgrid-client: the operation surface external callers use.
//!
//! [`HealthClient`] validates, authorizes and then runs each operation on
//! the blocking pool, racing it against the caller's timeout and
//! cancellation token. Cancellation is advisory: a report already handed to
//! the ledger may still land after the caller stopped waiting.

pub mod auth;
pub mod client;

pub use auth::{AllowAll, Authorizer, Operation};
pub use client::{CallOptions, HealthClient, SendOptions};
