//! Authorization hook consulted before every client operation.

use std::fmt;

use vitalgrid_core::{EntityRef, HealthResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ReportHealth,
    GetEntityHealth,
    GetHealthChunk,
    ForgetEntity,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::ReportHealth => "report_health",
            Operation::GetEntityHealth => "get_entity_health",
            Operation::GetHealthChunk => "get_health_chunk",
            Operation::ForgetEntity => "forget_entity",
        };
        f.write_str(name)
    }
}

/// Decides whether an operation on `entity` may proceed. A denial should be
/// `HealthError::Unauthorized`.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, operation: Operation, entity: &EntityRef) -> HealthResult<()>;
}

/// Permits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _operation: Operation, _entity: &EntityRef) -> HealthResult<()> {
        Ok(())
    }
}
