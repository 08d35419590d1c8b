//! HealthClient: report, get-health and get-health-chunk with deadlines.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use vitalgrid_catalog::EntityGraph;
use vitalgrid_core::{
    CancelToken, EntityHealth, EntityHealthQuery, EntityRef, HealthChunk, HealthChunkQuery,
    HealthError, HealthReport, HealthResult,
};
use vitalgrid_eval::QueryEngine;
use vitalgrid_ledger::HealthLedger;

use crate::auth::{AllowAll, Authorizer, Operation};

/// Options for [`HealthClient::report_health`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Overrides the engine's default timeout.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

/// Options for the query operations.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Overrides the engine's default timeout.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl SendOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Clone)]
pub struct HealthClient {
    engine: QueryEngine,
    authorizer: Arc<dyn Authorizer>,
}

impl HealthClient {
    pub fn new(engine: QueryEngine) -> Self {
        Self {
            engine,
            authorizer: Arc::new(AllowAll),
        }
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn ledger(&self) -> &Arc<HealthLedger> {
        self.engine.ledger()
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Submit one report to the ledger.
    pub async fn report_health(&self, report: HealthReport, options: SendOptions) -> HealthResult<()> {
        self.authorizer
            .authorize(Operation::ReportHealth, &report.entity)?;
        let ledger = Arc::clone(self.engine.ledger());
        self.run(
            Operation::ReportHealth,
            options.timeout,
            options.cancel.as_ref(),
            move || ledger.report(report),
        )
        .await
    }

    pub async fn get_entity_health(
        &self,
        query: EntityHealthQuery,
        options: CallOptions,
    ) -> HealthResult<EntityHealth> {
        self.authorizer
            .authorize(Operation::GetEntityHealth, &query.entity)?;
        let engine = self.engine.clone();
        self.run(
            Operation::GetEntityHealth,
            options.timeout,
            options.cancel.as_ref(),
            move || engine.get_health(&query),
        )
        .await
    }

    pub async fn get_health_chunk(
        &self,
        query: HealthChunkQuery,
        options: CallOptions,
    ) -> HealthResult<HealthChunk> {
        self.authorizer
            .authorize(Operation::GetHealthChunk, &query.root)?;
        let engine = self.engine.clone();
        self.run(
            Operation::GetHealthChunk,
            options.timeout,
            options.cancel.as_ref(),
            move || engine.get_health_chunk(&query),
        )
        .await
    }

    /// Purge the ledger entries of `entity` and of its catalog descendants,
    /// after the entity was deleted (or is about to be) from the catalog.
    /// Returns the number of entries removed.
    pub async fn forget_entity(&self, entity: EntityRef, options: CallOptions) -> HealthResult<usize> {
        entity.validate()?;
        if entity == EntityRef::Cluster {
            return Err(HealthError::InvalidArgument(
                "the cluster cannot be forgotten".to_string(),
            ));
        }
        self.authorizer.authorize(Operation::ForgetEntity, &entity)?;
        let ledger = Arc::clone(self.engine.ledger());
        let graph: Arc<dyn EntityGraph> = Arc::clone(self.engine.graph());
        let depth_limit = self.engine.config().depth_limit;
        self.run(
            Operation::ForgetEntity,
            options.timeout,
            options.cancel.as_ref(),
            move || {
                let mut removed = 0;
                for e in graph.subtree(&entity, depth_limit) {
                    removed += ledger.remove_entity(&e)?;
                }
                Ok(removed)
            },
        )
        .await
    }

    /// Run `work` on the blocking pool, bounded by the timeout and the
    /// cancellation token. The work itself is never interrupted.
    async fn run<T, F>(
        &self,
        operation: Operation,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
        work: F,
    ) -> HealthResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> HealthResult<T> + Send + 'static,
    {
        let timeout = timeout.unwrap_or_else(|| self.engine.config().default_timeout());
        if timeout.is_zero() {
            return Err(HealthError::InvalidArgument(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(HealthError::Cancelled);
        }

        let handle = tokio::task::spawn_blocking(work);
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            joined = tokio::time::timeout(timeout, handle) => match joined {
                Ok(Ok(result)) => result,
                Ok(Err(e)) if e.is_panic() => {
                    warn!(%operation, "operation panicked");
                    Err(HealthError::Internal(format!("{operation} panicked")))
                }
                Ok(Err(e)) => Err(HealthError::CommunicationError(format!(
                    "{operation} worker failed: {e}"
                ))),
                Err(_) => {
                    debug!(%operation, ?timeout, "operation timed out");
                    Err(HealthError::OperationTimedOut(timeout))
                }
            },
            _ = cancelled => {
                debug!(%operation, "operation cancelled by caller");
                Err(HealthError::Cancelled)
            }
        }
    }
}
