//! vitalgrid-api: REST API for VitalGrid.
//!
//! Thin JSON adapter over [`HealthClient`]. Every response uses the same
//! envelope: `{ "success": bool, "data"?: ..., "error"?: string,
//! "kind"?: error-kind }`.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/reports` | Submit a health report |
//! | POST | `/api/v1/health` | Evaluate one entity |
//! | POST | `/api/v1/health/chunk` | Evaluate a filtered subtree |
//! | POST | `/api/v1/entities/forget` | Purge an entity's reports and its descendants' |
//! | GET | `/api/v1/ledger/stats` | Ledger counters |
//!
//! Every POST accepts an optional `?timeout_ms=` overriding the engine's
//! default timeout.

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use vitalgrid_client::HealthClient;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub client: HealthClient,
}

/// Build the complete API router.
pub fn build_router(client: HealthClient) -> Router {
    let api_routes = Router::new()
        .route("/reports", post(handlers::report_health))
        .route("/health", post(handlers::get_entity_health))
        .route("/health/chunk", post(handlers::get_health_chunk))
        .route("/entities/forget", post(handlers::forget_entity))
        .route("/ledger/stats", get(handlers::ledger_stats))
        .with_state(ApiState { client });

    Router::new().nest("/api/v1", api_routes)
}
