//! REST API handlers.
//!
//! Each handler forwards to the `HealthClient` and maps `ErrorKind` to an
//! HTTP status.

use std::time::Duration;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;
use vitalgrid_client::{CallOptions, SendOptions};
use vitalgrid_core::{
    EntityHealthQuery, EntityRef, ErrorKind, HealthChunkQuery, HealthError, HealthReport,
};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        })
    }
}

fn error_response(err: &HealthError) -> Response {
    let status = status_for(err.kind());
    debug!(kind = %err.kind(), %status, error = %err, "request failed");
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(err.to_string()),
            kind: Some(err.kind()),
        }),
    )
        .into_response()
}

/// HTTP status for each error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorKind::StaleReport => StatusCode::CONFLICT,
        ErrorKind::MaxReportsReached => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::EntityNotFound => StatusCode::NOT_FOUND,
        ErrorKind::EntityGraphTooDeep => StatusCode::LOOP_DETECTED,
        ErrorKind::OperationTimedOut => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Unauthorized => StatusCode::FORBIDDEN,
        ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::CommunicationError => StatusCode::BAD_GATEWAY,
        // 499: client closed request.
        ErrorKind::Cancelled => {
            StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
        }
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `?timeout_ms=` on any POST.
#[derive(Debug, Default, Deserialize)]
pub struct TimeoutParams {
    pub timeout_ms: Option<u64>,
}

impl TimeoutParams {
    fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

// ── Reports ────────────────────────────────────────────────────

/// POST /api/v1/reports
pub async fn report_health(
    State(state): State<ApiState>,
    Query(params): Query<TimeoutParams>,
    Json(report): Json<HealthReport>,
) -> Response {
    let options = SendOptions {
        timeout: params.timeout(),
        ..SendOptions::default()
    };
    match state.client.report_health(report, options).await {
        Ok(()) => (StatusCode::ACCEPTED, ApiResponse::ok("accepted")).into_response(),
        Err(e) => error_response(&e),
    }
}

// ── Queries ────────────────────────────────────────────────────

/// POST /api/v1/health
pub async fn get_entity_health(
    State(state): State<ApiState>,
    Query(params): Query<TimeoutParams>,
    Json(query): Json<EntityHealthQuery>,
) -> Response {
    let options = CallOptions {
        timeout: params.timeout(),
        ..CallOptions::default()
    };
    match state.client.get_entity_health(query, options).await {
        Ok(health) => ApiResponse::ok(health).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /api/v1/health/chunk
pub async fn get_health_chunk(
    State(state): State<ApiState>,
    Query(params): Query<TimeoutParams>,
    Json(query): Json<HealthChunkQuery>,
) -> Response {
    let options = CallOptions {
        timeout: params.timeout(),
        ..CallOptions::default()
    };
    match state.client.get_health_chunk(query, options).await {
        Ok(chunk) => ApiResponse::ok(chunk).into_response(),
        Err(e) => error_response(&e),
    }
}

// ── Ledger ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Forgotten {
    removed: usize,
}

/// POST /api/v1/entities/forget
pub async fn forget_entity(
    State(state): State<ApiState>,
    Query(params): Query<TimeoutParams>,
    Json(entity): Json<EntityRef>,
) -> Response {
    let options = CallOptions {
        timeout: params.timeout(),
        ..CallOptions::default()
    };
    match state.client.forget_entity(entity, options).await {
        Ok(removed) => ApiResponse::ok(Forgotten { removed }).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /api/v1/ledger/stats
pub async fn ledger_stats(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.client.ledger().stats())
}
