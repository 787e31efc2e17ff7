//! API route handlers.
//!
//! State is shared via `Arc<ApiState>`. Opportunity reads go straight to
//! the adapter; sync and metrics reads come from the scheduler and store.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::mock::demo_opportunities;
use crate::adapters::ProtocolAdapter;
use crate::engine::{OpportunityStore, Snapshot, SyncScheduler};
use crate::types::{AggregatedMetrics, Opportunity, ProtocolInfo, Source, SyncStats, YieldError};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub adapter: Arc<dyn ProtocolAdapter>,
    pub store: Arc<OpportunityStore>,
    pub scheduler: SyncScheduler,
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct OpportunitiesResponse {
    pub data: Vec<Opportunity>,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// JSON error body with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<YieldError> for ApiError {
    fn from(err: YieldError) -> Self {
        let status = if err.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::BAD_GATEWAY
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/opportunities
///
/// Falls back to demo data when the upstream fails.
pub async fn get_opportunities(State(state): State<AppState>) -> Json<OpportunitiesResponse> {
    match state.adapter.list().await {
        Ok(data) => Json(OpportunitiesResponse {
            data,
            source: Source::Api,
            error: None,
        }),
        Err(e) => {
            warn!(error = %e, "Serving demo opportunities");
            Json(OpportunitiesResponse {
                data: demo_opportunities(),
                source: Source::Mock,
                error: Some(e.to_string()),
            })
        }
    }
}

/// GET /api/opportunities/:id
pub async fn get_opportunity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Opportunity>, ApiError> {
    Ok(Json(state.adapter.detail(&id).await?))
}

/// GET /api/protocol
pub async fn get_protocol(State(state): State<AppState>) -> Json<ProtocolInfo> {
    Json(state.adapter.protocol_info())
}

/// GET /api/sync/stats
pub async fn get_sync_stats(State(state): State<AppState>) -> Json<SyncStats> {
    Json(state.scheduler.stats().await)
}

/// POST /api/sync/force
pub async fn force_sync(State(state): State<AppState>) -> Json<SyncStats> {
    info!("Forced sync requested");
    Json(state.scheduler.force_sync().await)
}

/// GET /api/metrics
pub async fn get_metrics(
    State(state): State<AppState>,
) -> Result<Json<AggregatedMetrics>, ApiError> {
    state
        .store
        .metrics()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("metrics not computed yet"))
}

/// GET /api/snapshots/:protocol
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(protocol): Path<String>,
) -> Result<Json<Snapshot>, ApiError> {
    state
        .store
        .snapshot(&protocol)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no snapshot for {protocol}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
