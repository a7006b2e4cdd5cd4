use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use super::error::ApiError;
use crate::attestation::{Health, NodeTrustRecord, TrustService};
use crate::heartbeat::{HeartbeatRequest, HeartbeatResponse, HEARTBEAT_PATH};

#[derive(Clone)]
pub struct OrchestratorState {
    trust: Arc<TrustService>,
}

impl OrchestratorState {
    pub fn new(trust: Arc<TrustService>) -> Self {
        Self { trust }
    }
}

pub fn router(state: OrchestratorState) -> Router {
    Router::new()
        .route(HEARTBEAT_PATH, post(heartbeat))
        .route("/api/hosts/:host_id/trust", get(trust_record))
        .route("/api/hosts/:host_id/health", post(set_health))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Records are stamped with the orchestrator's clock, not the node's.
async fn heartbeat(
    State(state): State<OrchestratorState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    if req.host_id.trim().is_empty() {
        return Err(ApiError::BadRequest("host_id must not be empty".into()));
    }
    let now = chrono::Utc::now().timestamp_millis();
    tracing::debug!(
        host_id = %req.host_id,
        status = %req.status,
        node_ts = req.timestamp,
        has_attestation = req.attestation.is_some(),
        "heartbeat received"
    );

    let outcome = state
        .trust
        .ingest(&req.host_id, req.attestation.as_ref(), now)
        .await?;

    Ok(Json(HeartbeatResponse {
        host_id: req.host_id,
        trust_status: outcome.evaluation.status,
        health: outcome.record.map(|r| r.health).unwrap_or_default(),
        events: outcome.evaluation.events,
    }))
}

async fn trust_record(
    State(state): State<OrchestratorState>,
    Path(host_id): Path<String>,
) -> Result<Json<NodeTrustRecord>, ApiError> {
    state
        .trust
        .record(&host_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("host {host_id}")))
}

/// Operator override of a host's health.
#[derive(Debug, Deserialize)]
pub struct HealthOverride {
    pub health: Health,
}

async fn set_health(
    State(state): State<OrchestratorState>,
    Path(host_id): Path<String>,
    Json(req): Json<HealthOverride>,
) -> Result<Json<NodeTrustRecord>, ApiError> {
    state
        .trust
        .set_health(&host_id, req.health)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("host {host_id}")))
}
