use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::error::ApiError;
use crate::admission::{JobRunner, JobSpec, RunResponse};
use crate::crypto::digest::capability_hash;
use crate::crypto::seal::SealedEnvelope;
use crate::identity::{Identity, PublicKeys};
use crate::session::channel::SessionChannel;
use crate::session::handshake::{HandshakeMessage1, HandshakeMessage2};
use crate::session::registry::SessionRegistry;

/// Static facts a node announces about itself.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub build_id: String,
    pub capabilities: Vec<String>,
    pub addr: String,
}

/// Shared state behind the node router. Everything is injected.
#[derive(Clone)]
pub struct NodeState {
    identity: Arc<Identity>,
    runner: JobRunner,
    sessions: Arc<SessionRegistry>,
    info: Arc<NodeInfo>,
    started: Instant,
}

impl NodeState {
    pub fn new(
        identity: Arc<Identity>,
        runner: JobRunner,
        sessions: Arc<SessionRegistry>,
        info: NodeInfo,
    ) -> Self {
        Self {
            identity,
            runner,
            sessions,
            info: Arc::new(info),
            started: Instant::now(),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub status: String,
    pub uptime_secs: u64,
    pub version: String,
    pub active_sessions: usize,
}

/// Signed self-description of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub node_id: String,
    pub build_id: String,
    pub capabilities: Vec<String>,
    pub capability_hash: String,
    pub addr: String,
    pub ts: i64,
    /// Ed25519 signature (base64url) over [`Announcement::signing_bytes`].
    #[serde(default)]
    pub signature: String,
}

impl Announcement {
    /// Compact JSON of every field except the signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let unsigned = json!({
            "node_id": self.node_id,
            "build_id": self.build_id,
            "capabilities": self.capabilities,
            "capability_hash": self.capability_hash,
            "addr": self.addr,
            "ts": self.ts,
        });
        serde_json::to_vec(&unsigned)
    }
}

/// Sealed form of a `/run` request and response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedRun {
    pub session_id: String,
    pub envelope: SealedEnvelope,
}

pub fn router(state: NodeState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/announce", get(announce))
        .route("/pubkeys", get(pubkeys))
        .route("/hs", post(handshake))
        .route("/run", post(run))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
}

async fn status(State(state): State<NodeState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        node_id: state.identity.node_id().to_string(),
        status: "online".into(),
        uptime_secs: state.started.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").into(),
        active_sessions: state.sessions.len(),
    })
}

async fn announce(State(state): State<NodeState>) -> Result<Json<Announcement>, ApiError> {
    let capabilities: Vec<String> = state
        .info
        .capabilities
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut ann = Announcement {
        node_id: state.identity.node_id().to_string(),
        build_id: state.info.build_id.clone(),
        capability_hash: capability_hash(&capabilities),
        capabilities,
        addr: state.info.addr.clone(),
        ts: chrono::Utc::now().timestamp_millis(),
        signature: String::new(),
    };
    let unsigned = ann
        .signing_bytes()
        .map_err(|e| ApiError::Internal(format!("encode announcement: {e}")))?;
    ann.signature = state.identity.sign_b64(&unsigned);
    Ok(Json(ann))
}

async fn pubkeys(State(state): State<NodeState>) -> Json<PublicKeys> {
    Json(state.identity.public_keys())
}

async fn handshake(
    State(state): State<NodeState>,
    Json(msg1): Json<HandshakeMessage1>,
) -> Result<Json<HandshakeMessage2>, ApiError> {
    let config = state.sessions.config().clone();
    let (channel, msg2) = SessionChannel::respond(&state.identity, &msg1, config)?;
    state.sessions.insert(channel);
    tracing::info!(session_id = %msg2.session_id, "session established");
    Ok(Json(msg2))
}

async fn run(
    State(state): State<NodeState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let sealed = body.get("session_id").is_some() && body.get("envelope").is_some();
    if !sealed {
        let spec = JobSpec::from_request(body)?;
        let resp = state.runner.run(spec).await?;
        return Ok(Json(to_value(&resp)?));
    }

    let req: SealedRun =
        serde_json::from_value(body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let channel = state.sessions.get(&req.session_id)?;
    let inner: Value = channel.open_json(&req.envelope)?;
    let spec = JobSpec::from_request(inner)?;
    let resp = state.runner.run(spec).await?;

    let aad = json!({
        "session_id": req.session_id,
        "request_id": resp.request_id,
    });
    let envelope = channel.seal_json(&resp, Some(aad))?;
    tracing::debug!(
        session_id = %req.session_id,
        attempt_id = %resp.attempt_id,
        "sealed run answered"
    );
    Ok(Json(to_value(&SealedRun {
        session_id: req.session_id,
        envelope,
    })?))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::Internal(e.to_string()))
}

/// Client-side helper: open a sealed `/run` response.
pub fn open_sealed_response(
    channel: &SessionChannel,
    sealed: &SealedRun,
) -> Result<RunResponse, ApiError> {
    Ok(channel.open_json(&sealed.envelope)?)
}
