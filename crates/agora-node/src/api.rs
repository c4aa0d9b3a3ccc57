use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path as UrlPath, State},
    http::Method,
    routing::get,
    Json, Router,
};
use libp2p::PeerId;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use agora_graph::network::{PeerSummary, SwarmCommand};
use agora_graph::Graph;
use agora_shared::Path;

use crate::error::NodeError;

#[derive(Clone)]
pub struct AppState {
    pub graph: Graph,
    pub swarm: Option<mpsc::Sender<SwarmCommand>>,
    pub identity: Arc<NodeIdentity>,
    pub read_timeout: Duration,
}

#[derive(Debug)]
pub struct NodeIdentity {
    pub peer_id: PeerId,
    pub relay_peer_id: Option<PeerId>,
    pub started: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/graph/*path", get(read_graph))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    peer_id: String,
    relay_peer_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    nodes: usize,
    fields: usize,
    subscriptions: usize,
    replicas: usize,
    peers: Option<PeerSummary>,
    uptime_secs: u64,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        peer_id: state.identity.peer_id.to_string(),
        relay_peer_id: state.identity.relay_peer_id.map(|p| p.to_string()),
    })
}

async fn peer_summary(swarm: &mpsc::Sender<SwarmCommand>) -> Result<PeerSummary, NodeError> {
    let (reply, summary) = oneshot::channel();
    swarm
        .send(SwarmCommand::Summary(reply))
        .await
        .map_err(|_| NodeError::SwarmUnavailable)?;
    summary.await.map_err(|_| NodeError::SwarmUnavailable)
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, NodeError> {
    let graph = state.graph.stats().await?;
    let peers = match &state.swarm {
        Some(swarm) => peer_summary(swarm).await.ok(),
        None => None,
    };

    Ok(Json(StatsResponse {
        nodes: graph.nodes,
        fields: graph.fields,
        subscriptions: graph.subscriptions,
        replicas: graph.replicas,
        peers,
        uptime_secs: state.identity.started.elapsed().as_secs(),
    }))
}

/// `a/b/c` to a graph path. Empty segments are ignored.
fn parse_path(raw: &str) -> Result<Path, NodeError> {
    let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(NodeError::BadRequest("Empty graph path".into()));
    }
    Ok(Path::new(segments))
}

async fn read_graph(
    State(state): State<AppState>,
    UrlPath(raw): UrlPath<String>,
) -> Result<Json<Value>, NodeError> {
    let path = parse_path(&raw)?;
    state
        .graph
        .once(&path, state.read_timeout)
        .await
        .map(Json)
        .ok_or_else(|| NodeError::NotFound(path.to_string()))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
