//! # agora-node
//!
//! Always-on seed replica for the Agora network.
//!
//! This binary provides:
//! - a journal-backed graph replica that gossips with every connected peer,
//!   so data outlives the clients that wrote it
//! - a libp2p circuit relay for peers behind NAT
//! - a small read-only HTTP API (`/health`, `/stats`, `/graph/<path>`)

mod api;
mod config;
mod error;
mod relay;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agora_graph::network::{
    device_keypair, load_or_create_seed, spawn_swarm, SwarmCommand, SwarmConfig,
};
use agora_graph::{spawn_graph, start_network_sync, GraphConfig};
use agora_store::Database;

use crate::api::{AppState, NodeIdentity};
use crate::config::NodeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,agora_node=debug")),
        )
        .init();

    info!("Starting Agora node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::from_env();
    info!(?config, "Loaded configuration");

    // Graph replica restored from the journal.
    let journal_path = match &config.journal_path {
        Some(path) => path.clone(),
        None => Database::default_path()?,
    };
    let journal = Database::open_at(&journal_path)
        .with_context(|| format!("Cannot open journal {}", journal_path.display()))?;
    let graph = spawn_graph(GraphConfig {
        journal: Some(journal),
    })?;
    let restored = graph.stats().await?;
    info!(nodes = restored.nodes, fields = restored.fields, "Graph restored");

    // Replicating swarm.
    let seed = load_or_create_seed(&journal_path.with_file_name("device.key"))?;
    let swarm_config = SwarmConfig {
        listen_port: config.listen_port,
        seed_file: config.seed_file.clone(),
        seeds: Vec::new(),
    };
    let (commands, notifications, peer_id) =
        spawn_swarm(device_keypair(&seed)?, swarm_config).await?;
    let sync = start_network_sync(graph.clone(), commands.clone(), notifications).await?;
    info!(peer_id = %peer_id, port = config.listen_port, "Replicating");

    // Relay with its own identity.
    let relay = if config.relay_enabled() {
        let relay_seed = load_or_create_seed(&journal_path.with_file_name("relay.key"))?;
        Some(relay::spawn_relay(device_keypair(&relay_seed)?, config.relay_port).await?)
    } else {
        None
    };

    let state = AppState {
        graph: graph.clone(),
        swarm: Some(commands.clone()),
        identity: Arc::new(NodeIdentity {
            peer_id,
            relay_peer_id: relay.as_ref().map(|(id, _)| *id),
            started: Instant::now(),
        }),
        read_timeout: config.read_timeout,
    };

    tokio::select! {
        result = api::serve(state, config.http_addr) => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    let _ = commands.send(SwarmCommand::Shutdown).await;
    sync.abort();
    if let Some((_, task)) = relay {
        task.abort();
    }
    graph.shutdown();
    Ok(())
}
