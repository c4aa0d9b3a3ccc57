//! Starting the local replica and connecting it to the network.

use anyhow::Context;
use libp2p::{Multiaddr, PeerId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use agora_graph::network::{
    device_keypair, load_or_create_seed, spawn_swarm, PeerSummary, SwarmCommand, SwarmConfig,
};
use agora_graph::{spawn_graph, start_network_sync, Graph, GraphConfig};
use agora_store::Database;

use crate::config::ClientConfig;

/// A journal-backed graph replica bridged to the libp2p swarm.
pub struct Replica {
    pub graph: Graph,
    pub peer_id: PeerId,
    commands: mpsc::Sender<SwarmCommand>,
    sync: JoinHandle<()>,
}

impl Replica {
    pub async fn dial(&self, addr: Multiaddr) {
        if self.commands.send(SwarmCommand::Dial(addr)).await.is_err() {
            warn!("Swarm stopped, cannot dial");
        }
    }

    pub async fn peer_summary(&self) -> Option<PeerSummary> {
        let (reply, summary) = oneshot::channel();
        self.commands.send(SwarmCommand::Summary(reply)).await.ok()?;
        summary.await.ok()
    }

    pub async fn shutdown(self) {
        let _ = self.commands.send(SwarmCommand::Shutdown).await;
        self.sync.abort();
        self.graph.shutdown();
        info!("Replica stopped");
    }
}

/// Open the journal, restore the graph from it and start replicating.
pub async fn start_replica(config: &ClientConfig) -> anyhow::Result<Replica> {
    let journal_path = match &config.journal_path {
        Some(path) => path.clone(),
        None => Database::default_path()?,
    };
    let journal = Database::open_at(&journal_path)
        .with_context(|| format!("Cannot open journal {}", journal_path.display()))?;
    let graph = spawn_graph(GraphConfig {
        journal: Some(journal),
    })?;

    let seed = load_or_create_seed(&journal_path.with_file_name("device.key"))?;
    let keypair = device_keypair(&seed)?;
    let swarm_config = SwarmConfig {
        listen_port: config.listen_port,
        seed_file: config.seed_file.clone(),
        seeds: Vec::new(),
    };
    let (commands, notifications, peer_id) = spawn_swarm(keypair, swarm_config).await?;
    let sync = start_network_sync(graph.clone(), commands.clone(), notifications).await?;

    info!(peer_id = %peer_id, journal = %journal_path.display(), "Replica started");
    Ok(Replica {
        graph,
        peer_id,
        commands,
        sync,
    })
}
