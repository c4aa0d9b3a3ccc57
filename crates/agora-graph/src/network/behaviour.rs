//! Composed libp2p behaviour for graph replication and its swarm builder.
//!
//! GossipSub carries graph deltas, Kademlia and Identify find and describe
//! peers, and the relay client plus DCUtR get replicas behind NAT talking.

use std::time::Duration;

use libp2p::{
    dcutr,
    gossipsub::{self, MessageAuthenticity, MessageId, ValidationMode},
    identify,
    identity::Keypair,
    kad::{self, store::MemoryStore},
    noise, relay,
    swarm::NetworkBehaviour,
    yamux, Swarm, SwarmBuilder,
};
use tracing::info;

use agora_shared::constants::{GOSSIPSUB_HEARTBEAT_SECS, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "AgoraEvent")]
pub struct AgoraBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub kademlia: kad::Behaviour<MemoryStore>,
    pub identify: identify::Behaviour,
    pub relay_client: relay::client::Behaviour,
    pub dcutr: dcutr::Behaviour,
}

#[derive(Debug)]
pub enum AgoraEvent {
    Gossipsub(gossipsub::Event),
    Kademlia(kad::Event),
    Identify(identify::Event),
    RelayClient(relay::client::Event),
    Dcutr(dcutr::Event),
}

impl From<gossipsub::Event> for AgoraEvent {
    fn from(event: gossipsub::Event) -> Self {
        AgoraEvent::Gossipsub(event)
    }
}

impl From<kad::Event> for AgoraEvent {
    fn from(event: kad::Event) -> Self {
        AgoraEvent::Kademlia(event)
    }
}

impl From<identify::Event> for AgoraEvent {
    fn from(event: identify::Event) -> Self {
        AgoraEvent::Identify(event)
    }
}

impl From<relay::client::Event> for AgoraEvent {
    fn from(event: relay::client::Event) -> Self {
        AgoraEvent::RelayClient(event)
    }
}

impl From<dcutr::Event> for AgoraEvent {
    fn from(event: dcutr::Event) -> Self {
        AgoraEvent::Dcutr(event)
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Content-addressed ids: the same frame published twice is delivered once.
fn content_id(message: &gossipsub::Message) -> MessageId {
    MessageId::from(blake3::hash(&message.data).to_hex().to_string())
}

fn compose(
    key: &Keypair,
    relay_client: relay::client::Behaviour,
) -> Result<AgoraBehaviour, BoxError> {
    let local_peer_id = key.public().to_peer_id();

    let gossipsub_config = gossipsub::ConfigBuilder::default()
        .heartbeat_interval(Duration::from_secs(GOSSIPSUB_HEARTBEAT_SECS))
        .validation_mode(ValidationMode::Strict)
        .max_transmit_size(MAX_MESSAGE_SIZE)
        .message_id_fn(content_id)
        .build()
        .map_err(|e| -> BoxError { format!("GossipSub config: {e}").into() })?;
    let gossipsub =
        gossipsub::Behaviour::new(MessageAuthenticity::Signed(key.clone()), gossipsub_config)
            .map_err(|e| -> BoxError { format!("GossipSub init: {e}").into() })?;

    let mut kademlia = kad::Behaviour::new(local_peer_id, MemoryStore::new(local_peer_id));
    kademlia.set_mode(Some(kad::Mode::Server));

    let identify = identify::Behaviour::new(
        identify::Config::new(PROTOCOL_VERSION.to_string(), key.public())
            .with_push_listen_addr_updates(true)
            .with_interval(Duration::from_secs(60)),
    );

    Ok(AgoraBehaviour {
        gossipsub,
        kademlia,
        identify,
        relay_client,
        dcutr: dcutr::Behaviour::new(local_peer_id),
    })
}

/// QUIC transport with a relay-client fallback.
pub fn build_swarm(keypair: Keypair) -> anyhow::Result<Swarm<AgoraBehaviour>> {
    let swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_quic()
        .with_relay_client(noise::Config::new, yamux::Config::default)?
        .with_behaviour(compose)?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(120)))
        .build();

    info!(peer_id = %swarm.local_peer_id(), "Built replication swarm");
    Ok(swarm)
}
