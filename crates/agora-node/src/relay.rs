//! Circuit relay v2 server.
//!
//! Replicas behind NAT reserve a slot here so others can reach them
//! through the node. The relay runs its own swarm with a separate
//! identity and does not take part in graph gossip.

use std::time::Duration;

use futures::StreamExt;
use libp2p::identity::Keypair;
use libp2p::{
    identify, relay,
    swarm::{NetworkBehaviour, SwarmEvent},
    Multiaddr, PeerId, SwarmBuilder,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use agora_shared::constants::PROTOCOL_VERSION;

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "RelayEvent")]
pub struct RelayBehaviour {
    pub relay: relay::Behaviour,
    pub identify: identify::Behaviour,
}

#[derive(Debug)]
pub enum RelayEvent {
    Relay(relay::Event),
    Identify(identify::Event),
}

impl From<relay::Event> for RelayEvent {
    fn from(event: relay::Event) -> Self {
        RelayEvent::Relay(event)
    }
}

impl From<identify::Event> for RelayEvent {
    fn from(event: identify::Event) -> Self {
        RelayEvent::Identify(event)
    }
}

fn log_relay_event(event: &relay::Event) {
    match event {
        relay::Event::ReservationReqAccepted { src_peer_id, .. } => {
            info!(peer = %src_peer_id, "Relay reservation accepted");
        }
        relay::Event::ReservationTimedOut { src_peer_id, .. } => {
            debug!(peer = %src_peer_id, "Relay reservation timed out");
        }
        relay::Event::CircuitReqAccepted {
            src_peer_id,
            dst_peer_id,
            ..
        } => {
            info!(src = %src_peer_id, dst = %dst_peer_id, "Circuit established");
        }
        relay::Event::CircuitClosed {
            src_peer_id,
            dst_peer_id,
            ..
        } => {
            debug!(src = %src_peer_id, dst = %dst_peer_id, "Circuit closed");
        }
        other => debug!(event = ?other, "Relay event"),
    }
}

/// Listen for relay reservations on `port` (QUIC, IPv4).
pub async fn spawn_relay(keypair: Keypair, port: u16) -> anyhow::Result<(PeerId, JoinHandle<()>)> {
    let local_peer_id = keypair.public().to_peer_id();

    let mut swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_quic()
        .with_behaviour(|key| {
            let peer_id = key.public().to_peer_id();
            let identify_config = identify::Config::new(PROTOCOL_VERSION.to_string(), key.public())
                .with_push_listen_addr_updates(true)
                .with_interval(Duration::from_secs(60));

            Ok(RelayBehaviour {
                relay: relay::Behaviour::new(peer_id, relay::Config::default()),
                identify: identify::Behaviour::new(identify_config),
            })
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(120)))
        .build();

    let addr: Multiaddr = format!("/ip4/0.0.0.0/udp/{port}/quic-v1").parse()?;
    swarm.listen_on(addr)?;
    info!(peer_id = %local_peer_id, port, "Relay listening");

    let task = tokio::spawn(async move {
        loop {
            match swarm.select_next_some().await {
                SwarmEvent::Behaviour(RelayEvent::Relay(event)) => log_relay_event(&event),
                SwarmEvent::Behaviour(RelayEvent::Identify(identify::Event::Received {
                    peer_id,
                    info,
                    ..
                })) => {
                    debug!(
                        peer = %peer_id,
                        protocol = %info.protocol_version,
                        "Identified relay client"
                    );
                }
                SwarmEvent::NewListenAddr { address, .. } => {
                    info!(addr = %address, "Relay address");
                }
                SwarmEvent::IncomingConnectionError { error, .. } => {
                    warn!(error = %error, "Relay incoming connection error");
                }
                _ => {}
            }
        }
    });

    Ok((local_peer_id, task))
}
