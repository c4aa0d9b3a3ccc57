//! Swarm event loop.
//!
//! The swarm runs in its own tokio task; callers drive it with
//! [`SwarmCommand`]s and observe it through [`SwarmNotification`]s.

use std::path::PathBuf;

use futures::StreamExt;
use libp2p::{
    gossipsub, identify, multiaddr::Protocol, relay, swarm::SwarmEvent, Multiaddr, PeerId, Swarm,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use agora_shared::constants::DEFAULT_QUIC_PORT;

use super::behaviour::{build_swarm, AgoraBehaviour, AgoraEvent};
use super::bootstrap::{load_seed_file, peer_id_of};
use super::peers::{PeerBook, PeerSummary};

#[derive(Debug)]
pub enum SwarmCommand {
    Dial(Multiaddr),
    Publish { topic: String, data: Vec<u8> },
    Subscribe(String),
    Summary(oneshot::Sender<PeerSummary>),
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum SwarmNotification {
    PeerConnected { peer_id: PeerId, address: Multiaddr },
    PeerDisconnected { peer_id: PeerId },
    /// A connected peer joined `topic`; it is ready for a state exchange.
    TopicJoined { peer_id: PeerId, topic: String },
    MessageReceived {
        source: Option<PeerId>,
        topic: String,
        data: Vec<u8>,
    },
}

pub struct SwarmConfig {
    pub listen_port: u16,
    pub seed_file: Option<PathBuf>,
    pub seeds: Vec<Multiaddr>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_QUIC_PORT,
            seed_file: None,
            seeds: Vec::new(),
        }
    }
}

/// Start listening, dial seeds and spawn the event loop.
///
/// Returns `(command_tx, notification_rx, local_peer_id)`.
pub async fn spawn_swarm(
    keypair: libp2p::identity::Keypair,
    config: SwarmConfig,
) -> anyhow::Result<(
    mpsc::Sender<SwarmCommand>,
    mpsc::Receiver<SwarmNotification>,
    PeerId,
)> {
    let mut swarm = build_swarm(keypair)?;
    let local_peer_id = *swarm.local_peer_id();

    let listen_addr: Multiaddr =
        format!("/ip4/0.0.0.0/udp/{}/quic-v1", config.listen_port).parse()?;
    swarm.listen_on(listen_addr)?;
    swarm.listen_on(format!("/ip6/::/udp/{}/quic-v1", config.listen_port).parse::<Multiaddr>()?)?;
    info!(peer_id = %local_peer_id, port = config.listen_port, "Swarm listening");

    let mut seeds = config.seeds;
    if let Some(path) = &config.seed_file {
        seeds.extend(load_seed_file(path));
    }
    dial_seeds(&mut swarm, &seeds);

    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (notif_tx, notif_rx) = mpsc::channel(256);
    tokio::spawn(run(swarm, cmd_rx, notif_tx));

    Ok((cmd_tx, notif_rx, local_peer_id))
}

fn dial_seeds(swarm: &mut Swarm<AgoraBehaviour>, seeds: &[Multiaddr]) {
    for addr in seeds {
        if let Err(e) = swarm.dial(addr.clone()) {
            warn!(addr = %addr, error = %e, "Failed to dial seed");
            continue;
        }
        if let Some(peer_id) = peer_id_of(addr) {
            swarm.behaviour_mut().kademlia.add_address(&peer_id, addr.clone());
        }
        debug!(addr = %addr, "Dialing seed");
    }

    if !seeds.is_empty() {
        if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
            warn!(error = %e, "Kademlia bootstrap failed to start");
        }
    }
}

async fn run(
    mut swarm: Swarm<AgoraBehaviour>,
    mut commands: mpsc::Receiver<SwarmCommand>,
    notifications: mpsc::Sender<SwarmNotification>,
) {
    let mut peers = PeerBook::new();

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    info!("Command channel closed, shutting down swarm");
                    break;
                };
                match command {
                    SwarmCommand::Dial(addr) => {
                        if let Err(e) = swarm.dial(addr.clone()) {
                            warn!(addr = %addr, error = %e, "Dial failed");
                        }
                    }
                    SwarmCommand::Publish { topic, data } => {
                        let len = data.len();
                        match swarm
                            .behaviour_mut()
                            .gossipsub
                            .publish(gossipsub::IdentTopic::new(&topic), data)
                        {
                            Ok(_) => debug!(topic = %topic, len, "Published frame"),
                            // no peers yet: the next state exchange carries it
                            Err(gossipsub::PublishError::InsufficientPeers) => {
                                debug!(topic = %topic, "No peers to publish to");
                            }
                            Err(gossipsub::PublishError::Duplicate) => {}
                            Err(e) => warn!(topic = %topic, error = %e, "Publish failed"),
                        }
                    }
                    SwarmCommand::Subscribe(topic) => {
                        if let Err(e) = swarm
                            .behaviour_mut()
                            .gossipsub
                            .subscribe(&gossipsub::IdentTopic::new(&topic))
                        {
                            warn!(topic = %topic, error = %e, "Subscribe failed");
                        }
                    }
                    SwarmCommand::Summary(reply) => {
                        let _ = reply.send(peers.summary());
                    }
                    SwarmCommand::Shutdown => {
                        info!("Swarm shutdown requested");
                        break;
                    }
                }
            }

            event = swarm.select_next_some() => {
                if let Some(notification) = handle_event(&mut swarm, &mut peers, event) {
                    if notifications.send(notification).await.is_err() {
                        debug!("Notification receiver dropped");
                    }
                }
            }
        }
    }

    info!("Swarm event loop terminated");
}

fn handle_event(
    swarm: &mut Swarm<AgoraBehaviour>,
    peers: &mut PeerBook,
    event: SwarmEvent<AgoraEvent>,
) -> Option<SwarmNotification> {
    match event {
        SwarmEvent::Behaviour(AgoraEvent::Gossipsub(gossipsub::Event::Message { message, .. })) => {
            Some(SwarmNotification::MessageReceived {
                source: message.source,
                topic: message.topic.to_string(),
                data: message.data,
            })
        }

        SwarmEvent::Behaviour(AgoraEvent::Gossipsub(gossipsub::Event::Subscribed {
            peer_id,
            topic,
        })) => peers.on_subscribed(&peer_id).then(|| SwarmNotification::TopicJoined {
            peer_id,
            topic: topic.to_string(),
        }),

        SwarmEvent::Behaviour(AgoraEvent::Gossipsub(gossipsub::Event::Unsubscribed {
            peer_id,
            ..
        })) => {
            peers.on_unsubscribed(&peer_id);
            None
        }

        SwarmEvent::Behaviour(AgoraEvent::Identify(identify::Event::Received {
            peer_id,
            info,
            ..
        })) => {
            for addr in info.listen_addrs {
                swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
            }
            None
        }

        SwarmEvent::Behaviour(AgoraEvent::RelayClient(
            relay::client::Event::ReservationReqAccepted { relay_peer_id, .. },
        )) => {
            info!(relay = %relay_peer_id, "Relay reservation accepted");
            None
        }

        SwarmEvent::Behaviour(AgoraEvent::Dcutr(event)) => {
            debug!(event = ?event, "DCUtR event");
            None
        }

        SwarmEvent::ConnectionEstablished {
            peer_id, endpoint, ..
        } => {
            let address = endpoint.get_remote_address().clone();
            let relayed = address.iter().any(|p| matches!(p, Protocol::P2pCircuit));
            peers.on_connected(peer_id, address.clone(), relayed);
            info!(peer = %peer_id, addr = %address, relayed, "Peer connected");
            Some(SwarmNotification::PeerConnected { peer_id, address })
        }

        SwarmEvent::ConnectionClosed {
            peer_id,
            num_established: 0,
            ..
        } => {
            peers.on_disconnected(&peer_id);
            info!(peer = %peer_id, "Peer disconnected");
            Some(SwarmNotification::PeerDisconnected { peer_id })
        }

        SwarmEvent::NewListenAddr { address, .. } => {
            info!(addr = %address, "Listening on new address");
            None
        }

        SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
            warn!(peer = ?peer_id, error = %error, "Outgoing connection error");
            None
        }

        _ => None,
    }
}
