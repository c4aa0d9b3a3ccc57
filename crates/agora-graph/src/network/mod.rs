//! libp2p transport for graph replication.

pub mod behaviour;
pub mod bootstrap;
pub mod keys;
pub mod peers;
pub mod swarm;

pub use behaviour::{build_swarm, AgoraBehaviour, AgoraEvent};
pub use bootstrap::{load_seed_file, parse_seed_list, peer_id_of};
pub use keys::{device_keypair, load_or_create_seed};
pub use peers::{LinkMode, PeerBook, PeerSummary};
pub use swarm::{spawn_swarm, SwarmCommand, SwarmConfig, SwarmNotification};
