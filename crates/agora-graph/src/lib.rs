//! Replicated graph database.
//!
//! A [`Graph`] is a local replica of a hierarchical key/value graph whose
//! fields merge last-write-wins. Replicas exchange deltas in-process with
//! [`replication::link`] or over libp2p gossip with
//! [`replication::start_network_sync`].

pub mod error;
pub mod graph;
pub mod network;
pub mod replication;
pub mod state;

pub use error::GraphError;
pub use graph::{spawn_graph, Graph, GraphConfig, GraphEvent, GraphStats, ReplicaId, Subscription};
pub use replication::{link, start_network_sync, Link};
pub use state::{Delta, FieldValue, State};
