//! Connected-peer bookkeeping for the replication swarm.

use std::collections::HashMap;

use libp2p::{Multiaddr, PeerId};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkMode {
    Direct,
    Relayed,
}

#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub address: Multiaddr,
    pub mode: LinkMode,
    /// Whether the peer has joined the graph topic.
    pub syncing: bool,
    pub connected_at: i64,
}

/// Counts reported by [`PeerBook::summary`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PeerSummary {
    pub connected: usize,
    pub relayed: usize,
    pub syncing: usize,
}

#[derive(Debug, Default)]
pub struct PeerBook {
    peers: HashMap<PeerId, PeerEntry>,
}

impl PeerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connected(&mut self, peer_id: PeerId, address: Multiaddr, relayed: bool) {
        let mode = if relayed {
            LinkMode::Relayed
        } else {
            LinkMode::Direct
        };
        debug!(peer = %peer_id, addr = %address, mode = ?mode, "Tracking peer");

        // a second connection to a known peer only refreshes the address
        let entry = self.peers.entry(peer_id).or_insert_with(|| PeerEntry {
            address: address.clone(),
            mode,
            syncing: false,
            connected_at: chrono::Utc::now().timestamp_millis(),
        });
        entry.address = address;
        entry.mode = mode;
    }

    pub fn on_disconnected(&mut self, peer_id: &PeerId) {
        if self.peers.remove(peer_id).is_some() {
            debug!(peer = %peer_id, "Forgot peer");
        }
    }

    /// Mark a peer as subscribed to the graph topic. Returns `true` the
    /// first time, when a state exchange is due.
    pub fn on_subscribed(&mut self, peer_id: &PeerId) -> bool {
        match self.peers.get_mut(peer_id) {
            Some(entry) if !entry.syncing => {
                entry.syncing = true;
                true
            }
            _ => false,
        }
    }

    pub fn on_unsubscribed(&mut self, peer_id: &PeerId) {
        if let Some(entry) = self.peers.get_mut(peer_id) {
            entry.syncing = false;
        }
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.peers.keys().copied().collect()
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerEntry> {
        self.peers.get(peer_id)
    }

    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            connected: self.peers.len(),
            relayed: self
                .peers
                .values()
                .filter(|p| p.mode == LinkMode::Relayed)
                .count(),
            syncing: self.peers.values().filter(|p| p.syncing).count(),
        }
    }
}
