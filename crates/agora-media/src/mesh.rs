use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use agora_shared::UserPub;

use crate::peer::{IceCandidate, PeerConnection, RemoteTrack};
use crate::signaling::LinkPhase;

/// Connection state for one remote peer in a full-mesh call.
pub struct Link {
    pub id: u64,
    pub connection: Box<dyn PeerConnection>,
    pub phase: LinkPhase,
    /// Candidates that arrived before the remote description.
    pub pending_candidates: Vec<IceCandidate>,
    pub has_remote: bool,
    /// Local tracks changed since the last offer we made.
    pub needs_negotiation: bool,
    /// The remote presence's `joinedAt` this link was made for.
    pub remote_joined_at: Option<i64>,
    pub tracks: Vec<RemoteTrack>,
}

impl Link {
    pub fn new(id: u64, connection: Box<dyn PeerConnection>) -> Self {
        Self {
            id,
            connection,
            phase: LinkPhase::Idle,
            pending_candidates: Vec::new(),
            has_remote: false,
            needs_negotiation: false,
            remote_joined_at: None,
            tracks: Vec::new(),
        }
    }
}

/// One row of the voice peer list.
#[derive(Debug, Clone, PartialEq)]
pub struct VoicePeer {
    pub pub_key: UserPub,
    pub alias: String,
    pub screen_sharing: bool,
    pub phase: LinkPhase,
    pub tracks: Vec<RemoteTrack>,
}

#[derive(Debug, Clone, Default)]
struct Presence {
    alias: String,
    screen_sharing: bool,
}

/// Peer table for a voice session: who is present and the link to each.
#[derive(Default)]
pub struct Mesh {
    present: BTreeMap<UserPub, Presence>,
    links: BTreeMap<UserPub, Link>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_presence(&mut self, remote: UserPub, alias: String, screen_sharing: bool) {
        self.present.insert(
            remote,
            Presence {
                alias,
                screen_sharing,
            },
        );
    }

    pub fn remove_presence(&mut self, remote: &UserPub) {
        self.present.remove(remote);
    }

    pub fn insert_link(&mut self, remote: UserPub, link: Link) -> Option<Link> {
        debug!(peer = %remote.short(), link = link.id, "Adding peer to mesh");
        self.links.insert(remote, link)
    }

    pub fn remove_link(&mut self, remote: &UserPub) -> Option<Link> {
        let link = self.links.remove(remote);
        if link.is_some() {
            debug!(peer = %remote.short(), "Removed peer from mesh");
        }
        link
    }

    pub fn has_link(&self, remote: &UserPub) -> bool {
        self.links.contains_key(remote)
    }

    pub fn link(&self, remote: &UserPub) -> Option<&Link> {
        self.links.get(remote)
    }

    pub fn link_mut(&mut self, remote: &UserPub) -> Option<&mut Link> {
        self.links.get_mut(remote)
    }

    /// Whether `link_id` is the live link to `remote`.
    pub fn is_current(&self, remote: &UserPub, link_id: u64) -> bool {
        self.links.get(remote).map_or(false, |link| link.id == link_id)
    }

    pub fn links_mut(&mut self) -> impl Iterator<Item = &mut Link> {
        self.links.values_mut()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Remove every link and forget every peer.
    pub fn clear(&mut self) -> Vec<Link> {
        self.present.clear();
        std::mem::take(&mut self.links).into_values().collect()
    }

    /// Present peers plus any peer with a link, ordered by pub.
    pub fn view(&self) -> Vec<VoicePeer> {
        let keys: BTreeSet<&UserPub> = self.present.keys().chain(self.links.keys()).collect();
        keys.into_iter()
            .map(|remote| {
                let presence = self.present.get(remote).cloned().unwrap_or_default();
                let link = self.links.get(remote);
                VoicePeer {
                    pub_key: *remote,
                    alias: presence.alias,
                    screen_sharing: presence.screen_sharing,
                    phase: link.map_or(LinkPhase::Closed, |l| l.phase),
                    tracks: link.map(|l| l.tracks.clone()).unwrap_or_default(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackConnector;
    use crate::peer::{PeerConnector, PeerEventSink};
    use tokio::sync::mpsc;

    async fn link(id: u64, remote: UserPub) -> Link {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = LoopbackConnector::new()
            .connect(PeerEventSink::new(remote, id, tx))
            .await
            .unwrap();
        Link::new(id, connection)
    }

    #[tokio::test]
    async fn view_merges_presence_and_links() {
        let (a, b) = (UserPub([1; 32]), UserPub([2; 32]));
        let mut mesh = Mesh::new();

        mesh.set_presence(b, "bob".into(), true);
        mesh.insert_link(a, link(7, a).await);

        let view = mesh.view();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].pub_key, a);
        assert_eq!(view[0].phase, LinkPhase::Idle);
        assert_eq!(view[1].alias, "bob");
        assert_eq!(view[1].phase, LinkPhase::Closed);

        assert!(mesh.is_current(&a, 7));
        assert!(!mesh.is_current(&a, 8));
        assert_eq!(mesh.clear().len(), 1);
        assert!(mesh.view().is_empty());
    }
}
