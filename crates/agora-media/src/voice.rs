//! Voice channel sessions.
//!
//! Joining a channel publishes a presence record under
//! `voice/<channel>/peers/<pub>` and starts a session task that owns every
//! peer connection. The task reacts to three streams: presence changes,
//! signals arriving in the local mailbox `voice/<channel>/signals/<me>/*`,
//! and events raised by the connections themselves. All link state is
//! touched only from that task.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use agora_graph::{Graph, GraphEvent, Subscription};
use agora_shared::constants::SIGNAL_STALENESS_MS;
use agora_shared::paths;
use agora_shared::protocol::{Record, SignalRecord, VoicePresence};
use agora_shared::types::now_ms;
use agora_shared::UserPub;

use crate::error::MediaError;
use crate::mesh::{Link, Mesh, VoicePeer};
use crate::peer::{
    IceCandidate, PeerConnector, PeerEvent, PeerEventKind, PeerEventSink, SessionDescription,
    SignalingState,
};
use crate::signaling::{decide, should_initiate, Incoming, LinkPhase, SignalingAction};
use crate::stream::{MediaDevices, MediaStream};

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Bound on each offer/answer/description operation.
    pub negotiation_timeout: Duration,
    /// Bound on microphone and screen acquisition, which may wait on a
    /// permission prompt.
    pub media_timeout: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_secs(10),
            media_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub pub_key: UserPub,
    pub alias: String,
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, MediaError>>,
) -> Result<T, MediaError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| MediaError::Timeout(limit.as_millis() as u64))?
}

/// Resolves once `leave` has been called on the handle.
async fn left(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|left| *left).await;
}

enum Command {
    StartScreen {
        stream: MediaStream,
        reply: oneshot::Sender<()>,
    },
    StopScreen {
        reply: oneshot::Sender<()>,
    },
    ConnectionCount {
        reply: oneshot::Sender<usize>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a joined voice channel. Dropping it leaves the channel.
pub struct VoiceHandle {
    channel_path: String,
    commands: mpsc::UnboundedSender<Command>,
    peers: watch::Receiver<Vec<VoicePeer>>,
    audio: MediaStream,
    devices: Arc<dyn MediaDevices>,
    config: VoiceConfig,
    /// Set by `leave`; cancels pending screen acquisition.
    left: watch::Sender<bool>,
}

/// Join the voice channel at `channel_path`.
///
/// Fails only if the microphone cannot be acquired; nothing is published
/// in that case.
pub async fn join_voice_channel(
    graph: Graph,
    local: Participant,
    channel_path: String,
    devices: Arc<dyn MediaDevices>,
    connector: Arc<dyn PeerConnector>,
    config: VoiceConfig,
) -> Result<VoiceHandle, MediaError> {
    let audio = bounded(config.media_timeout, devices.user_audio()).await?;

    let presence = graph.map(&paths::voice_peers(&channel_path));
    let inbox = graph.map(&paths::voice_inbox(&channel_path, &local.pub_key));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (commands, commands_rx) = mpsc::unbounded_channel();
    let (peers_tx, peers) = watch::channel(Vec::new());

    let session = VoiceSession {
        graph,
        local,
        channel_path: channel_path.clone(),
        joined_at: now_ms(),
        connector,
        config: config.clone(),
        audio: audio.clone(),
        screen: None,
        mesh: Mesh::new(),
        next_link_id: 1,
        events_tx,
        peers_tx,
        signalled: BTreeSet::new(),
    };
    session.publish_presence(true);
    info!(channel = %channel_path, "Joined voice channel");

    tokio::spawn(session.run(commands_rx, presence, inbox, events_rx));

    Ok(VoiceHandle {
        channel_path,
        commands,
        peers,
        audio,
        devices,
        config,
        left: watch::channel(false).0,
    })
}

impl VoiceHandle {
    pub fn channel_path(&self) -> &str {
        &self.channel_path
    }

    /// Live peer list. Every change replaces the whole list.
    pub fn peers(&self) -> watch::Receiver<Vec<VoicePeer>> {
        self.peers.clone()
    }

    pub fn local_audio(&self) -> &MediaStream {
        &self.audio
    }

    /// Flip the microphone's enabled flag. Returns whether it is now muted.
    /// Local only; nothing is renegotiated or published.
    pub fn toggle_mute(&self) -> bool {
        let muted = self.is_muted();
        for track in self.audio.audio_tracks() {
            track.set_enabled(muted);
        }
        !muted
    }

    pub fn is_muted(&self) -> bool {
        self.audio.audio_tracks().all(|t| !t.is_enabled())
    }

    /// Capture the screen and add it to every connection.
    ///
    /// A pending capture prompt is abandoned with `Cancelled` when the
    /// handle leaves the channel.
    pub async fn start_screen_share(&self, source: Option<&str>) -> Result<(), MediaError> {
        let cancelled = self.left.subscribe();
        if *cancelled.borrow() || self.commands.is_closed() {
            return Err(MediaError::Closed);
        }
        let stream = tokio::select! {
            stream = bounded(self.config.media_timeout, self.devices.display(source)) => stream?,
            _ = left(cancelled) => {
                debug!(channel = %self.channel_path, "Screen capture cancelled");
                return Err(MediaError::Cancelled);
            }
        };

        let (reply, done) = oneshot::channel();
        if let Err(mpsc::error::SendError(Command::StartScreen { stream, .. })) =
            self.commands.send(Command::StartScreen { stream, reply })
        {
            stream.stop();
            return Err(MediaError::Closed);
        }
        done.await.map_err(|_| MediaError::Closed)
    }

    pub async fn stop_screen_share(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::StopScreen { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Number of live peer connections.
    pub async fn connection_count(&self) -> usize {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::ConnectionCount { reply }).is_err() {
            return 0;
        }
        done.await.unwrap_or(0)
    }

    /// Leave the channel. Safe to call more than once.
    pub async fn leave(&self) {
        self.left.send_replace(true);
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Leave { reply }).is_ok() {
            let _ = done.await;
        }
        self.audio.stop();
    }
}

struct VoiceSession {
    graph: Graph,
    local: Participant,
    channel_path: String,
    joined_at: i64,
    connector: Arc<dyn PeerConnector>,
    config: VoiceConfig,
    audio: MediaStream,
    screen: Option<MediaStream>,
    mesh: Mesh,
    next_link_id: u64,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
    peers_tx: watch::Sender<Vec<VoicePeer>>,
    /// Peers whose mailbox we have written to.
    signalled: BTreeSet<UserPub>,
}

impl VoiceSession {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut presence: Subscription,
        mut inbox: Subscription,
        mut events: mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::StartScreen { stream, reply }) => {
                        self.start_screen(stream).await;
                        let _ = reply.send(());
                    }
                    Some(Command::StopScreen { reply }) => {
                        self.stop_screen().await;
                        let _ = reply.send(());
                    }
                    Some(Command::ConnectionCount { reply }) => {
                        let _ = reply.send(self.mesh.link_count());
                    }
                    Some(Command::Leave { reply }) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
                Some(event) = presence.recv() => self.on_presence(event).await,
                Some(event) = inbox.recv() => self.on_signal(event).await,
                Some(event) = events.recv() => self.on_peer_event(event).await,
            }
            self.publish_view();
        }
        info!(channel = %self.channel_path, "Left voice channel");
    }

    fn publish_view(&self) {
        let view = self.mesh.view();
        self.peers_tx.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }

    fn publish_presence(&self, joined: bool) {
        let record = VoicePresence {
            pub_key: self.local.pub_key,
            alias: self.local.alias.clone(),
            joined,
            screen_sharing: joined && self.screen.is_some(),
            time: now_ms(),
            joined_at: Some(self.joined_at),
        };
        self.graph.put(
            &paths::voice_peer(&self.channel_path, &self.local.pub_key),
            record.to_value(),
        );
    }

    fn write_signal(&mut self, to: UserPub, record: SignalRecord) {
        debug!(peer = %to.short(), kind = record.kind(), "Sending signal");
        self.graph.put(
            &paths::voice_signal(&self.channel_path, &to, &self.local.pub_key),
            record.to_value(),
        );
        self.signalled.insert(to);
    }

    // -----------------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------------

    async fn on_presence(&mut self, event: GraphEvent) {
        let Ok(remote) = UserPub::from_hex(&event.key) else {
            return;
        };
        if remote == self.local.pub_key {
            return;
        }

        let presence = event
            .value
            .as_ref()
            .and_then(VoicePresence::from_value)
            .filter(|p| p.joined && p.pub_key == remote);

        let Some(presence) = presence else {
            self.mesh.remove_presence(&remote);
            if let Some(link) = self.mesh.remove_link(&remote) {
                link.connection.close().await;
                info!(peer = %remote.short(), "Peer left voice channel");
            }
            return;
        };

        let joined_at = presence.joined_at();
        self.mesh
            .set_presence(remote, presence.alias, presence.screen_sharing);

        let rejoined = match self.mesh.link_mut(&remote) {
            None => true,
            Some(link) => match link.remote_joined_at {
                None => {
                    link.remote_joined_at = Some(joined_at);
                    false
                }
                Some(known) => known != joined_at,
            },
        };
        if !rejoined {
            return;
        }

        if let Some(old) = self.mesh.remove_link(&remote) {
            old.connection.close().await;
        }
        let Some(mut link) = self.create_link(remote).await else {
            return;
        };
        link.remote_joined_at = Some(joined_at);
        self.mesh.insert_link(remote, link);
        info!(peer = %remote.short(), "Peer joined voice channel");

        if should_initiate(self.joined_at, &self.local.pub_key, joined_at, &remote) {
            self.send_offer(remote).await;
        } else {
            debug!(peer = %remote.short(), "Waiting for offer");
        }
    }

    /// New connection with every local track attached.
    async fn create_link(&mut self, remote: UserPub) -> Option<Link> {
        let id = self.next_link_id;
        self.next_link_id += 1;

        let sink = PeerEventSink::new(remote, id, self.events_tx.clone());
        let connecting = self.connector.connect(sink);
        let connection = match bounded(self.config.negotiation_timeout, connecting).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(peer = %remote.short(), error = %e, "Failed to create peer connection");
                return None;
            }
        };

        let streams = std::iter::once(&self.audio).chain(self.screen.as_ref());
        for stream in streams {
            for track in stream.tracks() {
                if let Err(e) = connection.add_track(track, stream.id()).await {
                    warn!(peer = %remote.short(), error = %e, "Failed to attach local track");
                }
            }
        }

        Some(Link::new(id, connection))
    }

    async fn fail_link(&mut self, remote: UserPub, error: MediaError) {
        warn!(peer = %remote.short(), error = %error, "Peer connection failed");
        if let Some(link) = self.mesh.remove_link(&remote) {
            link.connection.close().await;
        }
    }

    // -----------------------------------------------------------------------
    // Offer / answer
    // -----------------------------------------------------------------------

    async fn send_offer(&mut self, remote: UserPub) {
        let limit = self.config.negotiation_timeout;
        let Some(link) = self.mesh.link_mut(&remote) else {
            return;
        };

        link.needs_negotiation = false;
        let offer = bounded(limit, link.connection.create_offer()).await;
        match offer {
            Ok(offer) => {
                if link.phase == LinkPhase::Idle {
                    link.phase = LinkPhase::OfferSent;
                }
                self.write_signal(
                    remote,
                    SignalRecord::Offer {
                        sdp: offer.sdp,
                        time: now_ms(),
                    },
                );
            }
            Err(e) => self.fail_link(remote, e).await,
        }
    }

    /// Offer again if tracks changed and the link is idle between exchanges.
    async fn renegotiate_if_needed(&mut self, remote: UserPub) {
        let ready = self.mesh.link(&remote).map_or(false, |link| {
            link.needs_negotiation
                && matches!(link.phase, LinkPhase::AnswerExchanged | LinkPhase::Connected)
                && link.connection.signaling_state() == SignalingState::Stable
        });
        if ready {
            debug!(peer = %remote.short(), "Renegotiating");
            self.send_offer(remote).await;
        }
    }

    async fn flush_candidates(link: &mut Link) {
        for candidate in std::mem::take(&mut link.pending_candidates) {
            if let Err(e) = link.connection.add_ice_candidate(candidate).await {
                debug!(error = %e, "Dropped buffered ICE candidate");
            }
        }
    }

    async fn on_signal(&mut self, event: GraphEvent) {
        let Ok(remote) = UserPub::from_hex(&event.key) else {
            return;
        };
        let Some(record) = event.value.as_ref().and_then(SignalRecord::from_value) else {
            return;
        };
        if record.time() < self.joined_at - SIGNAL_STALENESS_MS {
            debug!(peer = %remote.short(), kind = record.kind(), "Ignoring stale signal");
            return;
        }

        match record {
            SignalRecord::Offer { sdp, .. } => self.on_offer(remote, sdp).await,
            SignalRecord::Answer { sdp, .. } => self.on_answer(remote, sdp).await,
            SignalRecord::Ice { candidate, .. } => self.on_candidate(remote, candidate).await,
        }
    }

    async fn on_offer(&mut self, remote: UserPub, sdp: String) {
        if !self.mesh.has_link(&remote) {
            let Some(link) = self.create_link(remote).await else {
                return;
            };
            self.mesh.insert_link(remote, link);
        }

        let limit = self.config.negotiation_timeout;
        let local = self.local.pub_key;
        let Some(link) = self.mesh.link_mut(&remote) else {
            return;
        };

        let state = link.connection.signaling_state();
        match decide(Incoming::Offer, state, link.has_remote, &local, &remote) {
            SignalingAction::AcceptOffer => {}
            SignalingAction::RollbackAndAccept => {
                debug!(peer = %remote.short(), "Offer collision, rolling back ours");
                if let Err(e) = link.connection.rollback().await {
                    self.fail_link(remote, e).await;
                    return;
                }
                // our changes still need an offer once this exchange settles
                link.needs_negotiation = true;
            }
            _ => {
                debug!(peer = %remote.short(), ?state, "Ignoring offer");
                return;
            }
        }

        let applied = bounded(
            limit,
            link.connection.set_remote_description(SessionDescription::offer(sdp)),
        )
        .await;
        if let Err(e) = applied {
            self.fail_link(remote, e).await;
            return;
        }
        link.has_remote = true;
        if link.phase == LinkPhase::Idle || link.phase == LinkPhase::OfferSent {
            link.phase = LinkPhase::OfferReceived;
        }

        let answer = match bounded(limit, link.connection.create_answer()).await {
            Ok(answer) => answer,
            Err(e) => {
                self.fail_link(remote, e).await;
                return;
            }
        };
        if link.phase == LinkPhase::OfferReceived {
            link.phase = LinkPhase::AnswerExchanged;
        }
        Self::flush_candidates(link).await;

        self.write_signal(
            remote,
            SignalRecord::Answer {
                sdp: answer.sdp,
                time: now_ms(),
            },
        );
        self.renegotiate_if_needed(remote).await;
    }

    async fn on_answer(&mut self, remote: UserPub, sdp: String) {
        let limit = self.config.negotiation_timeout;
        let local = self.local.pub_key;
        let Some(link) = self.mesh.link_mut(&remote) else {
            debug!(peer = %remote.short(), "Answer from unknown peer");
            return;
        };

        let state = link.connection.signaling_state();
        let action = decide(Incoming::Answer, state, link.has_remote, &local, &remote);
        if action != SignalingAction::ApplyAnswer {
            debug!(peer = %remote.short(), ?state, "Ignoring answer");
            return;
        }

        let applied = bounded(
            limit,
            link.connection.set_remote_description(SessionDescription::answer(sdp)),
        )
        .await;
        if let Err(e) = applied {
            self.fail_link(remote, e).await;
            return;
        }
        link.has_remote = true;
        if link.phase == LinkPhase::OfferSent {
            link.phase = LinkPhase::AnswerExchanged;
        }
        Self::flush_candidates(link).await;
        self.renegotiate_if_needed(remote).await;
    }

    async fn on_candidate(&mut self, remote: UserPub, json: String) {
        let local = self.local.pub_key;
        let Some(candidate) = IceCandidate::from_json(&json) else {
            debug!(peer = %remote.short(), "Malformed ICE candidate");
            return;
        };
        let Some(link) = self.mesh.link_mut(&remote) else {
            return;
        };

        let state = link.connection.signaling_state();
        match decide(Incoming::Candidate, state, link.has_remote, &local, &remote) {
            SignalingAction::AddCandidate => {
                if let Err(e) = link.connection.add_ice_candidate(candidate).await {
                    debug!(peer = %remote.short(), error = %e, "Ignoring ICE candidate");
                }
            }
            _ => link.pending_candidates.push(candidate),
        }
    }

    // -----------------------------------------------------------------------
    // Connection events
    // -----------------------------------------------------------------------

    async fn on_peer_event(&mut self, event: PeerEvent) {
        let remote = event.remote;
        if !self.mesh.is_current(&remote, event.link_id) {
            debug!(peer = %remote.short(), link = event.link_id, "Event from closed link");
            return;
        }

        match event.kind {
            PeerEventKind::IceCandidate(candidate) => self.write_signal(
                remote,
                SignalRecord::Ice {
                    candidate: candidate.to_json(),
                    time: now_ms(),
                },
            ),
            PeerEventKind::Track(track) => {
                if let Some(link) = self.mesh.link_mut(&remote) {
                    debug!(
                        peer = %remote.short(),
                        track = %track.id,
                        kind = track.kind.as_str(),
                        "Remote track"
                    );
                    if !link.tracks.iter().any(|t| t.id == track.id) {
                        link.tracks.push(track);
                    }
                }
            }
            PeerEventKind::TrackRemoved(id) => {
                if let Some(link) = self.mesh.link_mut(&remote) {
                    link.tracks.retain(|t| t.id != id);
                }
            }
            PeerEventKind::NegotiationNeeded => {
                if let Some(link) = self.mesh.link_mut(&remote) {
                    link.needs_negotiation = true;
                }
                self.renegotiate_if_needed(remote).await;
            }
            PeerEventKind::Connected => {
                if let Some(link) = self.mesh.link_mut(&remote) {
                    link.phase = LinkPhase::Connected;
                    info!(peer = %remote.short(), "Peer connected");
                }
            }
            PeerEventKind::Failed => {
                self.fail_link(remote, MediaError::WebRtc("connection failed".into()))
                    .await
            }
        }
    }

    // -----------------------------------------------------------------------
    // Screen share and teardown
    // -----------------------------------------------------------------------

    async fn start_screen(&mut self, stream: MediaStream) {
        if self.screen.is_some() {
            debug!("Screen share already active");
            stream.stop();
            return;
        }

        for link in self.mesh.links_mut() {
            for track in stream.tracks() {
                if let Err(e) = link.connection.add_track(track, stream.id()).await {
                    warn!(link = link.id, error = %e, "Failed to add screen track");
                }
            }
        }
        self.screen = Some(stream);
        self.publish_presence(true);
        info!(channel = %self.channel_path, "Screen share started");
    }

    async fn stop_screen(&mut self) {
        let Some(stream) = self.screen.take() else {
            return;
        };

        for link in self.mesh.links_mut() {
            for track in stream.tracks() {
                if let Err(e) = link.connection.remove_track(track.id()).await {
                    debug!(link = link.id, error = %e, "Failed to remove screen track");
                }
            }
        }
        stream.stop();
        self.publish_presence(true);
        info!(channel = %self.channel_path, "Screen share stopped");
    }

    async fn teardown(&mut self) {
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
        self.publish_presence(false);

        for link in self.mesh.clear() {
            link.connection.close().await;
        }
        for to in std::mem::take(&mut self.signalled) {
            self.graph
                .delete(&paths::voice_signal(&self.channel_path, &to, &self.local.pub_key));
        }
        self.graph
            .delete(&paths::voice_inbox(&self.channel_path, &self.local.pub_key));
        self.audio.stop();
        self.publish_view();
    }
}
