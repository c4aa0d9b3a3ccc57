//! Voice channel operations on a session.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use agora_media::loopback::{LoopbackConnector, LoopbackDevices};
use agora_media::{
    join_voice_channel, CaptureSource, MediaDevices, Participant, PeerConnector, VoiceHandle,
    VoicePeer,
};
use agora_shared::protocol::{Record, VoicePresence};
use agora_shared::{paths, ChannelId, ServerId, UserPub};

use crate::error::{ClientError, Result};
use crate::live::LiveView;
use crate::session::Session;

/// Capture devices and peer connection factory used for calls.
#[derive(Clone)]
pub struct MediaBackend {
    pub devices: Arc<dyn MediaDevices>,
    pub connector: Arc<dyn PeerConnector>,
}

impl MediaBackend {
    pub fn new(devices: Arc<dyn MediaDevices>, connector: Arc<dyn PeerConnector>) -> Self {
        Self { devices, connector }
    }

    /// Synthetic devices and in-process connections.
    pub fn loopback() -> Self {
        Self {
            devices: Arc::new(LoopbackDevices::new()),
            connector: Arc::new(LoopbackConnector::new()),
        }
    }
}

/// Sidebar entry for someone present in a voice channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOccupant {
    #[serde(rename = "pub")]
    pub pub_key: UserPub,
    pub alias: String,
    pub screen_sharing: bool,
}

/// Graph key of a server's voice channel.
pub fn voice_channel_path(server: &ServerId, channel: &ChannelId) -> String {
    paths::voice_channel_key(server, channel)
}

impl Session {
    /// Join `channel_path`, leaving any call already in progress. Returns
    /// the live peer list.
    ///
    /// The voice slot is not locked while the microphone is acquired, and
    /// logging out abandons a pending join.
    pub async fn join_voice_channel(
        &self,
        channel_path: &str,
    ) -> Result<watch::Receiver<Vec<VoicePeer>>> {
        let me = self.me()?;
        self.leave_voice_channel().await;

        let joining = join_voice_channel(
            self.graph.clone(),
            Participant {
                pub_key: me,
                alias: self.alias().to_string(),
            },
            channel_path.to_string(),
            self.media.devices.clone(),
            self.media.connector.clone(),
            self.config.voice_config(),
        );
        let handle = tokio::select! {
            handle = joining => Arc::new(handle?),
            _ = self.closed() => return Err(ClientError::NotAuthenticated),
        };

        let mut current = self.voice.lock().await;
        if !self.is_open() {
            drop(current);
            handle.leave().await;
            return Err(ClientError::NotAuthenticated);
        }
        let previous = current.replace(handle.clone());
        drop(current);
        if let Some(previous) = previous {
            previous.leave().await;
        }
        Ok(handle.peers())
    }

    /// Leave the current call. Does nothing outside a call. A pending
    /// screen capture on the call is cancelled.
    pub async fn leave_voice_channel(&self) {
        let handle = self.voice.lock().await.take();
        if let Some(handle) = handle {
            info!(channel = %handle.channel_path(), "Leaving voice channel");
            handle.leave().await;
        }
    }

    /// Channel path of the current call.
    pub async fn voice_channel(&self) -> Option<String> {
        self.voice
            .lock()
            .await
            .as_ref()
            .map(|h| h.channel_path().to_string())
    }

    /// Live peer list of the current call.
    pub async fn voice_peers(&self) -> Option<watch::Receiver<Vec<VoicePeer>>> {
        self.voice.lock().await.as_ref().map(|h| h.peers())
    }

    /// Flip the microphone. Returns whether it is now muted.
    pub async fn toggle_mute(&self) -> Result<bool> {
        let voice = self.voice.lock().await;
        let handle = voice.as_ref().ok_or(ClientError::NotInVoiceChannel)?;
        Ok(handle.toggle_mute())
    }

    /// Capture the screen and share it with the call. The capture prompt
    /// is awaited without holding the voice slot, so leaving or logging out
    /// cancels it.
    pub async fn start_screen_share(&self, source: Option<&str>) -> Result<()> {
        self.me()?;
        let handle = self.current_call().await?;
        handle.start_screen_share(source).await?;
        Ok(())
    }

    pub async fn stop_screen_share(&self) {
        if let Ok(handle) = self.current_call().await {
            handle.stop_screen_share().await;
        }
    }

    async fn current_call(&self) -> Result<Arc<VoiceHandle>> {
        self.voice
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotInVoiceChannel)
    }

    /// Screens and windows that can be shared.
    pub async fn capture_sources(&self) -> Result<Vec<CaptureSource>> {
        Ok(self.media.devices.capture_sources().await?)
    }

    /// Who is in `channel_path`, without joining it.
    pub fn listen_voice_channel_peers(
        &self,
        channel_path: &str,
    ) -> Result<LiveView<Vec<ChannelOccupant>>> {
        self.me()?;
        let mut presence = self.graph.map(&paths::voice_peers(channel_path));

        let view = LiveView::spawn(move |tx| async move {
            let mut occupants: BTreeMap<String, ChannelOccupant> = BTreeMap::new();
            while let Some(event) = presence.recv().await {
                let record = event.value.as_ref().and_then(VoicePresence::from_value);
                match record {
                    Some(p) if p.joined => {
                        occupants.insert(
                            event.key,
                            ChannelOccupant {
                                pub_key: p.pub_key,
                                alias: p.alias,
                                screen_sharing: p.screen_sharing,
                            },
                        );
                    }
                    _ => {
                        occupants.remove(&event.key);
                    }
                }
                if tx.send(occupants.values().cloned().collect()).is_err() {
                    break;
                }
            }
        });
        Ok(self.watch(view))
    }
}
