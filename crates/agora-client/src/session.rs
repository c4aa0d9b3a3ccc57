//! Authenticated session context.
//!
//! A [`Session`] is created by a successful register, login or recovery and
//! carries everything the social and voice operations need: the unlocked
//! identity, the graph replica, the secret cache, the live listeners and the
//! active voice call. Logging out closes it and drops the private keys;
//! every operation on a closed session fails with `NotAuthenticated`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use agora_graph::Graph;
use agora_media::VoiceHandle;
use agora_shared::protocol::Record;
use agora_shared::{Identity, Path, UserPub};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::live::LiveView;
use crate::secrets::{KeyAgreement, SecretCache};
use crate::voice::MediaBackend;

pub struct Session {
    pub_key: UserPub,
    alias: String,
    /// Emptied by `close`.
    identity: Mutex<Option<Identity>>,
    pub(crate) graph: Graph,
    pub(crate) config: ClientConfig,
    pub(crate) secrets: SecretCache,
    pub(crate) media: MediaBackend,
    pub(crate) voice: tokio::sync::Mutex<Option<Arc<VoiceHandle>>>,
    listeners: Mutex<Vec<AbortHandle>>,
    closed: watch::Sender<bool>,
}

impl Session {
    pub(crate) fn new(
        identity: Identity,
        graph: Graph,
        config: ClientConfig,
        media: MediaBackend,
        agreement: Arc<dyn KeyAgreement>,
    ) -> Arc<Self> {
        let secrets = SecretCache::new(
            graph.clone(),
            identity.encryption_secret().clone(),
            agreement,
            config.lookup_timeout,
        );
        Arc::new(Self {
            pub_key: identity.pub_key(),
            alias: identity.alias().to_string(),
            identity: Mutex::new(Some(identity)),
            graph,
            config,
            secrets,
            media,
            voice: tokio::sync::Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            closed: watch::channel(false).0,
        })
    }

    pub fn pub_key(&self) -> UserPub {
        self.pub_key
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }

    /// Whether the signing and encryption keys are still in memory.
    pub fn holds_keys(&self) -> bool {
        let identity = self.identity.lock().map(|slot| slot.is_some()).unwrap_or(false);
        identity || self.secrets.holds_key()
    }

    /// Number of secrets currently cached.
    pub fn cached_secrets(&self) -> usize {
        self.secrets.len()
    }

    /// The local pub, if the session is still open.
    pub(crate) fn me(&self) -> Result<UserPub> {
        if self.is_open() {
            Ok(self.pub_key())
        } else {
            Err(ClientError::NotAuthenticated)
        }
    }

    /// Run `f` with the unlocked identity.
    pub(crate) fn with_identity<R>(&self, f: impl FnOnce(&Identity) -> R) -> Result<R> {
        let slot = self
            .identity
            .lock()
            .map_err(|_| ClientError::NotAuthenticated)?;
        slot.as_ref().map(f).ok_or(ClientError::NotAuthenticated)
    }

    /// Resolves once the session is closed.
    pub(crate) fn closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut closed = self.closed.subscribe();
        async move {
            let _ = closed.wait_for(|closed| *closed).await;
        }
    }

    /// Tie a listener's lifetime to the session.
    pub(crate) fn watch<T: Send + 'static>(&self, view: LiveView<T>) -> LiveView<T> {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|handle| !handle.is_finished());
            listeners.push(view.abort_handle());
        }
        view
    }

    /// Read and validate the record at `path`.
    pub(crate) async fn read<T: Record>(&self, path: &Path, timeout: Duration) -> Option<T> {
        self.graph
            .once(path, timeout)
            .await
            .as_ref()
            .and_then(T::from_value)
    }

    /// Stop listeners, drop the keys and leave any voice call.
    pub(crate) async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        let listeners = self
            .listeners
            .lock()
            .map(|mut l| std::mem::take(&mut *l))
            .unwrap_or_default();
        debug!(count = listeners.len(), "Stopping listeners");
        for handle in listeners {
            handle.abort();
        }

        self.secrets.clear();
        if let Ok(mut identity) = self.identity.lock() {
            identity.take();
        }

        let voice = self.voice.lock().await.take();
        if let Some(voice) = voice {
            voice.leave().await;
        }
        info!(user = %self.pub_key().short(), "Session closed");
    }
}
