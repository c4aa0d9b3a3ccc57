//! Pairwise secrets for direct conversations.
//!
//! A secret is derived from the local X25519 key and the peer's published
//! `epub`. Successful derivations are cached for the life of the session;
//! failures are not, so a later call retries the lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};
use x25519_dalek::StaticSecret;

use agora_graph::Graph;
use agora_shared::crypto::{self, SymmetricKey};
use agora_shared::paths;
use agora_shared::protocol::{AccountRecord, Record};
use agora_shared::{EncryptionPub, UserPub};

/// Derives a symmetric key from a local secret and a peer's public key.
pub trait KeyAgreement: Send + Sync {
    fn agree(&self, own: &StaticSecret, peer: &EncryptionPub) -> SymmetricKey;
}

/// Diffie-Hellman over X25519.
#[derive(Debug, Default, Clone, Copy)]
pub struct X25519Agreement;

impl KeyAgreement for X25519Agreement {
    fn agree(&self, own: &StaticSecret, peer: &EncryptionPub) -> SymmetricKey {
        crypto::derive_shared_secret(own, peer)
    }
}

pub struct SecretCache {
    graph: Graph,
    /// Taken by `clear`; derivation fails once it is gone.
    own: Mutex<Option<StaticSecret>>,
    agreement: Arc<dyn KeyAgreement>,
    lookup_timeout: Duration,
    cache: Mutex<HashMap<UserPub, SymmetricKey>>,
}

impl SecretCache {
    pub fn new(
        graph: Graph,
        own: StaticSecret,
        agreement: Arc<dyn KeyAgreement>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            graph,
            own: Mutex::new(Some(own)),
            agreement,
            lookup_timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, peer: &UserPub) -> Option<SymmetricKey> {
        self.cache.lock().ok()?.get(peer).copied()
    }

    /// Secret shared with `peer`, or `None` if their `epub` could not be
    /// read within the lookup timeout.
    pub async fn shared_secret(&self, peer: &UserPub) -> Option<SymmetricKey> {
        if let Some(secret) = self.cached(peer) {
            return Some(secret);
        }

        let account = self
            .graph
            .once(&paths::user(peer), self.lookup_timeout)
            .await
            .as_ref()
            .and_then(AccountRecord::from_value);
        let Some(account) = account else {
            warn!(peer = %peer.short(), "No encryption key published for peer");
            return None;
        };

        let own = self.own.lock().ok().and_then(|own| own.clone())?;
        let secret = self.agreement.agree(&own, &account.epub);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(*peer, secret);
        }
        debug!(peer = %peer.short(), "Derived shared secret");
        Some(secret)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the local X25519 secret is still held.
    pub fn holds_key(&self) -> bool {
        self.own.lock().map(|own| own.is_some()).unwrap_or(false)
    }

    /// Forget every cached secret and drop the local key.
    pub fn clear(&self) {
        if let Ok(mut own) = self.own.lock() {
            own.take();
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_graph::{spawn_graph, GraphConfig};
    use agora_shared::Identity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl KeyAgreement for Counting {
        fn agree(&self, own: &StaticSecret, peer: &EncryptionPub) -> SymmetricKey {
            self.0.fetch_add(1, Ordering::SeqCst);
            X25519Agreement.agree(own, peer)
        }
    }

    fn publish(graph: &Graph, identity: &Identity) {
        let account = AccountRecord {
            alias: identity.alias().to_string(),
            pub_key: identity.pub_key(),
            epub: identity.epub(),
        };
        graph.put(&paths::user(&identity.pub_key()), account.to_value());
    }

    #[tokio::test]
    async fn secrets_are_cached_after_first_derivation() {
        let graph = spawn_graph(GraphConfig::default()).unwrap();
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");
        publish(&graph, &bob);

        let counter = Arc::new(Counting::default());
        let cache = SecretCache::new(
            graph,
            alice.encryption_secret().clone(),
            counter.clone(),
            Duration::from_secs(1),
        );

        let first = cache.shared_secret(&bob.pub_key()).await.unwrap();
        let second = cache.shared_secret(&bob.pub_key()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        let expected = crypto::derive_shared_secret(bob.encryption_secret(), &alice.epub());
        assert_eq!(first, expected);
    }

    #[tokio::test]
    async fn failed_lookups_are_retried() {
        let graph = spawn_graph(GraphConfig::default()).unwrap();
        let alice = Identity::generate("alice");
        let bob = Identity::generate("bob");

        let cache = SecretCache::new(
            graph.clone(),
            alice.encryption_secret().clone(),
            Arc::new(X25519Agreement),
            Duration::from_millis(50),
        );
        assert!(cache.shared_secret(&bob.pub_key()).await.is_none());
        assert!(cache.is_empty());

        publish(&graph, &bob);
        assert!(cache.shared_secret(&bob.pub_key()).await.is_some());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.holds_key());
        assert!(cache.shared_secret(&bob.pub_key()).await.is_none());
    }
}
