//! Account registration, login and recovery.
//!
//! Accounts live entirely in the graph:
//! - `~@<alias>/<pub> = true` indexes the accounts registered under an alias
//! - `~<pub>` holds `{alias, pub, epub}`
//! - `~<pub>/auth/password` and `~<pub>/auth/recovery` hold the private keys
//!   sealed under the password and under the recovery-phrase password
//!
//! Unsealing is Argon2-bound, so it runs on the blocking pool.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{info, warn};

use agora_graph::Graph;
use agora_shared::identity::SealedKeys;
use agora_shared::protocol::{AccountRecord, ProfileRecord, Record};
use agora_shared::types::now_ms;
use agora_shared::{paths, recovery, Identity, Path, UserPub};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::secrets::{KeyAgreement, X25519Agreement};
use crate::session::Session;
use crate::voice::MediaBackend;

pub enum AuthPhase {
    Anonymous,
    Authenticating,
    Authenticated(Arc<Session>),
}

/// Returned once by a successful registration. The recovery phrase is not
/// stored anywhere in clear and cannot be shown again.
pub struct Registration {
    pub pub_key: UserPub,
    pub recovery_phrase: String,
    pub session: Arc<Session>,
}

pub struct Client {
    graph: Graph,
    config: ClientConfig,
    media: MediaBackend,
    agreement: Arc<dyn KeyAgreement>,
    phase: Mutex<AuthPhase>,
}

impl Client {
    pub fn new(graph: Graph, config: ClientConfig, media: MediaBackend) -> Self {
        Self {
            graph,
            config,
            media,
            agreement: Arc::new(X25519Agreement),
            phase: Mutex::new(AuthPhase::Anonymous),
        }
    }

    pub fn with_key_agreement(mut self, agreement: Arc<dyn KeyAgreement>) -> Self {
        self.agreement = agreement;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The current session, if logged in.
    pub fn session(&self) -> Result<Arc<Session>> {
        match &*self.lock_phase()? {
            AuthPhase::Authenticated(session) => Ok(session.clone()),
            _ => Err(ClientError::NotAuthenticated),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_ok()
    }

    fn lock_phase(&self) -> Result<std::sync::MutexGuard<'_, AuthPhase>> {
        self.phase.lock().map_err(|_| ClientError::NotAuthenticated)
    }

    /// Enter `Authenticating`, closing any session that was open.
    async fn begin(&self) -> Result<()> {
        let previous = {
            let mut phase = self.lock_phase()?;
            if matches!(*phase, AuthPhase::Authenticating) {
                return Err(ClientError::AuthInProgress);
            }
            std::mem::replace(&mut *phase, AuthPhase::Authenticating)
        };
        if let AuthPhase::Authenticated(session) = previous {
            session.close().await;
        }
        Ok(())
    }

    fn finish(&self, outcome: Result<Identity>) -> Result<Arc<Session>> {
        let mut phase = self.lock_phase()?;
        match outcome {
            Ok(identity) => {
                let session = Session::new(
                    identity,
                    self.graph.clone(),
                    self.config.clone(),
                    self.media.clone(),
                    self.agreement.clone(),
                );
                *phase = AuthPhase::Authenticated(session.clone());
                Ok(session)
            }
            Err(e) => {
                *phase = AuthPhase::Anonymous;
                Err(e)
            }
        }
    }

    fn check_password(&self, password: &str) -> Result<()> {
        if password.chars().count() < self.config.min_password_len {
            return Err(ClientError::WeakPassword(self.config.min_password_len));
        }
        Ok(())
    }

    /// Create an account and log into it.
    pub async fn register(&self, alias: &str, password: &str) -> Result<Registration> {
        let alias = alias.trim();
        if alias.is_empty() {
            return Err(ClientError::WrongCredentials);
        }
        self.check_password(password)?;
        self.begin().await?;

        let created = self.create_account(alias, password).await;
        let recovery_phrase = created
            .as_ref()
            .map(|(_, phrase)| phrase.clone())
            .unwrap_or_default();
        let session = self.finish(created.map(|(identity, _)| identity))?;
        let pub_key = session.pub_key();
        info!(user = %pub_key.short(), "Registered account");

        Ok(Registration {
            pub_key,
            recovery_phrase,
            session,
        })
    }

    async fn create_account(&self, alias: &str, password: &str) -> Result<(Identity, String)> {
        if !self.accounts_for(alias, self.config.probe_timeout).await.is_empty() {
            return Err(ClientError::AliasTaken);
        }

        let identity = Identity::generate(alias);
        let phrase = recovery::generate_phrase()?;
        let recovery_password = recovery::phrase_password(&phrase)?;

        let sealing = identity.clone();
        let password = password.to_string();
        let (by_password, by_phrase) = tokio::task::spawn_blocking(move || {
            Ok::<_, ClientError>((sealing.seal(&password)?, sealing.seal(&recovery_password)?))
        })
        .await??;

        let pub_key = identity.pub_key();
        let account = AccountRecord {
            alias: alias.to_string(),
            pub_key,
            epub: identity.epub(),
        };
        let profile = ProfileRecord {
            alias: alias.to_string(),
            created_at: now_ms(),
            avatar: None,
        };

        self.graph.put(&paths::user(&pub_key), account.to_value());
        self.graph.put(&paths::password_slot(&pub_key), by_password.to_value());
        self.graph.put(&paths::recovery_slot(&pub_key), by_phrase.to_value());
        self.graph.put(&paths::profile(&pub_key), profile.to_value());
        self.graph
            .put(&paths::alias_index(alias).child(pub_key.to_hex()), Value::Bool(true));

        Ok((identity, phrase))
    }

    /// Log in with alias and password.
    pub async fn login(&self, alias: &str, password: &str) -> Result<Arc<Session>> {
        let alias = alias.trim();
        self.check_password(password)?;
        self.begin().await?;

        let outcome = self
            .unlock(alias, password, paths::password_slot)
            .await
            .and_then(|found| found.ok_or(ClientError::WrongCredentials));
        let session = self.finish(outcome)?;
        info!(user = %session.pub_key().short(), "Logged in");
        Ok(session)
    }

    /// Log in with the recovery phrase handed out at registration.
    pub async fn restore_from_recovery_phrase(
        &self,
        alias: &str,
        phrase: &str,
    ) -> Result<Arc<Session>> {
        let alias = alias.trim();
        if !recovery::validate_phrase(phrase) {
            return Err(ClientError::InvalidMnemonic);
        }
        let password = recovery::phrase_password(phrase).map_err(|_| ClientError::InvalidMnemonic)?;
        self.begin().await?;

        let outcome = self
            .unlock(alias, &password, paths::recovery_slot)
            .await
            .and_then(|found| found.ok_or(ClientError::AccountNotFound));
        let session = self.finish(outcome)?;
        info!(user = %session.pub_key().short(), "Restored account from recovery phrase");
        Ok(session)
    }

    /// Close the session, if any, and return to `Anonymous`.
    pub async fn logout(&self) {
        let previous = match self.lock_phase() {
            Ok(mut phase) => std::mem::replace(&mut *phase, AuthPhase::Anonymous),
            Err(_) => return,
        };
        if let AuthPhase::Authenticated(session) = previous {
            session.close().await;
        }
    }

    /// Pubs listed under the alias index.
    async fn accounts_for(&self, alias: &str, timeout: std::time::Duration) -> Vec<UserPub> {
        let index = self.graph.once(&paths::alias_index(alias), timeout).await;
        let Some(Value::Object(entries)) = index else {
            return Vec::new();
        };
        entries
            .iter()
            .filter(|(_, listed)| listed.as_bool() == Some(true))
            .filter_map(|(key, _)| UserPub::from_hex(key).ok())
            .collect()
    }

    /// Try every account under `alias` until one of its `slot` records opens
    /// with `password`.
    async fn unlock(
        &self,
        alias: &str,
        password: &str,
        slot: fn(&UserPub) -> Path,
    ) -> Result<Option<Identity>> {
        for pub_key in self.accounts_for(alias, self.config.lookup_timeout).await {
            let sealed = self
                .graph
                .once(&slot(&pub_key), self.config.lookup_timeout)
                .await
                .as_ref()
                .and_then(SealedKeys::from_value);
            let Some(sealed) = sealed else {
                warn!(user = %pub_key.short(), "Account has no sealed keys");
                continue;
            };

            let alias_owned = alias.to_string();
            let password = password.to_string();
            let opened = tokio::task::spawn_blocking(move || {
                Identity::unseal(&alias_owned, &sealed, &password)
            })
            .await?;

            match opened {
                Ok(identity) if identity.pub_key() == pub_key => return Ok(Some(identity)),
                Ok(_) => warn!(user = %pub_key.short(), "Sealed keys belong to another account"),
                Err(_) => continue,
            }
        }
        Ok(None)
    }
}
