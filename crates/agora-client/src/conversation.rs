//! Encrypted message channels.
//!
//! Direct messages, group messages and server channel messages share one
//! flow. Sending encrypts and signs the text under the scope's key and
//! writes `{id, ciphertext, from, fromAlias, time, signature}` under the
//! scope's message path. Listening resolves the key before subscribing, then
//! emits the whole conversation, sorted by time, on every change.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use agora_shared::constants::UNREADABLE_PLACEHOLDER;
use agora_shared::crypto::{self, SymmetricKey};
use agora_shared::identity::verify_ciphertext;
use agora_shared::protocol::{GroupRef, MessageRecord, Record, ServerRef};
use agora_shared::types::{conversation_id, message_id, now_ms};
use agora_shared::{paths, ChannelId, GroupId, Path, ServerId, UserPub};

use crate::error::{ClientError, Result};
use crate::live::LiveView;
use crate::session::Session;

/// Where a conversation lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Direct(UserPub),
    Group(GroupId),
    Channel { server: ServerId, channel: ChannelId },
}

impl Scope {
    pub fn messages_path(&self, me: &UserPub) -> Path {
        match self {
            Scope::Direct(peer) => paths::dm_messages(&conversation_id(me, peer)),
            Scope::Group(group) => paths::group_messages(group),
            Scope::Channel { server, channel } => paths::server_channel_messages(server, channel),
        }
    }
}

/// A message as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub text: String,
    pub from: UserPub,
    pub from_alias: String,
    pub time: i64,
    /// The signature matched the sender and the text decrypted.
    pub verified: bool,
}

/// Decrypt and check one stored record. Unreadable or forged content
/// becomes the placeholder text; the message itself is kept.
pub fn open_message(record: MessageRecord, key: &SymmetricKey) -> Message {
    let signed = match &record.signature {
        Some(signature) => verify_ciphertext(&record.from, &record.ciphertext, signature).is_ok(),
        None => false,
    };
    let forged = record.signature.is_some() && !signed;

    let text = match crypto::decrypt_text(key, &record.ciphertext) {
        Ok(text) if !forged => Some(text),
        Ok(_) => {
            warn!(id = %record.id, from = %record.from.short(), "Message signature mismatch");
            None
        }
        Err(_) => {
            debug!(id = %record.id, "Cannot decrypt message");
            None
        }
    };

    Message {
        verified: signed && text.is_some(),
        text: text.unwrap_or_else(|| UNREADABLE_PLACEHOLDER.to_string()),
        id: record.id,
        from: record.from,
        from_alias: record.from_alias,
        time: record.time,
    }
}

fn sorted(messages: &BTreeMap<String, Message>) -> Vec<Message> {
    let mut list: Vec<Message> = messages.values().cloned().collect();
    list.sort_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));
    list
}

impl Session {
    /// Key for `scope`: the pairwise secret for direct messages, the stored
    /// group or server key otherwise, falling back to the id itself.
    pub(crate) async fn scope_key(&self, scope: &Scope) -> Result<SymmetricKey> {
        let me = self.me()?;
        match scope {
            Scope::Direct(peer) => self
                .secrets
                .shared_secret(peer)
                .await
                .ok_or_else(|| ClientError::SecretUnavailable(peer.short())),
            Scope::Group(group) => {
                let token = self
                    .read::<GroupRef>(&paths::own_group(&me, group), self.config.probe_timeout)
                    .await
                    .map(|r| r.encryption_key)
                    .filter(|k| !k.is_empty())
                    .unwrap_or_else(|| group.to_string());
                Ok(crypto::scope_key(&token))
            }
            Scope::Channel { server, .. } => {
                let token = self
                    .read::<ServerRef>(&paths::own_server(&me, server), self.config.probe_timeout)
                    .await
                    .map(|r| r.encryption_key)
                    .filter(|k| !k.is_empty())
                    .unwrap_or_else(|| server.to_string());
                Ok(crypto::scope_key(&token))
            }
        }
    }

    /// Encrypt, sign and store `text` in `scope`. Returns the message id.
    pub async fn send(&self, scope: &Scope, text: &str) -> Result<String> {
        let me = self.me()?;
        let key = self.scope_key(scope).await?;
        let signed = self.with_identity(|identity| identity.encrypt_and_sign(text, &key))??;

        let time = now_ms();
        let id = message_id(time);
        let record = MessageRecord {
            id: id.clone(),
            ciphertext: signed.ciphertext,
            from: me,
            from_alias: self.alias().to_string(),
            time,
            signature: Some(signed.signature),
        };
        self.graph
            .put(&scope.messages_path(&me).child(id.clone()), record.to_value());
        debug!(id = %id, "Message sent");
        Ok(id)
    }

    /// Live, time-sorted view of every message in `scope`.
    pub async fn listen(&self, scope: &Scope) -> Result<LiveView<Vec<Message>>> {
        let me = self.me()?;
        let key = self.scope_key(scope).await?;
        let mut records = self.graph.map(&scope.messages_path(&me));

        let view = LiveView::spawn(move |tx| async move {
            let mut messages: BTreeMap<String, Message> = BTreeMap::new();
            while let Some(event) = records.recv().await {
                match event.value.as_ref().and_then(MessageRecord::from_value) {
                    Some(record) => {
                        messages.insert(event.key, open_message(record, &key));
                    }
                    None if event.value.is_none() => {
                        messages.remove(&event.key);
                    }
                    None => {
                        debug!(key = %event.key, "Skipping malformed message record");
                        continue;
                    }
                }
                if tx.send(sorted(&messages)).is_err() {
                    break;
                }
            }
        });
        Ok(self.watch(view))
    }

    pub async fn send_dm(&self, peer: &UserPub, text: &str) -> Result<String> {
        self.send(&Scope::Direct(*peer), text).await
    }

    pub async fn listen_dms(&self, peer: &UserPub) -> Result<LiveView<Vec<Message>>> {
        self.listen(&Scope::Direct(*peer)).await
    }

    pub async fn send_group_message(&self, group: &GroupId, text: &str) -> Result<String> {
        self.send(&Scope::Group(group.clone()), text).await
    }

    pub async fn listen_group_messages(&self, group: &GroupId) -> Result<LiveView<Vec<Message>>> {
        self.listen(&Scope::Group(group.clone())).await
    }

    pub async fn send_server_message(
        &self,
        server: &ServerId,
        channel: &ChannelId,
        text: &str,
    ) -> Result<String> {
        let scope = Scope::Channel {
            server: server.clone(),
            channel: channel.clone(),
        };
        self.send(&scope, text).await
    }

    pub async fn listen_server_messages(
        &self,
        server: &ServerId,
        channel: &ChannelId,
    ) -> Result<LiveView<Vec<Message>>> {
        let scope = Scope::Channel {
            server: server.clone(),
            channel: channel.clone(),
        };
        self.listen(&scope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_shared::Identity;

    fn record(identity: &Identity, key: &SymmetricKey, text: &str, time: i64) -> MessageRecord {
        let signed = identity.encrypt_and_sign(text, key).unwrap();
        MessageRecord {
            id: message_id(time),
            ciphertext: signed.ciphertext,
            from: identity.pub_key(),
            from_alias: identity.alias().to_string(),
            time,
            signature: Some(signed.signature),
        }
    }

    #[test]
    fn opens_signed_message() {
        let alice = Identity::generate("alice");
        let key = crypto::scope_key("grp-1-abc");
        let message = open_message(record(&alice, &key, "hi all", 5), &key);
        assert_eq!(message.text, "hi all");
        assert!(message.verified);
        assert_eq!(message.from, alice.pub_key());
    }

    #[test]
    fn wrong_key_yields_placeholder() {
        let alice = Identity::generate("alice");
        let key = crypto::scope_key("grp-1-abc");
        let other = crypto::scope_key("grp-2-xyz");
        let message = open_message(record(&alice, &key, "secret", 5), &other);
        assert_eq!(message.text, UNREADABLE_PLACEHOLDER);
        assert!(!message.verified);
    }

    #[test]
    fn spoofed_sender_yields_placeholder() {
        let alice = Identity::generate("alice");
        let mallory = Identity::generate("mallory");
        let key = crypto::scope_key("srv-1-abc");
        let mut forged = record(&mallory, &key, "send me money", 5);
        forged.from = alice.pub_key();
        forged.from_alias = "alice".into();

        let message = open_message(forged, &key);
        assert_eq!(message.text, UNREADABLE_PLACEHOLDER);
        assert_eq!(message.from, alice.pub_key());
    }

    #[test]
    fn direct_scope_path_is_symmetric() {
        let (a, b) = (UserPub([1; 32]), UserPub([2; 32]));
        assert_eq!(
            Scope::Direct(b).messages_path(&a),
            Scope::Direct(a).messages_path(&b)
        );
        let channel = Scope::Channel {
            server: ServerId::from("srv-1"),
            channel: ChannelId::from("general"),
        };
        assert_eq!(
            channel.messages_path(&a).to_string(),
            "servers/srv-1/channels/general/messages"
        );
    }
}
