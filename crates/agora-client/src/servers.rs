//! Servers: channels, membership, bans and avatars.
//!
//! Server state is public under `servers/<id>`. Each member also keeps a
//! private reference `~<pub>/servers/<id>` holding the server key. Joiners
//! copy the key verbatim from the owner's reference; when it cannot be read
//! the server id is used as the key.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use agora_graph::Graph;
use agora_shared::constants::{
    AVATAR_PREFIX, DEFAULT_TEXT_CHANNEL, DEFAULT_VOICE_CHANNEL, MAX_AVATAR_BYTES, UNKNOWN_ALIAS,
};
use agora_shared::crypto;
use agora_shared::protocol::{
    BanRecord, ChannelRecord, MemberRecord, Record, ServerRecord, ServerRef,
};
use agora_shared::types::now_ms;
use agora_shared::{paths, ChannelId, ChannelKind, MemberRole, ServerId, UserPub};

use crate::error::{ClientError, Result};
use crate::live::{LiveView, TaskSet};
use crate::session::Session;

/// A joined server with its channels, as listed in the sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSummary {
    pub id: ServerId,
    pub name: String,
    pub owner: Option<UserPub>,
    pub created_at: i64,
    pub channels: Vec<ChannelRecord>,
    pub encryption_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMember {
    #[serde(rename = "pub")]
    pub pub_key: UserPub,
    pub alias: String,
    pub role: MemberRole,
    pub joined_at: i64,
}

impl ServerMember {
    /// `None` for banned or malformed entries.
    fn from_record(record: MemberRecord) -> Option<Self> {
        if record.banned {
            return None;
        }
        Some(Self {
            pub_key: record.pub_key,
            alias: record
                .alias
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| UNKNOWN_ALIAS.to_string()),
            role: record.role.unwrap_or(MemberRole::Member),
            joined_at: record.joined_at.unwrap_or(0),
        })
    }
}

enum ServerUpdate {
    Info(ServerId, Option<ServerRecord>),
    Channel(ServerId, String, Option<ChannelRecord>),
}

/// Forward the server record and channel list of `id` into `updates`.
fn follow_server(
    graph: &Graph,
    id: ServerId,
    updates: mpsc::UnboundedSender<ServerUpdate>,
) -> tokio::task::JoinHandle<()> {
    let mut info = graph.on(&paths::server(&id));
    let mut channels = graph.map(&paths::server_channels(&id));
    tokio::spawn(async move {
        loop {
            let update = tokio::select! {
                event = info.recv() => match event {
                    Some(event) => ServerUpdate::Info(
                        id.clone(),
                        event.value.as_ref().and_then(ServerRecord::from_value),
                    ),
                    None => break,
                },
                event = channels.recv() => match event {
                    Some(event) => ServerUpdate::Channel(
                        id.clone(),
                        event.key,
                        event.value.as_ref().and_then(ChannelRecord::from_value),
                    ),
                    None => break,
                },
            };
            if updates.send(update).is_err() {
                break;
            }
        }
    })
}

#[derive(Default)]
struct ServerEntry {
    reference: Option<ServerRef>,
    record: Option<ServerRecord>,
    channels: BTreeMap<String, ChannelRecord>,
}

impl ServerEntry {
    fn summary(&self, id: &ServerId) -> Option<ServerSummary> {
        let reference = self.reference.as_ref()?;
        Some(ServerSummary {
            id: id.clone(),
            name: self
                .record
                .as_ref()
                .map(|r| r.name.clone())
                .unwrap_or_else(|| reference.name.clone()),
            owner: self.record.as_ref().map(|r| r.owner),
            created_at: self.record.as_ref().map_or(0, |r| r.created_at),
            channels: self.channels.values().cloned().collect(),
            encryption_key: reference.encryption_key.clone(),
        })
    }
}

impl Session {
    async fn server_record(&self, id: &ServerId) -> Result<ServerRecord> {
        self.read::<ServerRecord>(&paths::server(id), self.config.lookup_timeout)
            .await
            .ok_or_else(|| ClientError::LookupTimeout(format!("server {id}")))
    }

    async fn require_owner(&self, id: &ServerId) -> Result<ServerRecord> {
        let me = self.me()?;
        let record = self.server_record(id).await?;
        if record.owner != me {
            return Err(ClientError::NotServerOwner);
        }
        Ok(record)
    }

    /// Create a server with a `general` text channel and a `voice-1` voice
    /// channel, owned by me.
    pub async fn create_server(&self, name: &str) -> Result<ServerId> {
        let me = self.me()?;
        let id = ServerId::generate();
        let now = now_ms();

        let seed = format!("{id}{now}");
        let salt = me.to_hex();
        let key = tokio::task::spawn_blocking(move || crypto::work_token(&seed, &salt)).await??;

        let record = ServerRecord {
            id: id.clone(),
            name: name.to_string(),
            owner: me,
            created_at: now,
        };
        self.graph.put(&paths::server(&id), record.to_value());

        for (channel, label, kind) in [
            (DEFAULT_TEXT_CHANNEL, "general", ChannelKind::Text),
            (DEFAULT_VOICE_CHANNEL, "Voice", ChannelKind::Voice),
        ] {
            let channel = ChannelRecord {
                id: ChannelId::from(channel),
                name: label.to_string(),
                kind,
            };
            self.graph
                .put(&paths::server_channel(&id, &channel.id), channel.to_value());
        }

        let owner = MemberRecord {
            pub_key: me,
            alias: Some(self.alias().to_string()),
            role: Some(MemberRole::Owner),
            joined_at: Some(now),
            banned: false,
            banned_by: None,
            banned_at: None,
        };
        self.graph.put(&paths::server_member(&id, &me), owner.to_value());

        let reference = ServerRef {
            id: id.clone(),
            name: name.to_string(),
            encryption_key: key,
        };
        self.graph.put(&paths::own_server(&me, &id), reference.to_value());

        info!(server = %id, "Created server");
        Ok(id)
    }

    /// Add a channel. Owner only.
    pub async fn create_server_channel(
        &self,
        server: &ServerId,
        name: &str,
        kind: ChannelKind,
    ) -> Result<ChannelId> {
        self.require_owner(server).await?;
        let channel = ChannelRecord {
            id: ChannelId::generate(kind),
            name: name.to_string(),
            kind,
        };
        self.graph
            .put(&paths::server_channel(server, &channel.id), channel.to_value());
        debug!(server = %server, channel = %channel.id, "Created channel");
        Ok(channel.id)
    }

    pub async fn is_banned(&self, server: &ServerId) -> Result<bool> {
        let me = self.me()?;
        Ok(self
            .read::<BanRecord>(&paths::server_ban(server, &me), self.config.probe_timeout)
            .await
            .is_some())
    }

    /// Join `server` as a member and store a reference with its key.
    pub async fn join_server(&self, server: &ServerId) -> Result<()> {
        let me = self.me()?;
        if self.is_banned(server).await? {
            return Err(ClientError::Banned);
        }
        let record = self.server_record(server).await?;

        if record.owner != me {
            let member = MemberRecord {
                pub_key: me,
                alias: Some(self.alias().to_string()),
                role: Some(MemberRole::Member),
                joined_at: Some(now_ms()),
                banned: false,
                banned_by: None,
                banned_at: None,
            };
            self.graph.put(&paths::server_member(server, &me), member.to_value());
        }

        let owner_ref = paths::own_server(&record.owner, server);
        let key = self
            .read::<ServerRef>(&owner_ref, self.config.lookup_timeout)
            .await
            .map(|r| r.encryption_key)
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| {
                warn!(server = %server, "Server key unavailable, falling back to server id");
                server.to_string()
            });

        let reference = ServerRef {
            id: server.clone(),
            name: record.name,
            encryption_key: key,
        };
        self.graph.put(&paths::own_server(&me, server), reference.to_value());
        info!(server = %server, "Joined server");
        Ok(())
    }

    /// Ban `member`. Owner only; the owner cannot be banned.
    pub async fn ban_server_member(&self, server: &ServerId, member: &UserPub) -> Result<()> {
        let record = self.require_owner(server).await?;
        if *member == record.owner {
            return Err(ClientError::CannotBanOwner);
        }

        let me = record.owner;
        let now = now_ms();
        let marked = MemberRecord {
            pub_key: *member,
            alias: None,
            role: None,
            joined_at: None,
            banned: true,
            banned_by: Some(me),
            banned_at: Some(now),
        };
        self.graph.put(&paths::server_member(server, member), marked.to_value());

        let ban = BanRecord {
            pub_key: *member,
            banned_by: me,
            time: now,
        };
        self.graph.put(&paths::server_ban(server, member), ban.to_value());
        info!(server = %server, member = %member.short(), "Banned member");
        Ok(())
    }

    /// Members of `server`, banned entries excluded, in join order.
    pub fn listen_server_members(&self, server: &ServerId) -> Result<LiveView<Vec<ServerMember>>> {
        self.me()?;
        let mut entries = self.graph.map(&paths::server_members(server));

        let view = LiveView::spawn(move |tx| async move {
            let mut members: BTreeMap<String, ServerMember> = BTreeMap::new();
            while let Some(event) = entries.recv().await {
                let member = event
                    .value
                    .as_ref()
                    .and_then(MemberRecord::from_value)
                    .and_then(ServerMember::from_record);
                match member {
                    Some(member) => members.insert(event.key, member),
                    None => members.remove(&event.key),
                };
                let mut list: Vec<ServerMember> = members.values().cloned().collect();
                list.sort_by_key(|m| m.joined_at);
                if tx.send(list).is_err() {
                    break;
                }
            }
        });
        Ok(self.watch(view))
    }

    /// Servers I belong to, with their channel lists.
    pub fn listen_user_servers(&self) -> Result<LiveView<Vec<ServerSummary>>> {
        let me = self.me()?;
        let graph = self.graph.clone();
        let mut references = self.graph.map(&paths::own_servers(&me));

        let view = LiveView::spawn(move |tx| async move {
            let (updates_tx, mut updates) = mpsc::unbounded_channel();
            let mut followers: TaskSet<ServerId> = TaskSet::new();
            let mut servers: BTreeMap<ServerId, ServerEntry> = BTreeMap::new();

            loop {
                tokio::select! {
                    event = references.recv() => {
                        let Some(event) = event else { break };
                        let id = ServerId::from(event.key.as_str());
                        match event.value.as_ref().and_then(ServerRef::from_value) {
                            Some(reference) => {
                                servers.entry(id.clone()).or_default().reference = Some(reference);
                                if !followers.contains(&id) {
                                    let task =
                                        follow_server(&graph, id.clone(), updates_tx.clone());
                                    followers.insert(id, task);
                                }
                            }
                            None => {
                                servers.remove(&id);
                                followers.remove(&id);
                            }
                        }
                    }
                    Some(update) = updates.recv() => match update {
                        ServerUpdate::Info(id, record) => {
                            if let Some(entry) = servers.get_mut(&id) {
                                entry.record = record;
                            }
                        }
                        ServerUpdate::Channel(id, key, channel) => {
                            if let Some(entry) = servers.get_mut(&id) {
                                match channel {
                                    Some(channel) => entry.channels.insert(key, channel),
                                    None => entry.channels.remove(&key),
                                };
                            }
                        }
                    },
                }

                let list: Vec<ServerSummary> = servers
                    .iter()
                    .filter_map(|(id, entry)| entry.summary(id))
                    .collect();
                if tx.send(list).is_err() {
                    break;
                }
            }
        });
        Ok(self.watch(view))
    }

    /// Set the server picture. Owner only; must be a `data:image` URL.
    pub async fn set_server_avatar(&self, server: &ServerId, data_url: &str) -> Result<()> {
        check_avatar(data_url)?;
        self.require_owner(server).await?;
        self.graph
            .put(&paths::server_avatar(server), Value::String(data_url.to_string()));
        Ok(())
    }

    pub fn listen_server_avatar(&self, server: &ServerId) -> Result<LiveView<String>> {
        self.me()?;
        Ok(self.watch(avatar_view(&self.graph, &paths::server_avatar(server))))
    }
}

/// Avatars must be `data:image` URLs no longer than [`MAX_AVATAR_BYTES`].
pub(crate) fn check_avatar(data_url: &str) -> Result<()> {
    if !data_url.starts_with(AVATAR_PREFIX) {
        return Err(ClientError::InvalidAvatar);
    }
    if data_url.len() > MAX_AVATAR_BYTES {
        return Err(ClientError::AvatarTooLarge(data_url.len(), MAX_AVATAR_BYTES));
    }
    Ok(())
}

/// Emits every `data:image` value written at `path`; anything else is
/// ignored.
pub(crate) fn avatar_view(graph: &Graph, path: &agora_shared::Path) -> LiveView<String> {
    let mut values = graph.on(path);
    LiveView::spawn(move |tx| async move {
        while let Some(event) = values.recv().await {
            let Some(Value::String(url)) = event.value else {
                continue;
            };
            if !url.starts_with(AVATAR_PREFIX) {
                continue;
            }
            if tx.send(url).is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(banned: bool) -> MemberRecord {
        MemberRecord {
            pub_key: UserPub([3; 32]),
            alias: None,
            role: None,
            joined_at: None,
            banned,
            banned_by: None,
            banned_at: None,
        }
    }

    #[test]
    fn banned_members_are_hidden() {
        assert!(ServerMember::from_record(member(true)).is_none());

        let shown = ServerMember::from_record(member(false)).unwrap();
        assert_eq!(shown.alias, UNKNOWN_ALIAS);
        assert_eq!(shown.role, MemberRole::Member);
        assert_eq!(shown.joined_at, 0);
    }

    #[test]
    fn summary_needs_a_reference() {
        let id = ServerId::from("srv-1-abc");
        let mut entry = ServerEntry::default();
        assert!(entry.summary(&id).is_none());

        entry.reference = Some(ServerRef {
            id: id.clone(),
            name: "from ref".into(),
            encryption_key: "k".into(),
        });
        let summary = entry.summary(&id).unwrap();
        assert_eq!(summary.name, "from ref");
        assert_eq!(summary.owner, None);

        entry.record = Some(ServerRecord {
            id: id.clone(),
            name: "from record".into(),
            owner: UserPub([1; 32]),
            created_at: 9,
        });
        assert_eq!(entry.summary(&id).unwrap().name, "from record");
    }
}
