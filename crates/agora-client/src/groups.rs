//! Group conversations.
//!
//! The creator writes `groups/<id>`, one member entry per participant and an
//! invite into each invitee's `group_invites/<pub>` inbox. The invite carries
//! the group key. An invitee's invite listener accepts automatically.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use agora_graph::Graph;
use agora_shared::crypto;
use agora_shared::protocol::{GroupInvite, GroupMemberRecord, GroupRecord, GroupRef, Record};
use agora_shared::types::now_ms;
use agora_shared::{paths, GroupId, UserPub};

use crate::error::Result;
use crate::live::{LiveView, TaskSet};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub id: GroupId,
    pub name: String,
    pub members: Vec<UserPub>,
    pub encryption_key: String,
}

/// Write my membership and group reference for `invite`, then clear it.
fn accept_invite(graph: &Graph, me: &UserPub, invite: &GroupInvite) {
    let reference = GroupRef {
        id: invite.id.clone(),
        name: invite.name.clone(),
        encryption_key: invite
            .key
            .clone()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| invite.id.to_string()),
    };
    graph.put(&paths::own_group(me, &invite.id), reference.to_value());

    let member = GroupMemberRecord {
        pub_key: *me,
        joined_at: now_ms(),
    };
    graph.put(&paths::group_member(&invite.id, me), member.to_value());
    graph.delete(&paths::group_invite(me, &invite.id));
}

fn follow_members(
    graph: &Graph,
    id: GroupId,
    updates: mpsc::UnboundedSender<(GroupId, String, Option<UserPub>)>,
) -> tokio::task::JoinHandle<()> {
    let mut members = graph.map(&paths::group_members(&id));
    tokio::spawn(async move {
        while let Some(event) = members.recv().await {
            let member = event
                .value
                .as_ref()
                .and_then(GroupMemberRecord::from_value)
                .map(|m| m.pub_key);
            if updates.send((id.clone(), event.key, member)).is_err() {
                break;
            }
        }
    })
}

struct GroupEntry {
    reference: GroupRef,
    members: BTreeMap<String, UserPub>,
}

impl Session {
    /// Create a group with me and `members`, inviting each of them.
    pub async fn create_group(&self, name: &str, members: &[UserPub]) -> Result<GroupId> {
        let me = self.me()?;
        let id = GroupId::generate();
        let now = now_ms();

        let seed = format!("{id}{now}");
        let salt = me.to_hex();
        let key = tokio::task::spawn_blocking(move || crypto::work_token(&seed, &salt)).await??;

        let record = GroupRecord {
            id: id.clone(),
            name: name.to_string(),
            creator: me,
            created_at: now,
        };
        self.graph.put(&paths::group(&id), record.to_value());

        let everyone: BTreeSet<UserPub> = members.iter().copied().chain([me]).collect();
        for member in &everyone {
            let entry = GroupMemberRecord {
                pub_key: *member,
                joined_at: now,
            };
            self.graph.put(&paths::group_member(&id, member), entry.to_value());
        }

        let reference = GroupRef {
            id: id.clone(),
            name: name.to_string(),
            encryption_key: key.clone(),
        };
        self.graph.put(&paths::own_group(&me, &id), reference.to_value());

        for member in everyone.iter().filter(|m| **m != me) {
            let invite = GroupInvite {
                id: id.clone(),
                name: name.to_string(),
                from: me,
                time: now,
                key: Some(key.clone()),
            };
            self.graph.put(&paths::group_invite(member, &id), invite.to_value());
        }

        info!(group = %id, members = everyone.len(), "Created group");
        Ok(id)
    }

    pub fn accept_group_invite(&self, invite: &GroupInvite) -> Result<()> {
        let me = self.me()?;
        accept_invite(&self.graph, &me, invite);
        info!(group = %invite.id, "Joined group");
        Ok(())
    }

    /// Invites addressed to me. Each one is accepted as it arrives and then
    /// emitted.
    pub fn listen_group_invites(&self) -> Result<LiveView<GroupInvite>> {
        let me = self.me()?;
        let graph = self.graph.clone();
        let mut inbox = self.graph.map(&paths::group_invites(&me));

        let view = LiveView::spawn(move |tx| async move {
            while let Some(event) = inbox.recv().await {
                let Some(invite) = event.value.as_ref().and_then(GroupInvite::from_value) else {
                    continue;
                };
                debug!(group = %invite.id, from = %invite.from.short(), "Accepting group invite");
                accept_invite(&graph, &me, &invite);
                if tx.send(invite).is_err() {
                    break;
                }
            }
        });
        Ok(self.watch(view))
    }

    /// Groups I belong to, with their member lists.
    pub fn listen_user_groups(&self) -> Result<LiveView<Vec<GroupSummary>>> {
        let me = self.me()?;
        let graph = self.graph.clone();
        let mut references = self.graph.map(&paths::own_groups(&me));

        let view = LiveView::spawn(move |tx| async move {
            let (updates_tx, mut updates) = mpsc::unbounded_channel();
            let mut followers: TaskSet<GroupId> = TaskSet::new();
            let mut groups: BTreeMap<GroupId, GroupEntry> = BTreeMap::new();

            loop {
                tokio::select! {
                    event = references.recv() => {
                        let Some(event) = event else { break };
                        let id = GroupId::from(event.key.as_str());
                        match event.value.as_ref().and_then(GroupRef::from_value) {
                            Some(reference) => {
                                match groups.get_mut(&id) {
                                    Some(entry) => entry.reference = reference,
                                    None => {
                                        groups.insert(id.clone(), GroupEntry {
                                            reference,
                                            members: BTreeMap::new(),
                                        });
                                    }
                                }
                                if !followers.contains(&id) {
                                    let task =
                                        follow_members(&graph, id.clone(), updates_tx.clone());
                                    followers.insert(id, task);
                                }
                            }
                            None => {
                                groups.remove(&id);
                                followers.remove(&id);
                            }
                        }
                    }
                    Some((id, key, member)) = updates.recv() => {
                        if let Some(entry) = groups.get_mut(&id) {
                            match member {
                                Some(member) => entry.members.insert(key, member),
                                None => entry.members.remove(&key),
                            };
                        }
                    }
                }

                let list: Vec<GroupSummary> = groups
                    .iter()
                    .map(|(id, entry)| GroupSummary {
                        id: id.clone(),
                        name: entry.reference.name.clone(),
                        members: entry.members.values().copied().collect(),
                        encryption_key: entry.reference.encryption_key.clone(),
                    })
                    .collect();
                if tx.send(list).is_err() {
                    break;
                }
            }
        });
        Ok(self.watch(view))
    }
}
