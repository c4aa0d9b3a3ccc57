//! Friend requests and the friend list.
//!
//! A request is written into the target's public inbox
//! `friend_requests/<to>/<from>`. Accepting writes the local friend entry
//! and mirrors one into `friend_lists/<requester>/<me>`, which the
//! requester's friend listener adopts into their own list.

use std::collections::BTreeMap;

use tracing::{debug, info};

use agora_shared::constants::UNKNOWN_ALIAS;
use agora_shared::protocol::{FriendRecord, FriendRequest, Record};
use agora_shared::types::now_ms;
use agora_shared::{paths, UserPub};

use crate::error::Result;
use crate::live::LiveView;
use crate::session::Session;

impl Session {
    pub fn send_friend_request(&self, to: &UserPub) -> Result<()> {
        let me = self.me()?;
        let request = FriendRequest {
            from: me,
            alias: self.alias().to_string(),
            time: now_ms(),
        };
        self.graph.put(&paths::friend_request(to, &me), request.to_value());
        info!(to = %to.short(), "Friend request sent");
        Ok(())
    }

    /// Pending requests addressed to me, oldest first.
    pub fn listen_friend_requests(&self) -> Result<LiveView<Vec<FriendRequest>>> {
        let me = self.me()?;
        let mut inbox = self.graph.map(&paths::friend_requests(&me));

        let view = LiveView::spawn(move |tx| async move {
            let mut pending: BTreeMap<String, FriendRequest> = BTreeMap::new();
            while let Some(event) = inbox.recv().await {
                match event.value.as_ref().and_then(FriendRequest::from_value) {
                    Some(request) => pending.insert(event.key, request),
                    None => pending.remove(&event.key),
                };
                let mut list: Vec<FriendRequest> = pending.values().cloned().collect();
                list.sort_by_key(|r| r.time);
                if tx.send(list).is_err() {
                    break;
                }
            }
        });
        Ok(self.watch(view))
    }

    pub async fn accept_friend_request(&self, from: &UserPub) -> Result<()> {
        let me = self.me()?;
        let request_path = paths::friend_request(&me, from);
        let alias = self
            .read::<FriendRequest>(&request_path, self.config.probe_timeout)
            .await
            .map(|r| r.alias)
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| UNKNOWN_ALIAS.to_string());

        let now = now_ms();
        let theirs = FriendRecord {
            pub_key: *from,
            alias,
            added_at: now,
        };
        let mine = FriendRecord {
            pub_key: me,
            alias: self.alias().to_string(),
            added_at: now,
        };
        self.graph.put(&paths::friend(&me, from), theirs.to_value());
        self.graph.put(&paths::friend_mirror(from, &me), mine.to_value());
        self.graph.delete(&request_path);
        info!(friend = %from.short(), "Friend request accepted");
        Ok(())
    }

    pub fn reject_friend_request(&self, from: &UserPub) -> Result<()> {
        let me = self.me()?;
        self.graph.delete(&paths::friend_request(&me, from));
        debug!(from = %from.short(), "Friend request rejected");
        Ok(())
    }

    /// Drop `other` from my list and clear both mirror entries so neither
    /// side adopts the relationship again.
    pub fn remove_friend(&self, other: &UserPub) -> Result<()> {
        let me = self.me()?;
        self.graph.delete(&paths::friend(&me, other));
        self.graph.delete(&paths::friend_mirror(other, &me));
        self.graph.delete(&paths::friend_mirror(&me, other));
        info!(friend = %other.short(), "Friend removed");
        Ok(())
    }

    /// My friend list. Entries mirrored to me by someone who accepted my
    /// request are added to the list as they arrive.
    pub fn listen_friends(&self) -> Result<LiveView<Vec<FriendRecord>>> {
        let me = self.me()?;
        let graph = self.graph.clone();
        let mut own = self.graph.map(&paths::friends(&me));
        let mut mirrored = self.graph.map(&paths::friend_mirrors(&me));

        let view = LiveView::spawn(move |tx| async move {
            let mut friends: BTreeMap<String, FriendRecord> = BTreeMap::new();
            loop {
                tokio::select! {
                    biased;

                    event = own.recv() => {
                        let Some(event) = event else { break };
                        match event.value.as_ref().and_then(FriendRecord::from_value) {
                            Some(friend) => friends.insert(event.key, friend),
                            None => friends.remove(&event.key),
                        };
                        let mut list: Vec<FriendRecord> = friends.values().cloned().collect();
                        list.sort_by_key(|f| f.added_at);
                        if tx.send(list).is_err() {
                            break;
                        }
                    }
                    event = mirrored.recv() => {
                        let Some(event) = event else { break };
                        let friend = event.value.as_ref().and_then(FriendRecord::from_value);
                        let Some(friend) = friend else { continue };
                        if !friends.contains_key(&event.key) {
                            debug!(friend = %friend.pub_key.short(), "Adopting mirrored friend");
                            graph.put(&paths::friend(&me, &friend.pub_key), friend.to_value());
                        }
                    }
                }
            }
        });
        Ok(self.watch(view))
    }
}
