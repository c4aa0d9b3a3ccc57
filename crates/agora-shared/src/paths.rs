//! Graph path conventions shared by every replica.
//!
//! These must stay byte-for-byte stable: any client that reads or writes the
//! graph relies on the same layout.

use crate::path::Path;
use crate::types::{ChannelId, GroupId, ServerId, UserPub};

/// `~<pub>`: an identity's own namespace.
pub fn user(owner: &UserPub) -> Path {
    Path::new([format!("~{owner}")])
}

/// `~@<alias>`: alias index listing the accounts registered under it.
pub fn alias_index(alias: &str) -> Path {
    Path::new([format!("~@{alias}")])
}

pub fn password_slot(owner: &UserPub) -> Path {
    user(owner).child("auth").child("password")
}

pub fn recovery_slot(owner: &UserPub) -> Path {
    user(owner).child("auth").child("recovery")
}

pub fn profile(owner: &UserPub) -> Path {
    user(owner).child("profile")
}

pub fn profile_avatar(owner: &UserPub) -> Path {
    profile(owner).child("avatar")
}

pub fn avatar(owner: &UserPub) -> Path {
    Path::new(["avatars".to_string(), owner.to_hex()])
}

pub fn friend_requests(to: &UserPub) -> Path {
    Path::new(["friend_requests".to_string(), to.to_hex()])
}

pub fn friend_request(to: &UserPub, from: &UserPub) -> Path {
    friend_requests(to).child(from.to_hex())
}

pub fn friend_mirrors(to: &UserPub) -> Path {
    Path::new(["friend_lists".to_string(), to.to_hex()])
}

pub fn friend_mirror(to: &UserPub, from: &UserPub) -> Path {
    friend_mirrors(to).child(from.to_hex())
}

pub fn friends(owner: &UserPub) -> Path {
    user(owner).child("friends")
}

pub fn friend(owner: &UserPub, other: &UserPub) -> Path {
    friends(owner).child(other.to_hex())
}

pub fn dm_messages(conversation: &str) -> Path {
    Path::new(["dms", conversation])
}

pub fn server(id: &ServerId) -> Path {
    Path::new(["servers", id.as_str()])
}

pub fn server_channels(id: &ServerId) -> Path {
    server(id).child("channels")
}

pub fn server_channel(id: &ServerId, channel: &ChannelId) -> Path {
    server_channels(id).child(channel.as_str())
}

pub fn server_channel_messages(id: &ServerId, channel: &ChannelId) -> Path {
    server_channel(id, channel).child("messages")
}

pub fn server_members(id: &ServerId) -> Path {
    server(id).child("members")
}

pub fn server_member(id: &ServerId, member: &UserPub) -> Path {
    server_members(id).child(member.to_hex())
}

pub fn server_ban(id: &ServerId, member: &UserPub) -> Path {
    server(id).child("bans").child(member.to_hex())
}

pub fn server_avatar(id: &ServerId) -> Path {
    server(id).child("avatar")
}

/// `~<pub>/servers`: private references to joined servers, with keys.
pub fn own_servers(owner: &UserPub) -> Path {
    user(owner).child("servers")
}

pub fn own_server(owner: &UserPub, id: &ServerId) -> Path {
    own_servers(owner).child(id.as_str())
}

pub fn group(id: &GroupId) -> Path {
    Path::new(["groups", id.as_str()])
}

pub fn group_members(id: &GroupId) -> Path {
    group(id).child("members")
}

pub fn group_member(id: &GroupId, member: &UserPub) -> Path {
    group_members(id).child(member.to_hex())
}

pub fn group_messages(id: &GroupId) -> Path {
    group(id).child("messages")
}

pub fn group_invites(to: &UserPub) -> Path {
    Path::new(["group_invites".to_string(), to.to_hex()])
}

pub fn group_invite(to: &UserPub, id: &GroupId) -> Path {
    group_invites(to).child(id.as_str())
}

pub fn own_groups(owner: &UserPub) -> Path {
    user(owner).child("groups")
}

pub fn own_group(owner: &UserPub, id: &GroupId) -> Path {
    own_groups(owner).child(id.as_str())
}

/// `<serverId>/<channelId>`, the single-segment key of a voice channel.
pub fn voice_channel_key(server: &ServerId, channel: &ChannelId) -> String {
    format!("{server}/{channel}")
}

pub fn voice_peers(channel_path: &str) -> Path {
    Path::new(["voice", channel_path, "peers"])
}

pub fn voice_peer(channel_path: &str, member: &UserPub) -> Path {
    voice_peers(channel_path).child(member.to_hex())
}

pub fn voice_inbox(channel_path: &str, to: &UserPub) -> Path {
    Path::new(["voice", channel_path, "signals"]).child(to.to_hex())
}

pub fn voice_signal(channel_path: &str, to: &UserPub, from: &UserPub) -> Path {
    voice_inbox(channel_path, to).child(from.to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_wire_conventions() {
        let a = UserPub([0xaa; 32]);
        let b = UserPub([0xbb; 32]);
        let srv = ServerId::from("srv-1-x");
        let ch = ChannelId::from("general");

        assert_eq!(
            friend_request(&b, &a).to_string(),
            format!("friend_requests/{}/{}", b, a)
        );
        assert_eq!(profile(&a).to_string(), format!("~{a}/profile"));
        assert_eq!(
            server_channel_messages(&srv, &ch).to_string(),
            "servers/srv-1-x/channels/general/messages"
        );
        assert_eq!(
            voice_signal("srv-1-x/voice-1", &b, &a).segments(),
            &[
                "voice".to_string(),
                "srv-1-x/voice-1".to_string(),
                "signals".to_string(),
                b.to_hex(),
                a.to_hex()
            ]
        );
    }
}
