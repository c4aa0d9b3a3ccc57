//! Typed records stored in the replicated graph.
//!
//! Every record read back from the graph goes through [`Record::from_value`],
//! which rejects anything that does not have the expected shape. Malformed
//! or hostile records are ignored by callers, never trusted.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::SealedKeys;
use crate::types::{ChannelId, ChannelKind, EncryptionPub, GroupId, MemberRole, ServerId, UserPub};

pub trait Record: Serialize + DeserializeOwned {
    /// Shape checks beyond what deserialization enforces.
    fn is_valid(&self) -> bool {
        true
    }

    fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value::<Self>(value.clone())
            .ok()
            .filter(Self::is_valid)
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Public account node at `~<pub>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub alias: String,
    #[serde(rename = "pub")]
    pub pub_key: UserPub,
    pub epub: EncryptionPub,
}

impl Record for AccountRecord {
    fn is_valid(&self) -> bool {
        !self.alias.is_empty()
    }
}

/// Private keys sealed under `~<pub>/auth/password` or `~<pub>/auth/recovery`.
impl Record for SealedKeys {
    fn is_valid(&self) -> bool {
        !self.salt.is_empty() && !self.ciphertext.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    pub alias: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl Record for ProfileRecord {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub ciphertext: String,
    pub from: UserPub,
    pub from_alias: String,
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Record for MessageRecord {
    fn is_valid(&self) -> bool {
        !self.id.is_empty() && !self.ciphertext.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub from: UserPub,
    #[serde(default)]
    pub alias: String,
    pub time: i64,
}

impl Record for FriendRequest {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRecord {
    #[serde(rename = "pub")]
    pub pub_key: UserPub,
    #[serde(default)]
    pub alias: String,
    pub added_at: i64,
}

impl Record for FriendRecord {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    pub id: ServerId,
    pub name: String,
    pub owner: UserPub,
    pub created_at: i64,
}

impl Record for ServerRecord {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: ChannelId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
}

impl Record for ChannelRecord {}

/// Entry under `servers/<id>/members/<pub>`. A ban merges `banned`,
/// `bannedBy` and `bannedAt` into the existing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    #[serde(rename = "pub")]
    pub pub_key: UserPub,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<MemberRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<i64>,
    #[serde(default)]
    pub banned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banned_by: Option<UserPub>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banned_at: Option<i64>,
}

impl Record for MemberRecord {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanRecord {
    #[serde(rename = "pub")]
    pub pub_key: UserPub,
    pub banned_by: UserPub,
    pub time: i64,
}

impl Record for BanRecord {}

/// Private reference to a joined server under `~<pub>/servers/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRef {
    pub id: ServerId,
    pub name: String,
    pub encryption_key: String,
}

impl Record for ServerRef {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    pub id: GroupId,
    pub name: String,
    pub creator: UserPub,
    pub created_at: i64,
}

impl Record for GroupRecord {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMemberRecord {
    #[serde(rename = "pub")]
    pub pub_key: UserPub,
    pub joined_at: i64,
}

impl Record for GroupMemberRecord {}

/// Invitation under `group_invites/<to>/<groupId>`. Carries the group key
/// in the clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInvite {
    pub id: GroupId,
    pub name: String,
    pub from: UserPub,
    pub time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Record for GroupInvite {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRef {
    pub id: GroupId,
    pub name: String,
    pub encryption_key: String,
}

impl Record for GroupRef {}

/// Presence entry under `voice/<channel>/peers/<pub>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicePresence {
    #[serde(rename = "pub")]
    pub pub_key: UserPub,
    #[serde(default)]
    pub alias: String,
    pub joined: bool,
    #[serde(default)]
    pub screen_sharing: bool,
    pub time: i64,
    /// Fixed for the lifetime of one join; `time` moves on every update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<i64>,
}

impl VoicePresence {
    pub fn joined_at(&self) -> i64 {
        self.joined_at.unwrap_or(self.time)
    }
}

impl Record for VoicePresence {}

/// Mailbox slot under `voice/<channel>/signals/<to>/<from>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalRecord {
    Offer { sdp: String, time: i64 },
    Answer { sdp: String, time: i64 },
    /// `candidate` is the JSON form of the ICE candidate init.
    Ice { candidate: String, time: i64 },
}

impl SignalRecord {
    pub fn time(&self) -> i64 {
        match self {
            SignalRecord::Offer { time, .. }
            | SignalRecord::Answer { time, .. }
            | SignalRecord::Ice { time, .. } => *time,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SignalRecord::Offer { .. } => "offer",
            SignalRecord::Answer { .. } => "answer",
            SignalRecord::Ice { .. } => "ice",
        }
    }
}

impl Record for SignalRecord {
    fn is_valid(&self) -> bool {
        match self {
            SignalRecord::Offer { sdp, .. } | SignalRecord::Answer { sdp, .. } => !sdp.is_empty(),
            SignalRecord::Ice { candidate, .. } => !candidate.is_empty(),
        }
    }
}
